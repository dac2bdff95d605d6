//! Collapses per-capture endpoint inventories by normalized hostname.
//!
//! Collapsing runs in two passes. The first pass walks every row of every
//! capture and builds a geolocation index keyed by the unmodified hostname
//! (falling back to the IP when no hostname was resolved), so that a
//! conflict between captures marks the hostname Anycast before any rows
//! are merged. The second pass rewrites each row's geolocations from the
//! index, merges rows within a capture, and finally merges the per-capture
//! results into one overall list.

use super::containers::{EndpointRecord, Geolocation, TrafficCounters};
use std::collections::HashMap;

const UNRESOLVED: &str = "None";

/// One row of a capture's endpoint inventory, as parsed from disk.
#[derive(Clone, Debug)]
pub struct RawEndpointRow {
    pub ip: String,
    /// Hostname as observed on the wire; `"None"` when unresolved.
    pub hostname: String,
    /// Normalized hostname used as the merge key; `"None"` when unresolved.
    pub collapsed_hostname: String,
    pub ip_geo: Geolocation,
    pub cert_geo: Geolocation,
    pub counters: TrafficCounters,
}

/// All endpoint rows of one capture, tagged with the capture's name.
#[derive(Clone, Debug)]
pub struct CaptureEndpoints {
    pub name: String,
    pub rows: Vec<RawEndpointRow>,
}

/// Result of collapsing a set of captures.
#[derive(Clone, Debug, Default)]
pub struct CollapseOutput {
    /// Per-capture merged rows, in input order.
    pub per_file: Vec<(String, Vec<EndpointRecord>)>,
    /// Cross-capture merge keyed by collapsed hostname alone.
    pub overall: Vec<EndpointRecord>,
}

/// Parses a certificate geolocation field, dropping duplicate entries
/// while keeping first-seen order.
pub fn cert_geolocation(field: &str) -> Geolocation {
    if field == UNRESOLVED || field.is_empty() {
        return Geolocation::Unknown;
    }
    let mut unique: Vec<&str> = Vec::new();
    for entry in field.split(';') {
        if !unique.contains(&entry) {
            unique.push(entry);
        }
    }
    Geolocation::from_field(&unique.join(";"))
}

fn geo_key(row: &RawEndpointRow) -> &str {
    if row.hostname == UNRESOLVED {
        &row.ip
    } else {
        &row.hostname
    }
}

fn build_geo_index(captures: &[CaptureEndpoints]) -> HashMap<String, (Geolocation, Geolocation)> {
    let mut index: HashMap<String, (Geolocation, Geolocation)> = HashMap::new();
    for capture in captures {
        for row in &capture.rows {
            let entry = index
                .entry(geo_key(row).to_string())
                .or_insert((Geolocation::Unknown, Geolocation::Unknown));
            entry.0.observe(&row.ip_geo);
            entry.1.observe(&row.cert_geo);
        }
    }
    index
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

fn collapse_capture(
    capture: &CaptureEndpoints,
    index: &HashMap<String, (Geolocation, Geolocation)>,
) -> Vec<EndpointRecord> {
    let mut merged: Vec<EndpointRecord> = Vec::new();

    for row in &capture.rows {
        let (ip_geo, cert_geo) = match index.get(geo_key(row)) {
            Some((ip_geo, cert_geo)) => (ip_geo.clone(), cert_geo.clone()),
            None => (row.ip_geo.clone(), row.cert_geo.clone()),
        };

        // Rows without a normalized hostname are kept verbatim; only the
        // merge key and both geolocations have to agree for a merge.
        let target = if row.collapsed_hostname == UNRESOLVED {
            None
        } else {
            merged.iter_mut().find(|known| {
                known.collapsed_hostname == row.collapsed_hostname
                    && known.ip_geo == ip_geo
                    && known.cert_geo == cert_geo
            })
        };

        match target {
            Some(known) => {
                push_unique(&mut known.ips, &row.ip);
                push_unique(&mut known.hostnames, &row.hostname);
                known.counters += row.counters;
            }
            None => merged.push(EndpointRecord {
                ips: vec![row.ip.clone()],
                hostnames: vec![row.hostname.clone()],
                collapsed_hostname: row.collapsed_hostname.clone(),
                ip_geo,
                cert_geo,
                counters: row.counters,
                files: Vec::new(),
            }),
        }
    }

    merged
}

fn merge_into_overall(overall: &mut Vec<EndpointRecord>, records: &[EndpointRecord], file: &str) {
    for record in records {
        let target = if record.collapsed_hostname == UNRESOLVED {
            None
        } else {
            overall
                .iter_mut()
                .find(|known| known.collapsed_hostname == record.collapsed_hostname)
        };

        match target {
            Some(known) => {
                for ip in &record.ips {
                    push_unique(&mut known.ips, ip);
                }
                for hostname in &record.hostnames {
                    push_unique(&mut known.hostnames, hostname);
                }
                known.counters += record.counters;
                push_unique(&mut known.files, file);
            }
            None => {
                let mut fresh = record.clone();
                fresh.files = vec![file.to_string()];
                overall.push(fresh);
            }
        }
    }
}

/// Collapses every capture and builds the cross-capture overall list.
pub fn collapse_all(captures: &[CaptureEndpoints]) -> CollapseOutput {
    let index = build_geo_index(captures);
    let mut output = CollapseOutput::default();

    for capture in captures {
        let merged = collapse_capture(capture, &index);
        log::debug!("{}: collapsed to {} endpoints", capture.name, merged.len());
        merge_into_overall(&mut output.overall, &merged, &capture.name);
        output.per_file.push((capture.name.clone(), merged));
    }

    output
}

/// Tokenizes a collapsed hostname for filtering, base domain first.
///
/// `s3.us-east-1.amazonaws.com` becomes `[amazonaws.com, us-east-1, s3]`.
pub fn hostname_tokens(hostname: &str) -> Vec<String> {
    let tokens: Vec<&str> = hostname.split('.').collect();
    if tokens.len() < 2 {
        return vec![hostname.to_string()];
    }
    let base = format!("{}.{}", tokens[tokens.len() - 2], tokens[tokens.len() - 1]);
    let mut out = vec![base];
    out.extend(tokens[..tokens.len() - 2].iter().rev().map(|t| t.to_string()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(packets: u64, bytes: u64) -> TrafficCounters {
        TrafficCounters {
            packets,
            bytes,
            tx_packets: packets,
            tx_bytes: bytes,
            rx_packets: 0,
            rx_bytes: 0,
        }
    }

    fn row(ip: &str, host: &str, collapsed: &str, geo: &str, packets: u64) -> RawEndpointRow {
        RawEndpointRow {
            ip: ip.to_string(),
            hostname: host.to_string(),
            collapsed_hostname: collapsed.to_string(),
            ip_geo: Geolocation::from_field(geo),
            cert_geo: Geolocation::Unknown,
            counters: counters(packets, packets * 100),
        }
    }

    fn capture(name: &str, rows: Vec<RawEndpointRow>) -> CaptureEndpoints {
        CaptureEndpoints {
            name: name.to_string(),
            rows,
        }
    }

    #[test]
    fn conflicting_locations_mark_anycast_across_captures() {
        let captures = vec![
            capture(
                "bulb-a",
                vec![row("1.1.1.1", "cdn.example.com", "example.com", "US", 5)],
            ),
            capture(
                "bulb-b",
                vec![row("2.2.2.2", "cdn.example.com", "example.com", "DE", 3)],
            ),
            capture(
                "bulb-c",
                vec![row("3.3.3.3", "cdn.example.com", "example.com", "US", 2)],
            ),
        ];

        let output = collapse_all(&captures);
        assert_eq!(output.overall.len(), 1);
        let host = &output.overall[0];
        // A later observation of the first country must not revert it.
        assert_eq!(host.ip_geo, Geolocation::Anycast);
        assert_eq!(host.counters.packets, 10);
        assert_eq!(host.ips, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
        assert_eq!(host.files, vec!["bulb-a", "bulb-b", "bulb-c"]);

        // Per-capture rows pick up the index verdict too.
        for (_, records) in &output.per_file {
            assert_eq!(records[0].ip_geo, Geolocation::Anycast);
        }
    }

    #[test]
    fn known_location_fills_in_unknown() {
        let captures = vec![
            capture(
                "plug",
                vec![
                    row("4.4.4.4", "time.example.net", "example.net", "None", 1),
                    row("4.4.4.4", "time.example.net", "example.net", "NL", 1),
                ],
            ),
        ];

        let output = collapse_all(&captures);
        assert_eq!(output.overall.len(), 1);
        assert_eq!(
            output.overall[0].ip_geo,
            Geolocation::Known("NL".to_string())
        );
        assert_eq!(output.overall[0].counters.packets, 2);
    }

    #[test]
    fn within_capture_merge_requires_matching_geolocations() {
        // Same collapsed hostname, but the unmodified hostnames resolve to
        // different single-country verdicts. They must stay separate rows.
        let captures = vec![capture(
            "cam",
            vec![
                row("5.5.5.5", "eu.example.org", "example.org", "DE", 4),
                row("6.6.6.6", "us.example.org", "example.org", "US", 6),
            ],
        )];

        let output = collapse_all(&captures);
        let (_, records) = &output.per_file[0];
        assert_eq!(records.len(), 2);
        // Overall still unites them under the collapsed hostname.
        assert_eq!(output.overall.len(), 1);
        assert_eq!(output.overall[0].counters.packets, 10);
    }

    #[test]
    fn unresolved_hostnames_never_merge() {
        let captures = vec![capture(
            "hub",
            vec![
                row("7.7.7.7", "None", "None", "US", 1),
                row("8.8.8.8", "None", "None", "US", 1),
            ],
        )];

        let output = collapse_all(&captures);
        let (_, records) = &output.per_file[0];
        assert_eq!(records.len(), 2);
        assert_eq!(output.overall.len(), 2);
        assert_eq!(output.overall[0].files, vec!["hub"]);
    }

    #[test]
    fn cert_field_drops_duplicate_countries() {
        assert_eq!(
            cert_geolocation("US;DE;US"),
            Geolocation::Known("US;DE".to_string())
        );
        assert_eq!(cert_geolocation("None"), Geolocation::Unknown);
    }

    #[test]
    fn hostname_tokenizes_base_domain_first() {
        assert_eq!(
            hostname_tokens("s3.us-east-1.amazonaws.com"),
            vec!["amazonaws.com", "us-east-1", "s3"]
        );
        assert_eq!(hostname_tokens("example.com"), vec!["example.com"]);
        assert_eq!(hostname_tokens("localhost"), vec!["localhost"]);
    }
}
