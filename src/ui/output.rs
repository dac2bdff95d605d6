//! CSV and JSON artifact handling.
//!
//! Every analysis stage exchanges data through CSV files so results can
//! be inspected, hand-annotated with endpoint party labels, and fed back
//! into later stages. The readers here tolerate extra columns but not
//! missing ones.

use crate::analyser::containers::{
    EndpointRecord, Geolocation, NetworkScope, PartyClass, ProtocolIdentity, TrafficCategory,
    TrafficCounters,
};
use crate::analyser::endpoints::{self, CaptureEndpoints, RawEndpointRow};
use crate::analyser::error::{AnalysisError, Result};
use crate::analyser::metrics::MetricRow;
use crate::analyser::stats::{DeviceEndpoint, DeviceViews, ProtocolSummary, UsageRow};
use crate::analyser::tables::ClassificationTables;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const METRIC_HEADER: [&str; 10] = [
    "MAC",
    "WAN/LAN",
    "Protocol",
    "IP",
    "TotalPackets",
    "TotalBytes",
    "TxPackets",
    "TxBytes",
    "RxPackets",
    "RxBytes",
];

fn field_error(path: &Path, detail: &str) -> AnalysisError {
    AnalysisError::MalformedReport(format!("{}: {detail}", path.display()))
}

fn parse_count(path: &Path, field: Option<&str>) -> Result<u64> {
    field
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| field_error(path, "expected a numeric count column"))
}

fn counters_from(path: &Path, fields: &[&str]) -> Result<TrafficCounters> {
    if fields.len() < 6 {
        return Err(field_error(path, "expected six counter columns"));
    }
    Ok(TrafficCounters {
        packets: parse_count(path, fields.first().copied())?,
        bytes: parse_count(path, fields.get(1).copied())?,
        tx_packets: parse_count(path, fields.get(2).copied())?,
        tx_bytes: parse_count(path, fields.get(3).copied())?,
        rx_packets: parse_count(path, fields.get(4).copied())?,
        rx_bytes: parse_count(path, fields.get(5).copied())?,
    })
}

/// One row of the device config mapping a device to its annotated
/// endpoint inventories and extracted protocol metric files.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub device: String,
    pub endpoint_files: Vec<PathBuf>,
    pub protocol_files: Vec<PathBuf>,
}

/// Reads the device config CSV; file lists are semicolon separated.
pub fn read_device_config(path: &Path) -> Result<Vec<DeviceConfig>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut configs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let device = record
            .get(0)
            .ok_or_else(|| field_error(path, "missing device column"))?;
        let endpoint_files = record
            .get(1)
            .ok_or_else(|| field_error(path, "missing endpoint file column"))?;
        let protocol_files = record
            .get(2)
            .ok_or_else(|| field_error(path, "missing protocol file column"))?;
        configs.push(DeviceConfig {
            device: device.to_string(),
            endpoint_files: endpoint_files.split(';').map(PathBuf::from).collect(),
            protocol_files: protocol_files.split(';').map(PathBuf::from).collect(),
        });
    }
    Ok(configs)
}

/// Reads annotated endpoint inventories for one device, merging repeated
/// addresses.
///
/// The inventory counts traffic from the remote endpoint's perspective,
/// so its Tx columns are this device's Rx and vice versa.
pub fn read_endpoint_inventory(files: &[PathBuf]) -> Result<Vec<DeviceEndpoint>> {
    let mut merged: Vec<DeviceEndpoint> = Vec::new();
    for file in files {
        let mut reader = csv::Reader::from_path(file)?;
        for record in reader.records() {
            let record = record?;
            let address = record
                .get(0)
                .ok_or_else(|| field_error(file, "missing address column"))?;
            let type_label = record
                .get(1)
                .ok_or_else(|| field_error(file, "missing endpoint type column"))?;
            let packets = parse_count(file, record.get(12))?;
            let bytes = parse_count(file, record.get(13))?;
            let rx_packets = parse_count(file, record.get(14))?;
            let rx_bytes = parse_count(file, record.get(15))?;
            let tx_packets = parse_count(file, record.get(16))?;
            let tx_bytes = parse_count(file, record.get(17))?;
            let counters = TrafficCounters {
                packets,
                bytes,
                tx_packets,
                tx_bytes,
                rx_packets,
                rx_bytes,
            };

            match merged.iter_mut().find(|known| known.address == address) {
                Some(known) => known.counters += counters,
                None => merged.push(DeviceEndpoint {
                    address: address.to_string(),
                    type_label: type_label.to_string(),
                    counters,
                }),
            }
        }
    }
    Ok(merged)
}

/// Reads extracted protocol metric files for one device, keyed by
/// endpoint address then identity. Lower-layer rows are skipped since
/// the category view only attributes application traffic.
pub fn read_protocol_inventory(
    files: &[PathBuf],
    tables: &ClassificationTables,
) -> Result<BTreeMap<String, BTreeMap<ProtocolIdentity, TrafficCounters>>> {
    let mut inventory: BTreeMap<String, BTreeMap<ProtocolIdentity, TrafficCounters>> =
        BTreeMap::new();
    for file in files {
        let mut reader = csv::Reader::from_path(file)?;
        for record in reader.records() {
            let record = record?;
            let protocol = record
                .get(2)
                .ok_or_else(|| field_error(file, "missing protocol column"))?;
            let address = record
                .get(3)
                .ok_or_else(|| field_error(file, "missing address column"))?;
            if tables.network.contains(&protocol)
                || tables.transport.contains(&protocol)
                || tables.session.contains(&protocol)
            {
                continue;
            }
            let fields: Vec<&str> = (4..10).filter_map(|i| record.get(i)).collect();
            let counters = counters_from(file, &fields)?;

            *inventory
                .entry(address.to_string())
                .or_default()
                .entry(ProtocolIdentity::named(protocol))
                .or_insert(TrafficCounters::ZERO) += counters;
        }
    }
    Ok(inventory)
}

fn scope_from_name(name: &str) -> NetworkScope {
    if name.contains("-LAN") {
        NetworkScope::Lan
    } else if name.contains("-WAN") {
        NetworkScope::Wan
    } else {
        NetworkScope::All
    }
}

const GENERATED_SUFFIXES: [&str; 3] = [
    "-unique-protos-per-mac.csv",
    "-unique-app-protos-overall.csv",
    "-proto-distributions.csv",
];

/// Reads every extracted protocol CSV in a directory into usage rows,
/// inferring the scope from the file name. Summary files written by a
/// previous run are left alone.
pub fn read_usage_rows(dir: &Path) -> Result<Vec<UsageRow>> {
    let mut rows = Vec::new();
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir()
            || !name.ends_with(".csv")
            || GENERATED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    for path in paths {
        let scope = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(scope_from_name)
            .unwrap_or(NetworkScope::All);
        let mut reader = csv::Reader::from_path(&path)?;
        for record in reader.records() {
            let record = record?;
            let mac = record
                .get(0)
                .ok_or_else(|| field_error(&path, "missing MAC column"))?;
            let protocol = record
                .get(2)
                .ok_or_else(|| field_error(&path, "missing protocol column"))?;
            let fields: Vec<&str> = (4..10).filter_map(|i| record.get(i)).collect();
            rows.push(UsageRow {
                mac: mac.to_string(),
                scope,
                identity: ProtocolIdentity::named(protocol),
                counters: counters_from(&path, &fields)?,
            });
        }
    }
    Ok(rows)
}

/// Reads every hostname-annotated endpoint CSV in a directory for the
/// collapse stage. Capture names are the file stems.
pub fn read_capture_endpoints(dir: &Path) -> Result<Vec<CaptureEndpoints>> {
    let mut captures = Vec::new();
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "csv").unwrap_or(false))
        .collect();
    paths.sort();

    for path in paths {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let fields: Vec<&str> = (5..11).filter_map(|i| record.get(i)).collect();
            rows.push(RawEndpointRow {
                ip: record
                    .get(0)
                    .ok_or_else(|| field_error(&path, "missing IP column"))?
                    .to_string(),
                hostname: record
                    .get(1)
                    .ok_or_else(|| field_error(&path, "missing hostname column"))?
                    .to_string(),
                collapsed_hostname: record
                    .get(2)
                    .ok_or_else(|| field_error(&path, "missing collapsed hostname column"))?
                    .to_string(),
                ip_geo: Geolocation::from_field(record.get(3).unwrap_or_default()),
                cert_geo: endpoints::cert_geolocation(record.get(4).unwrap_or_default()),
                counters: counters_from(&path, &fields)?,
            });
        }
        captures.push(CaptureEndpoints { name, rows });
    }
    Ok(captures)
}

fn counter_fields(counters: &TrafficCounters) -> [String; 6] {
    [
        counters.packets.to_string(),
        counters.bytes.to_string(),
        counters.tx_packets.to_string(),
        counters.tx_bytes.to_string(),
        counters.rx_packets.to_string(),
        counters.rx_bytes.to_string(),
    ]
}

fn share_fields(totals: &crate::analyser::stats::PartyTotals, party: PartyClass) -> [String; 6] {
    let shares = totals.shares(party);
    [
        shares.packets.to_string(),
        shares.bytes.to_string(),
        shares.tx_packets.to_string(),
        shares.tx_bytes.to_string(),
        shares.rx_packets.to_string(),
        shares.rx_bytes.to_string(),
    ]
}

/// Writes the per-capture protocol metric CSV for one scope.
///
/// Files are named `{capture}-protocols.csv` for ALL and get a `-LAN` or
/// `-WAN` suffix otherwise, which is how later stages recover the scope.
pub fn write_device_metrics(
    out_dir: &Path,
    capture: &str,
    scope: NetworkScope,
    rows: &[MetricRow],
) -> Result<PathBuf> {
    let file_name = match scope {
        NetworkScope::All => format!("{capture}-protocols.csv"),
        NetworkScope::Lan => format!("{capture}-protocols-LAN.csv"),
        NetworkScope::Wan => format!("{capture}-protocols-WAN.csv"),
    };
    let path = out_dir.join(file_name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(METRIC_HEADER)?;
    for row in rows.iter().filter(|row| row.scope == scope) {
        let counters = counter_fields(&row.counters);
        let mut record = vec![
            row.mac.clone(),
            row.scope.to_string(),
            row.identity.to_string(),
            row.address.clone(),
        ];
        record.extend(counters);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(path)
}

const PARTY_PCT_COLUMNS: [(&str, PartyClass); 4] = [
    ("First", PartyClass::First),
    ("Support", PartyClass::Support),
    ("Third", PartyClass::Third),
    ("Local", PartyClass::Local),
];

fn party_header(first_column: &str, extra: Option<&str>) -> Vec<String> {
    let mut header = vec![first_column.to_string()];
    if let Some(extra) = extra {
        header.push(extra.to_string());
    }
    for component in ["Packets", "Bytes", "TxPackets", "TxBytes", "RxPackets", "RxBytes"] {
        header.push(format!("{component}Overall"));
    }
    for (party, _) in PARTY_PCT_COLUMNS {
        for component in ["Packets", "Bytes", "TxPackets", "TxBytes", "RxPackets", "RxBytes"] {
            header.push(format!("{component}Pct{party}"));
        }
    }
    header
}

/// Writes the per-device party-class distribution view.
pub fn write_party_distribution(path: &Path, views: &[(String, DeviceViews)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(party_header("Device", None))?;
    for (device, view) in views {
        let mut record = vec![device.clone()];
        record.extend(counter_fields(&view.party.overall));
        for (_, party) in PARTY_PCT_COLUMNS {
            record.extend(share_fields(&view.party, party));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the local traffic view: one row per source/target device pair.
pub fn write_local_distribution(path: &Path, views: &[(String, DeviceViews)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["SourceDevice".to_string()];
    for component in ["Packets", "Bytes", "TxPackets", "TxBytes", "RxPackets", "RxBytes"] {
        header.push(format!("{component}Overall"));
    }
    header.push("TargetDevice".to_string());
    for component in ["Packets", "Bytes", "TxPackets", "TxBytes", "RxPackets", "RxBytes"] {
        header.push(format!("{component}ToTargetPct"));
    }
    writer.write_record(&header)?;

    for (device, view) in views {
        for (target, counters) in &view.local {
            let shares = counters.shares_of(&view.local_overall);
            let mut record = vec![device.clone()];
            record.extend(counter_fields(&view.local_overall));
            record.push(target.clone());
            record.extend([
                shares.packets.to_string(),
                shares.bytes.to_string(),
                shares.tx_packets.to_string(),
                shares.tx_bytes.to_string(),
                shares.rx_packets.to_string(),
                shares.rx_bytes.to_string(),
            ]);
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

const CATEGORY_ROW_ORDER: [TrafficCategory; 4] = [
    TrafficCategory::Management,
    TrafficCategory::Discovery,
    TrafficCategory::Encrypted,
    TrafficCategory::Unencrypted,
];

/// Writes the per-device per-category party-class view.
pub fn write_category_distribution(path: &Path, views: &[(String, DeviceViews)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(party_header("Device", Some("ProtocolType")))?;
    for (device, view) in views {
        for category in CATEGORY_ROW_ORDER {
            let Some(totals) = view.categories.get(&category) else {
                continue;
            };
            let mut record = vec![device.clone(), category.to_string()];
            record.extend(counter_fields(&totals.overall));
            for (_, party) in PARTY_PCT_COLUMNS {
                record.extend(share_fields(totals, party));
            }
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes the protocol usage summaries next to the input files, prefixed
/// with the directory name like the other batch artifacts.
pub fn write_usage_summary(dir: &Path, summary: &ProtocolSummary) -> Result<()> {
    let prefix = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("protocols")
        .to_string();

    let path = dir.join(format!("{prefix}-unique-protos-per-mac.csv"));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["MAC", "Type", "Network", "Transport", "Session", "Application"])?;
    for ((mac, scope), unique) in &summary.unique {
        writer.write_record([
            mac.clone(),
            scope.to_string(),
            unique.network.join(","),
            unique.transport.join(","),
            unique.session.join(","),
            unique.application.join(","),
        ])?;
    }
    writer.flush()?;

    // Purpose and Type stay blank for manual annotation.
    let path = dir.join(format!("{prefix}-unique-app-protos-overall.csv"));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["Proto", "Purpose", "Type"])?;
    for proto in &summary.application_overall {
        writer.write_record([proto.as_str(), "", ""])?;
    }
    writer.flush()?;

    let path = dir.join(format!("{prefix}-proto-distributions.csv"));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
        "MAC",
        "Type",
        "TotalCount",
        "DiscoveryCount",
        "DiscoveryPct",
        "ManagementCount",
        "ManagementPct",
        "EncryptedCount",
        "EncryptedPct",
        "NonEncryptedCount",
        "NonEncryptedPct",
        "UnknownCount",
        "UnknownPct",
    ])?;
    for ((mac, scope), counts) in &summary.distributions {
        let total = counts.total();
        let pct = |count: u64| {
            crate::analyser::containers::zero_protected_division(count, total).to_string()
        };
        writer.write_record([
            mac.clone(),
            scope.to_string(),
            total.to_string(),
            counts.discovery.to_string(),
            pct(counts.discovery),
            counts.management.to_string(),
            pct(counts.management),
            counts.encrypted.to_string(),
            pct(counts.encrypted),
            counts.unencrypted.to_string(),
            pct(counts.unencrypted),
            counts.unknown.to_string(),
            pct(counts.unknown),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one capture's collapsed endpoint rows.
pub fn write_merged_endpoints(path: &Path, records: &[EndpointRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "IP",
        "Hostnames",
        "Aggregated Hostname",
        "IP Geolocation",
        "Cert Geolocations",
        "Packets",
        "Bytes",
        "TxPackets",
        "TxBytes",
        "RxPackets",
        "RxBytes",
    ])?;
    for record in records {
        let mut row = vec![
            record.ips.join(";"),
            record.hostnames.join(";"),
            record.collapsed_hostname.clone(),
            record.ip_geo.to_string(),
            record.cert_geo.to_string(),
        ];
        row.extend(counter_fields(&record.counters));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the cross-capture endpoint list, with the contributing capture
/// names and the collapsed hostname tokenized base domain first so rows
/// can be filtered by operator.
pub fn write_overall_endpoints(path: &Path, records: &[EndpointRecord]) -> Result<()> {
    // The tokenized hostname trailer makes row lengths vary, so the
    // writer cannot enforce a fixed record length.
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    writer.write_record([
        "IPs",
        "Hostnames",
        "Aggregated Hostname",
        "IP Geolocation",
        "Cert Geolocations",
        "Packets",
        "Bytes",
        "TxPackets",
        "TxBytes",
        "RxPackets",
        "RxBytes",
        "Files",
    ])?;
    for record in records {
        let mut row = vec![
            record.ips.join(";"),
            record.hostnames.join(";"),
            record.collapsed_hostname.clone(),
            record.ip_geo.to_string(),
            record.cert_geo.to_string(),
        ];
        row.extend(counter_fields(&record.counters));
        row.push(record.files.join(";"));
        if record.collapsed_hostname != "None" {
            row.extend(endpoints::hostname_tokens(&record.collapsed_hostname));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Serializes any analysis artifact as formatted JSON.
pub fn data_as_json<T: Serialize>(data: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Writes a JSON artifact to disk.
pub fn data_to_file(json: String, path: &Path) -> Result<()> {
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::stats::{CategoryCounts, PartyTotals, UniqueProtocols};

    fn counters(packets: u64) -> TrafficCounters {
        TrafficCounters {
            packets,
            bytes: packets * 100,
            tx_packets: packets / 2,
            tx_bytes: packets * 40,
            rx_packets: packets - packets / 2,
            rx_bytes: packets * 60,
        }
    }

    fn endpoint_record(collapsed: &str) -> EndpointRecord {
        EndpointRecord {
            ips: vec!["104.16.1.1".to_string(), "104.16.1.2".to_string()],
            hostnames: vec!["cdn-a.vendor.example".to_string()],
            collapsed_hostname: collapsed.to_string(),
            ip_geo: Geolocation::Known("US".to_string()),
            cert_geo: Geolocation::Anycast,
            counters: counters(10),
            files: vec!["bulb-a".to_string(), "bulb-b".to_string()],
        }
    }

    fn party_totals(party: PartyClass, part: TrafficCounters) -> PartyTotals {
        let mut totals = PartyTotals::default();
        totals.add(party, part);
        totals
    }

    #[test]
    fn scope_is_recovered_from_file_names() {
        assert_eq!(scope_from_name("bulb-protocols.csv"), NetworkScope::All);
        assert_eq!(scope_from_name("bulb-protocols-LAN.csv"), NetworkScope::Lan);
        assert_eq!(scope_from_name("bulb-protocols-WAN.csv"), NetworkScope::Wan);
    }

    #[test]
    fn summary_files_are_not_reread_as_input() {
        for name in GENERATED_SUFFIXES {
            assert!(name.ends_with(".csv"));
        }
        assert!(GENERATED_SUFFIXES
            .iter()
            .any(|suffix| "captures-proto-distributions.csv".ends_with(suffix)));
    }

    #[test]
    fn overall_endpoint_rows_carry_the_hostname_token_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overall-endpoints.csv");
        let records = vec![
            endpoint_record("cdn.vendor.example"),
            endpoint_record("None"),
        ];
        write_overall_endpoints(&path, &records).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        let resolved = &rows[0];
        assert_eq!(resolved.len(), 14);
        assert_eq!(resolved.get(2), Some("cdn.vendor.example"));
        assert_eq!(resolved.get(11), Some("bulb-a;bulb-b"));
        assert_eq!(resolved.get(12), Some("vendor.example"));
        assert_eq!(resolved.get(13), Some("cdn"));

        // Unresolved hostnames keep the plain column set.
        assert_eq!(rows[1].len(), 12);
    }

    #[test]
    fn merged_endpoint_rows_join_addresses_and_print_geo_literals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulb-merged.csv");
        write_merged_endpoints(&path, &[endpoint_record("cdn.vendor.example")]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            &csv::StringRecord::from(vec![
                "IP",
                "Hostnames",
                "Aggregated Hostname",
                "IP Geolocation",
                "Cert Geolocations",
                "Packets",
                "Bytes",
                "TxPackets",
                "TxBytes",
                "RxPackets",
                "RxBytes",
            ])
        );
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(0), Some("104.16.1.1;104.16.1.2"));
        assert_eq!(row.get(3), Some("US"));
        assert_eq!(row.get(4), Some("Anycast"));
        assert_eq!(row.get(5), Some("10"));
    }

    #[test]
    fn device_metric_files_are_scoped_by_name_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            MetricRow {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                scope: NetworkScope::All,
                identity: ProtocolIdentity::named("https"),
                address: "104.16.1.1".to_string(),
                counters: counters(4),
            },
            MetricRow {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                scope: NetworkScope::Lan,
                identity: ProtocolIdentity::named("mdns"),
                address: "224.0.0.251".to_string(),
                counters: counters(2),
            },
        ];
        let path = write_device_metrics(dir.path(), "bulb", NetworkScope::Lan, &rows).unwrap();
        assert!(path.ends_with("bulb-protocols-LAN.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            &csv::StringRecord::from(METRIC_HEADER.to_vec())
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(1), Some("LAN"));
        assert_eq!(rows[0].get(2), Some("mdns"));
    }

    #[test]
    fn party_distribution_writes_overall_counters_and_share_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint_type_distribution.csv");
        let view = DeviceViews {
            party: party_totals(PartyClass::First, counters(8)),
            local: BTreeMap::new(),
            local_overall: TrafficCounters::ZERO,
            categories: BTreeMap::new(),
        };
        write_party_distribution(&path, &[("EchoDot".to_string(), view)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), 31);
        assert_eq!(header.get(0), Some("Device"));
        assert_eq!(header.get(1), Some("PacketsOverall"));
        assert_eq!(header.get(7), Some("PacketsPctFirst"));
        assert_eq!(header.get(30), Some("RxBytesPctLocal"));

        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.len(), 31);
        assert_eq!(row.get(0), Some("EchoDot"));
        assert_eq!(row.get(1), Some("8"));
        // All traffic is first party, so its shares are 1 and the rest 0.
        assert_eq!(row.get(7), Some("1"));
        assert_eq!(row.get(13), Some("0"));
    }

    #[test]
    fn local_distribution_writes_one_row_per_target_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_endpoint_distribution.csv");
        let mut local = BTreeMap::new();
        local.insert("Local-Hub".to_string(), counters(3));
        local.insert("Local-Plug".to_string(), counters(1));
        let mut overall = counters(3);
        overall += counters(1);
        let view = DeviceViews {
            party: PartyTotals::default(),
            local,
            local_overall: overall,
            categories: BTreeMap::new(),
        };
        write_local_distribution(&path, &[("EchoDot".to_string(), view)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.get(0), Some("SourceDevice"));
        assert_eq!(header.get(7), Some("TargetDevice"));
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(7), Some("Local-Hub"));
        assert_eq!(rows[0].get(8), Some("0.75"));
        assert_eq!(rows[1].get(7), Some("Local-Plug"));
        assert_eq!(rows[1].get(8), Some("0.25"));
    }

    #[test]
    fn category_rows_keep_the_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint_protocol_distribution.csv");
        let mut categories = BTreeMap::new();
        categories.insert(
            TrafficCategory::Encrypted,
            party_totals(PartyClass::Third, counters(6)),
        );
        categories.insert(
            TrafficCategory::Management,
            party_totals(PartyClass::First, counters(2)),
        );
        let view = DeviceViews {
            party: PartyTotals::default(),
            local: BTreeMap::new(),
            local_overall: TrafficCounters::ZERO,
            categories,
        };
        write_category_distribution(&path, &[("EchoDot".to_string(), view)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().get(1), Some("ProtocolType"));
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(1), Some("Management"));
        assert_eq!(rows[1].get(1), Some("Encrypted"));
        // Shares land under the matching party column.
        assert_eq!(rows[0].get(8), Some("1"));
        assert_eq!(rows[1].get(20), Some("1"));
    }

    #[test]
    fn usage_summary_emits_the_three_batch_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("captures");
        fs::create_dir_all(&batch).unwrap();

        let mut summary = ProtocolSummary::default();
        let key = ("aa:bb:cc:dd:ee:ff".to_string(), NetworkScope::Wan);
        summary.unique.insert(
            key.clone(),
            UniqueProtocols {
                network: vec!["ip".to_string()],
                transport: vec!["tcp".to_string()],
                session: vec!["tls".to_string()],
                application: vec!["https".to_string(), "ntp".to_string()],
            },
        );
        summary.application_overall = vec!["https".to_string(), "ntp".to_string()];
        summary.distributions.insert(
            key,
            CategoryCounts {
                discovery: 0,
                management: 1,
                encrypted: 3,
                unencrypted: 0,
                unknown: 0,
            },
        );
        write_usage_summary(&batch, &summary).unwrap();

        let mut reader =
            csv::Reader::from_path(batch.join("captures-unique-protos-per-mac.csv")).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(0), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(row.get(1), Some("WAN"));
        assert_eq!(row.get(5), Some("https,ntp"));

        let mut reader =
            csv::Reader::from_path(batch.join("captures-unique-app-protos-overall.csv")).unwrap();
        let protos: Vec<String> = reader
            .records()
            .map(|r| r.unwrap().get(0).unwrap_or_default().to_string())
            .collect();
        assert_eq!(protos, ["https", "ntp"]);

        let mut reader =
            csv::Reader::from_path(batch.join("captures-proto-distributions.csv")).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(2), Some("4"));
        assert_eq!(row.get(6), Some("0.25"));
        assert_eq!(row.get(7), Some("3"));
        assert_eq!(row.get(8), Some("0.75"));
    }
}
