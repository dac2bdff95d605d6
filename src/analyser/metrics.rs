//! Gathers per-device, per-protocol endpoint traffic metrics.
//!
//! For every analyzed MAC and every classified protocol identity we fetch
//! the endpoint statistics table three times (unscoped, LAN-only,
//! WAN-only) and record the six-tuple counters against each remote
//! endpoint. A failed fetch loses only that one protocol/scope slice.

use super::containers::{LayeredProtocols, NetworkScope, ProtocolIdentity, TrafficCounters};
use super::tshark::{device_filter, CaptureSource};
use serde::Serialize;
use std::net::IpAddr;

/// One aggregated observation: traffic of one protocol between one device
/// and one remote endpoint, within one scope.
#[derive(Clone, Debug, Serialize)]
pub struct MetricRow {
    pub mac: String,
    pub scope: NetworkScope,
    pub identity: ProtocolIdentity,
    pub address: String,
    pub counters: TrafficCounters,
}

/// Collects metric rows for every MAC/protocol/scope combination.
pub fn extract_device_metrics(
    source: &dyn CaptureSource,
    layered: &LayeredProtocols,
    macs: &[String],
) -> Vec<MetricRow> {
    let identities = layered.all_identities();
    let mut rows: Vec<MetricRow> = Vec::new();

    for mac in macs {
        log::info!("Gathering protocol metrics for {mac}");

        for identity in &identities {
            for scope in [NetworkScope::All, NetworkScope::Lan, NetworkScope::Wan] {
                let filter = device_filter(identity.as_str(), mac, scope);

                let stats = match source.endpoint_stats(&filter) {
                    Ok(stats) => stats,
                    Err(err) => {
                        log::error!("Cannot process {scope} metrics for {mac}/{identity}: {err}");
                        continue;
                    }
                };

                // The first row is the device's own address; the device is
                // party to every matched packet, so it always sorts first.
                let mut endpoints: Vec<_> = stats.into_iter().skip(1).collect();
                endpoints.sort_by(|a, b| ip_sort_key(&a.address).cmp(&ip_sort_key(&b.address)));

                for stat in endpoints {
                    rows.push(MetricRow {
                        mac: mac.clone(),
                        scope,
                        identity: identity.clone(),
                        address: stat.address,
                        counters: stat.counters,
                    });
                }
            }
        }
    }

    rows
}

/// Numeric ordering for addresses that parse, lexicographic for the rest.
fn ip_sort_key(address: &str) -> (u8, u128, String) {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => (0, u32::from(v4) as u128, String::new()),
        Ok(IpAddr::V6(v6)) => (0, u128::from(v6), String::new()),
        Err(_) => (1, 0, address.to_string()),
    }
}
