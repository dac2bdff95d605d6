//! Traffic categorization and the aggregation views built on top of it.
//!
//! Counters accumulate by component-wise addition under typed keys; every
//! view's percentage distribution divides each of the six components by
//! its own Overall total, zero-protected.

use super::containers::{
    CounterShares, NetworkScope, PartyClass, ProtocolIdentity, TrafficCategory, TrafficCounters,
};
use super::tables::ClassificationTables;
use serde::Serialize;
use std::collections::BTreeMap;

/// Protocol layer of a classified name, for the unique-protocol summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Network,
    Transport,
    Session,
    Application,
}

/// Names outside the three lower-layer tables are application protocols:
/// resolved identities are port-derived and never appear in those tables.
pub fn layer_of(name: &str, tables: &ClassificationTables) -> Layer {
    if tables.network.contains(&name) {
        Layer::Network
    } else if tables.transport.contains(&name) {
        Layer::Transport
    } else if tables.session.contains(&name) {
        Layer::Session
    } else {
        Layer::Application
    }
}

/// Maps an identity to its semantic category. The four tables are
/// disjoint, so at most one can match; no match is `Unknown` and the
/// caller is expected to log it with its owning device and endpoint.
pub fn categorize(identity: &ProtocolIdentity, tables: &ClassificationTables) -> TrafficCategory {
    let name = identity.as_str();
    if tables.discovery.contains(&name) {
        TrafficCategory::Discovery
    } else if tables.management.contains(&name) {
        TrafficCategory::Management
    } else if tables.encrypted.contains(&name) {
        TrafficCategory::Encrypted
    } else if tables.unencrypted.contains(&name) {
        TrafficCategory::Unencrypted
    } else {
        TrafficCategory::Unknown
    }
}

/// Running totals for one view row: one slot per party class plus the
/// Overall slot every observation also lands in.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PartyTotals {
    pub overall: TrafficCounters,
    pub first: TrafficCounters,
    pub support: TrafficCounters,
    pub third: TrafficCounters,
    pub local: TrafficCounters,
}

impl PartyTotals {
    pub fn add(&mut self, party: PartyClass, counters: TrafficCounters) {
        match party {
            PartyClass::First => self.first += counters,
            PartyClass::Support => self.support += counters,
            PartyClass::Third => self.third += counters,
            PartyClass::Local => self.local += counters,
        }
        self.overall += counters;
    }

    pub fn shares(&self, party: PartyClass) -> CounterShares {
        let slot = match party {
            PartyClass::First => &self.first,
            PartyClass::Support => &self.support,
            PartyClass::Third => &self.third,
            PartyClass::Local => &self.local,
        };
        slot.shares_of(&self.overall)
    }
}

/// One endpoint of a device, as read from its endpoint inventory:
/// the raw endpoint-type label plus accumulated counters.
#[derive(Clone, Debug)]
pub struct DeviceEndpoint {
    pub address: String,
    pub type_label: String,
    pub counters: TrafficCounters,
}

/// Everything known about one device going into the aggregation step.
#[derive(Clone, Debug, Default)]
pub struct DeviceData {
    pub name: String,
    pub endpoints: Vec<DeviceEndpoint>,
    /// Per-endpoint application protocols and their counters.
    pub protocols: BTreeMap<String, BTreeMap<ProtocolIdentity, TrafficCounters>>,
}

/// The three aggregation views for one device.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceViews {
    /// (i) Traffic to each party class.
    pub party: PartyTotals,
    /// (ii) Local-only traffic, attributed to the specific target device
    /// label rather than the collapsed Local class.
    pub local: BTreeMap<String, TrafficCounters>,
    pub local_overall: TrafficCounters,
    /// (iii) Traffic per category per party class.
    pub categories: BTreeMap<TrafficCategory, PartyTotals>,
}

const VIEW_CATEGORIES: [TrafficCategory; 4] = [
    TrafficCategory::Management,
    TrafficCategory::Discovery,
    TrafficCategory::Encrypted,
    TrafficCategory::Unencrypted,
];

/// Builds all three views from one device's endpoint and protocol data.
///
/// Endpoints with an unrecognized type label are warned about and skipped
/// without touching any totals. Protocols mapping to no category are
/// logged with full context and excluded from the category view.
pub fn compute_device_views(device: &DeviceData, tables: &ClassificationTables) -> DeviceViews {
    let mut views = DeviceViews::default();
    for category in VIEW_CATEGORIES {
        views.categories.insert(category, PartyTotals::default());
    }

    for endpoint in &device.endpoints {
        let Some(party) = PartyClass::from_label(&endpoint.type_label) else {
            log::warn!(
                "Unknown endpoint type {} for {}",
                endpoint.type_label,
                device.name
            );
            continue;
        };

        views.party.add(party, endpoint.counters);

        if party == PartyClass::Local {
            // Keyed by the full label so traffic attributes to the
            // specific local target device.
            *views
                .local
                .entry(endpoint.type_label.clone())
                .or_insert(TrafficCounters::ZERO) += endpoint.counters;
            views.local_overall += endpoint.counters;
        }

        let Some(protocols) = device.protocols.get(&endpoint.address) else {
            log::warn!(
                "Endpoint {} not found in mapped protocol data for {}",
                endpoint.address,
                device.name
            );
            continue;
        };

        for identity in protocols.keys() {
            let category = categorize(identity, tables);
            if category == TrafficCategory::Unknown {
                log::warn!(
                    "Unknown protocol {} in endpoint {} of {}",
                    identity,
                    endpoint.address,
                    device.name
                );
                continue;
            }

            if let Some(totals) = views.categories.get_mut(&category) {
                totals.add(party, endpoint.counters);
            }
        }
    }

    views
}

/// One row of a per-capture protocols CSV read back for summarization.
#[derive(Clone, Debug)]
pub struct UsageRow {
    pub mac: String,
    pub scope: NetworkScope,
    pub identity: ProtocolIdentity,
    pub counters: TrafficCounters,
}

/// Unique protocols seen for one MAC within one scope, split by layer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UniqueProtocols {
    pub network: Vec<String>,
    pub transport: Vec<String>,
    pub session: Vec<String>,
    pub application: Vec<String>,
}

/// Per-category packet counts for one MAC within one scope.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CategoryCounts {
    pub discovery: u64,
    pub management: u64,
    pub encrypted: u64,
    pub unencrypted: u64,
    /// Accumulates identities outside every category table; should stay 0
    /// and doubles as a consistency check on the tables.
    pub unknown: u64,
}

impl CategoryCounts {
    pub fn total(&self) -> u64 {
        self.discovery + self.management + self.encrypted + self.unencrypted + self.unknown
    }

    fn add(&mut self, category: TrafficCategory, packets: u64) {
        match category {
            TrafficCategory::Discovery => self.discovery += packets,
            TrafficCategory::Management => self.management += packets,
            TrafficCategory::Encrypted => self.encrypted += packets,
            TrafficCategory::Unencrypted => self.unencrypted += packets,
            TrafficCategory::Unknown => self.unknown += packets,
        }
    }
}

/// Summaries over every usage row of a result set.
#[derive(Clone, Debug, Default)]
pub struct ProtocolSummary {
    /// (mac, scope) -> unique protocols by layer, insertion-ordered.
    pub unique: BTreeMap<(String, NetworkScope), UniqueProtocols>,
    /// All application identities observed anywhere, sorted.
    pub application_overall: Vec<String>,
    /// (mac, scope) -> per-category packet counts.
    pub distributions: BTreeMap<(String, NetworkScope), CategoryCounts>,
}

/// Folds usage rows into the per-MAC summaries and category packet
/// distributions. Only application-layer rows count toward categories.
pub fn summarize_usage(rows: &[UsageRow], tables: &ClassificationTables) -> ProtocolSummary {
    let mut summary = ProtocolSummary::default();

    for row in rows {
        let key = (row.mac.clone(), row.scope);
        let name = row.identity.as_str();
        let layer = layer_of(name, tables);

        let unique = summary.unique.entry(key.clone()).or_default();
        let list = match layer {
            Layer::Network => &mut unique.network,
            Layer::Transport => &mut unique.transport,
            Layer::Session => &mut unique.session,
            Layer::Application => &mut unique.application,
        };
        if !list.iter().any(|existing| existing == name) {
            list.push(name.to_string());
        }

        if layer == Layer::Application {
            let category = categorize(&row.identity, tables);
            if category == TrafficCategory::Unknown {
                log::warn!("Uncategorized protocol {} for {}", row.identity, row.mac);
            }
            summary
                .distributions
                .entry(key)
                .or_default()
                .add(category, row.counters.packets);

            if !summary
                .application_overall
                .iter()
                .any(|existing| existing == name)
            {
                summary.application_overall.push(name.to_string());
            }
        }
    }

    summary.application_overall.sort();
    summary
}
