use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::ops::AddAssign;

/// One root-to-node protocol path from the hierarchy report, e.g. ["eth", "ip", "tcp", "tls"].
pub type ProtocolChain = Vec<String>;

/// Transport protocol of a conversation, as queried from the capture tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// LAN vs WAN classification of a flow, plus the unscoped view used for totals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NetworkScope {
    All,
    Lan,
    Wan,
}

impl fmt::Display for NetworkScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetworkScope::All => write!(f, "ALL"),
            NetworkScope::Lan => write!(f, "LAN"),
            NetworkScope::Wan => write!(f, "WAN"),
        }
    }
}

/// Canonical key for a classified protocol.
///
/// Either a well-known name ("https") or a synthesized "{transport}:{port}"
/// string ("udp:1982") produced by resolution. Two identities are equal iff
/// their string forms are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProtocolIdentity(String);

impl ProtocolIdentity {
    pub fn named(name: &str) -> Self {
        ProtocolIdentity(name.to_string())
    }

    pub fn from_port(transport: Transport, port: u16) -> Self {
        ProtocolIdentity(format!("{transport}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol names bucketed by layer, plus anything the layer tables didn't recognize.
///
/// Each sequence is ordered (document order) and duplicate-free; a name
/// appears in at most one of the five collections.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LayeredProtocols {
    pub network: Vec<String>,
    pub transport: Vec<String>,
    pub session: Vec<String>,
    pub application: Vec<ProtocolIdentity>,
    pub unknown: Vec<String>,
}

impl LayeredProtocols {
    /// All identities downstream stages gather metrics for, in layer order.
    pub fn all_identities(&self) -> Vec<ProtocolIdentity> {
        let mut out: Vec<ProtocolIdentity> = Vec::new();
        for name in self
            .network
            .iter()
            .chain(self.transport.iter())
            .chain(self.session.iter())
        {
            out.push(ProtocolIdentity::named(name));
        }
        out.extend(self.application.iter().cloned());
        out
    }
}

/// One src/dst pair pulled from a conversation table. Only used inside the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationEndpoint {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub transport: Transport,
    pub scope: NetworkScope,
}

impl ConversationEndpoint {
    /// True when the destination is a group address (multicast or
    /// broadcast), meaning the destination port is authoritative.
    ///
    /// Home capture networks are /24, so a 255 host octet is a directed
    /// broadcast and not a regular host.
    pub fn dst_is_group(&self) -> bool {
        match self.dst_ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                v4.is_multicast() || v4.is_broadcast() || v4.octets()[3] == 255
            }
            Ok(IpAddr::V6(v6)) => v6.is_multicast(),
            Err(_) => false,
        }
    }
}

/// The six-tuple every aggregation step accumulates.
///
/// Component-wise addition with the all-zero tuple as identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub packets: u64,
    pub bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

impl TrafficCounters {
    pub const ZERO: TrafficCounters = TrafficCounters {
        packets: 0,
        bytes: 0,
        tx_packets: 0,
        tx_bytes: 0,
        rx_packets: 0,
        rx_bytes: 0,
    };

    /// Per-component share of `self` within `overall`. A zero denominator
    /// yields a zero share for that component, never an error or NaN.
    pub fn shares_of(&self, overall: &TrafficCounters) -> CounterShares {
        CounterShares {
            packets: zero_protected_division(self.packets, overall.packets),
            bytes: zero_protected_division(self.bytes, overall.bytes),
            tx_packets: zero_protected_division(self.tx_packets, overall.tx_packets),
            tx_bytes: zero_protected_division(self.tx_bytes, overall.tx_bytes),
            rx_packets: zero_protected_division(self.rx_packets, overall.rx_packets),
            rx_bytes: zero_protected_division(self.rx_bytes, overall.rx_bytes),
        }
    }
}

impl AddAssign for TrafficCounters {
    fn add_assign(&mut self, other: TrafficCounters) {
        self.packets += other.packets;
        self.bytes += other.bytes;
        self.tx_packets += other.tx_packets;
        self.tx_bytes += other.tx_bytes;
        self.rx_packets += other.rx_packets;
        self.rx_bytes += other.rx_bytes;
    }
}

/// Percentage distribution matching a [TrafficCounters], one share per component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CounterShares {
    pub packets: f64,
    pub bytes: f64,
    pub tx_packets: f64,
    pub tx_bytes: f64,
    pub rx_packets: f64,
    pub rx_bytes: f64,
}

pub fn zero_protected_division(num: u64, div: u64) -> f64 {
    if div == 0 {
        0.0
    } else {
        num as f64 / div as f64
    }
}

/// Semantic traffic category a protocol identity maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TrafficCategory {
    Discovery,
    Management,
    Encrypted,
    Unencrypted,
    Unknown,
}

impl fmt::Display for TrafficCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Relationship of a traffic endpoint to the device vendor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PartyClass {
    First,
    Support,
    Third,
    Local,
}

impl fmt::Display for PartyClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl PartyClass {
    /// Classifies an endpoint-type label from the endpoint inventory.
    ///
    /// Local endpoints carry extra characters in the label to disambiguate
    /// the specific device ("Local-EchoDot"), so a substring check is used.
    pub fn from_label(label: &str) -> Option<PartyClass> {
        match label {
            "First" => Some(PartyClass::First),
            "Support" => Some(PartyClass::Support),
            "Third" => Some(PartyClass::Third),
            _ if label.contains("Local") => Some(PartyClass::Local),
            _ => None,
        }
    }
}

/// Geolocation state of a hostname, with the sticky conflict marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Geolocation {
    Unknown,
    Known(String),
    Anycast,
}

impl Geolocation {
    /// Parses the CSV literal form ("None" marks an unknown location).
    pub fn from_field(field: &str) -> Geolocation {
        match field {
            "None" | "" => Geolocation::Unknown,
            "Anycast" => Geolocation::Anycast,
            value => Geolocation::Known(value.to_string()),
        }
    }

    /// Folds one more observation into the stored state.
    ///
    /// A known value fills in an unknown one; two different known values
    /// conflict and degrade to Anycast. Anycast never reverts.
    pub fn observe(&mut self, incoming: &Geolocation) {
        match (&*self, incoming) {
            (Geolocation::Anycast, _) => {}
            (_, Geolocation::Unknown) => {}
            (Geolocation::Unknown, known) => *self = known.clone(),
            (Geolocation::Known(stored), Geolocation::Known(new)) if stored != new => {
                *self = Geolocation::Anycast;
            }
            _ => {}
        }
    }
}

impl fmt::Display for Geolocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Geolocation::Unknown => write!(f, "None"),
            Geolocation::Known(value) => write!(f, "{value}"),
            Geolocation::Anycast => write!(f, "Anycast"),
        }
    }
}

/// One endpoint row in the collapser, potentially merged from several raw rows.
#[derive(Clone, Debug, Serialize)]
pub struct EndpointRecord {
    pub ips: Vec<String>,
    pub hostnames: Vec<String>,
    /// Normalized hostname used as the merge key; "None" when unresolved.
    pub collapsed_hostname: String,
    pub ip_geo: Geolocation,
    pub cert_geo: Geolocation,
    pub counters: TrafficCounters,
    pub files: Vec<String>,
}
