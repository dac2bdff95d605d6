//! Static protocol membership tables driving classification and resolution.
//!
//! The tables are plain data passed by reference into the classifier and
//! resolver so tests can substitute fixture tables; [`DEFAULT_TABLES`]
//! carries the well-known names and ports observed across the smart-home
//! capture corpus.

use lazy_static::lazy_static;

/// Membership lists for layer bucketing, category mapping and UDP port
/// disambiguation.
#[derive(Clone, Debug)]
pub struct ClassificationTables {
    pub network: Vec<&'static str>,
    pub transport: Vec<&'static str>,
    pub session: Vec<&'static str>,
    pub application: Vec<&'static str>,

    pub discovery: Vec<&'static str>,
    pub management: Vec<&'static str>,
    pub encrypted: Vec<&'static str>,
    pub unencrypted: Vec<&'static str>,

    /// UDP ports taken as authoritative when one side of an otherwise
    /// ambiguous unicast conversation matches.
    pub known_udp_ports: Vec<u16>,
}

impl ClassificationTables {
    pub fn is_application(&self, name: &str) -> bool {
        self.application.contains(&name)
    }
}

lazy_static! {
    pub static ref DEFAULT_TABLES: ClassificationTables = ClassificationTables {
        network: vec!["ip", "ipv6"],
        transport: vec!["tcp", "udp", "igmp"],
        session: vec!["tls"],
        application: vec![
            "http",
            "https",
            "ssdp",
            "mdns",
            "llmnr",
            "ntp",
            "tplink-smarthome",
            "mqtt",
            "secure-mqtt",
            "classicstun",
            "stun",
            "ajp13",
            "quic",
        ],
        discovery: vec![
            "mdns",
            "ssdp",
            "tplink-smarthome",
            "udp:1982",
            "udp:50000",
            "udp:6667",
            "llmnr",
        ],
        management: vec!["classicstun", "ntp", "stun", "udp:55444"],
        encrypted: vec![
            "https",
            "quic",
            "secure-mqtt",
            "tcp:10005",
            "tcp:10101",
            "tcp:50443",
            "tcp:5228",
            "tcp:55443",
            "tcp:8012",
            "tcp:8883",
            "tcp:8886",
            "tcp:9000",
            "tcp:9543",
        ],
        unencrypted: vec![
            "http",
            "udp:1111",
            "udp:10101",
            "udp:56700",
            "udp:58866",
            "udp:8555",
            "udp:9478",
            "udp:9700",
        ],
        known_udp_ports: vec![53, 123, 1900, 5353, 5355],
    };
}

#[cfg(test)]
pub fn fixture_tables() -> ClassificationTables {
    ClassificationTables {
        network: vec!["ip", "ipv6"],
        transport: vec!["tcp", "udp", "igmp"],
        session: vec!["tls"],
        application: vec!["http", "https", "ssdp", "mdns", "ntp", "mqtt"],
        discovery: vec!["mdns", "ssdp", "udp:1982"],
        management: vec!["ntp"],
        encrypted: vec!["https", "secure-mqtt"],
        unencrypted: vec!["http", "udp:56700"],
        known_udp_ports: vec![8888],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_category_tables_are_disjoint() {
        let t = &*DEFAULT_TABLES;
        let lists = [&t.discovery, &t.management, &t.encrypted, &t.unencrypted];
        for (i, a) in lists.iter().enumerate() {
            for b in lists.iter().skip(i + 1) {
                for name in a.iter() {
                    assert!(!b.contains(name), "{name} appears in two category tables");
                }
            }
        }
    }

    #[test]
    fn default_layer_tables_are_disjoint() {
        let t = &*DEFAULT_TABLES;
        let lists = [&t.network, &t.transport, &t.session, &t.application];
        for (i, a) in lists.iter().enumerate() {
            for b in lists.iter().skip(i + 1) {
                for name in a.iter() {
                    assert!(!b.contains(name), "{name} appears in two layer tables");
                }
            }
        }
    }
}
