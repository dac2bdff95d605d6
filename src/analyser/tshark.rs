//! Interface to the external packet-inspection tool (tshark).
//!
//! Everything the pipeline needs from a capture comes through the
//! [`CaptureSource`] trait: the protocol hierarchy report, conversation
//! tables and endpoint statistics tables. [`TsharkSource`] implements it by
//! running tshark as a bounded subprocess and parsing the `-z` statistics
//! text; tests substitute fixture implementations instead.

use super::containers::{ConversationEndpoint, NetworkScope, TrafficCounters, Transport};
use super::error::{AnalysisError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Display filter matching local-premises traffic: multicast/broadcast via
/// the link-layer IG bit, or private-range src and dst.
pub const LAN_FILTER: &str = "(eth.dst.ig == 1 || ((ip.src == 10.0.0.0/8 || ip.src == 172.16.0.0/12 || ip.src == 192.168.0.0/16) && (ip.dst == 10.0.0.0/8 || ip.dst == 172.16.0.0/12 || ip.dst == 192.168.0.0/16 || ipv6.dst == ff00::/8 || ipv6.dst == fe80::/10)))";

/// The complement of [LAN_FILTER].
pub const WAN_FILTER: &str = "(eth.dst.ig == 0 && !((ip.src == 10.0.0.0/8 || ip.src == 172.16.0.0/12 || ip.src == 192.168.0.0/16) && (ip.dst == 10.0.0.0/8 || ip.dst == 172.16.0.0/12 || ip.dst == 192.168.0.0/16 || ipv6.dst == ff00::/8 || ipv6.dst == fe80::/10)))";

/// One row of an endpoint statistics table, from the analyzed device's
/// perspective.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointStat {
    pub address: String,
    pub counters: TrafficCounters,
}

/// Abstract collaborator contract for one capture file.
pub trait CaptureSource {
    /// The indentation-structured protocol usage tree, already stripped of
    /// header/footer noise (first line is the link-layer root).
    fn protocol_hierarchy(&self) -> Result<Vec<String>>;

    /// All conversations matching a protocol name for one transport and scope.
    fn conversations(
        &self,
        transport: Transport,
        proto: &str,
        scope: NetworkScope,
    ) -> Result<Vec<ConversationEndpoint>>;

    /// Per-endpoint traffic counters for an arbitrary display filter.
    fn endpoint_stats(&self, filter: &str) -> Result<Vec<EndpointStat>>;
}

/// [`CaptureSource`] backed by tshark subprocess invocations.
pub struct TsharkSource {
    capture: PathBuf,
}

impl TsharkSource {
    pub fn new(capture: &Path) -> Self {
        TsharkSource {
            capture: capture.to_path_buf(),
        }
    }

    /// Runs tshark with the given arguments, returning stdout on success.
    fn run(&self, args: &[&str]) -> Result<String> {
        log::debug!("Running tshark {}", args.join(" "));
        let output = Command::new("tshark").args(args).output()?;

        if !output.status.success() {
            return Err(AnalysisError::ToolInvocation {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl CaptureSource for TsharkSource {
    fn protocol_hierarchy(&self) -> Result<Vec<String>> {
        let capture = self.capture.to_string_lossy().into_owned();
        let stdout = self.run(&["-Nt", "-qr", &capture, "-z", "io,phs"])?;
        trim_phs_report(&stdout)
    }

    fn conversations(
        &self,
        transport: Transport,
        proto: &str,
        scope: NetworkScope,
    ) -> Result<Vec<ConversationEndpoint>> {
        let capture = self.capture.to_string_lossy().into_owned();
        let scope_filter = match scope {
            NetworkScope::Lan => LAN_FILTER,
            NetworkScope::Wan => WAN_FILTER,
            NetworkScope::All => "",
        };

        let query = if scope_filter.is_empty() {
            format!("conv,{transport},{proto}")
        } else {
            format!("conv,{transport},{proto} && {scope_filter}")
        };

        let stdout = self.run(&["-nqr", &capture, "-z", &query])?;
        parse_conversation_table(&stdout, transport, scope)
    }

    fn endpoint_stats(&self, filter: &str) -> Result<Vec<EndpointStat>> {
        let capture = self.capture.to_string_lossy().into_owned();
        let query = format!("endpoints,ipv6,{filter}");
        let stdout = self.run(&["-qr", &capture, "-z", &query])?;
        parse_endpoint_table(&stdout)
    }
}

/// Strips the junk tshark prints around the `io,phs` tree.
///
/// Everything before the first line starting with "eth" is preamble; the
/// final separator line is dropped.
pub fn trim_phs_report(stdout: &str) -> Result<Vec<String>> {
    let lines: Vec<&str> = stdout.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.trim_start().starts_with("eth"))
        .ok_or_else(|| {
            AnalysisError::MalformedReport("no eth root in protocol hierarchy".to_string())
        })?;

    let mut trimmed: Vec<String> = lines[start..].iter().map(|l| l.to_string()).collect();
    trimmed.pop();
    Ok(trimmed)
}

/// Parses one `conv,{tcp|udp}` statistics table.
///
/// Data rows are the ones containing the "<->" marker; header and footer
/// lines never do.
pub fn parse_conversation_table(
    stdout: &str,
    transport: Transport,
    scope: NetworkScope,
) -> Result<Vec<ConversationEndpoint>> {
    let mut conversations = Vec::new();

    for line in stdout.lines() {
        if !line.contains("<->") {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || tokens[1] != "<->" {
            return Err(AnalysisError::MalformedReport(format!(
                "unexpected conversation row: {line}"
            )));
        }

        let (src_ip, src_port) = split_host_port(tokens[0])?;
        let (dst_ip, dst_port) = split_host_port(tokens[2])?;

        conversations.push(ConversationEndpoint {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            transport,
            scope,
        });
    }

    Ok(conversations)
}

/// Splits "addr:port", taking the segment after the last colon as the port
/// so bracketless IPv6 addresses survive.
fn split_host_port(field: &str) -> Result<(String, u16)> {
    let (host, port) = field.rsplit_once(':').ok_or_else(|| {
        AnalysisError::MalformedReport(format!("address without port: {field}"))
    })?;
    let port = port.parse::<u16>().map_err(|_| {
        AnalysisError::MalformedReport(format!("unparsable port in: {field}"))
    })?;
    Ok((host.to_string(), port))
}

/// Parses an `endpoints,ipv6` statistics table.
///
/// The tshark columns are Packets/Bytes/TxPackets/TxBytes/RxPackets/RxBytes
/// from the *endpoint's* perspective; we record from the analyzed device's
/// perspective, so Tx and Rx flip.
pub fn parse_endpoint_table(stdout: &str) -> Result<Vec<EndpointStat>> {
    let mut stats = Vec::new();

    for line in stdout.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 7 {
            continue;
        }

        // Header and separator lines never have six numeric columns.
        let numbers: Option<Vec<u64>> = tokens[1..7]
            .iter()
            .map(|t| t.parse::<u64>().ok())
            .collect();

        let Some(numbers) = numbers else {
            continue;
        };

        stats.push(EndpointStat {
            address: tokens[0].to_string(),
            counters: TrafficCounters {
                packets: numbers[0],
                bytes: numbers[1],
                rx_packets: numbers[2],
                rx_bytes: numbers[3],
                tx_packets: numbers[4],
                tx_bytes: numbers[5],
            },
        });
    }

    Ok(stats)
}

/// Builds the display filter selecting one protocol identity's traffic.
///
/// tshark names some protocols it cannot filter on directly (it reports
/// "https" but rejects an `https` filter), and resolved identities are
/// port-derived, so both map to port filters instead.
pub fn identity_filter(identity: &str) -> String {
    if let Some(port) = identity.strip_prefix("tcp:") {
        format!("tcp.port == {port}")
    } else if let Some(port) = identity.strip_prefix("udp:") {
        format!("udp.port == {port}")
    } else if identity.chars().all(|c| c.is_ascii_digit()) {
        format!("(tcp.port == {identity} || udp.port == {identity})")
    } else if identity == "https" {
        "tcp.port == 443".to_string()
    } else if identity == "secure-mqtt" {
        "tcp.port == 8883".to_string()
    } else {
        identity.to_string()
    }
}

/// Scope-restricted variant of [identity_filter], bound to one device MAC.
pub fn device_filter(identity: &str, mac: &str, scope: NetworkScope) -> String {
    let base = identity_filter(identity);
    match scope {
        NetworkScope::All => format!("{base} && eth.addr == {mac}"),
        NetworkScope::Lan => format!("{base} && {LAN_FILTER} && eth.addr == {mac}"),
        NetworkScope::Wan => format!("{base} && {WAN_FILTER} && eth.addr == {mac}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHS_REPORT: &str = "\
===================================================================
Protocol Hierarchy Statistics
Filter:

eth                                      frames:100 bytes:10000
  ip                                     frames:90 bytes:9000
    tcp                                  frames:60 bytes:6000
      tls                                frames:30 bytes:3000
    udp                                  frames:30 bytes:3000
      mdns                               frames:10 bytes:1000
===================================================================";

    #[test]
    fn phs_trimming_keeps_tree_only() {
        let lines = trim_phs_report(PHS_REPORT).unwrap();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("eth"));
        assert!(lines[5].trim_start().starts_with("mdns"));
    }

    #[test]
    fn phs_without_eth_root_is_malformed() {
        let err = trim_phs_report("no tree here\n").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedReport(_)));
    }

    const CONV_TABLE: &str = "\
================================================================================
UDP Conversations
Filter:estamp && (eth.dst.ig == 1)
                                               |       <-      | |       ->      |
                           |     Frames  Bytes | | Frames  Bytes |
192.168.1.37:1982  <->  192.168.1.236:54321        4    600       3    400
================================================================================";

    #[test]
    fn conversation_rows_are_parsed() {
        let convs =
            parse_conversation_table(CONV_TABLE, Transport::Udp, NetworkScope::Lan).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].src_ip, "192.168.1.37");
        assert_eq!(convs[0].src_port, 1982);
        assert_eq!(convs[0].dst_ip, "192.168.1.236");
        assert_eq!(convs[0].dst_port, 54321);
        assert_eq!(convs[0].scope, NetworkScope::Lan);
    }

    #[test]
    fn ipv6_conversation_addresses_split_on_last_colon() {
        let table = "fe80::1:5353  <->  ff02::fb:5353   2 200  0 0\n";
        let convs = parse_conversation_table(table, Transport::Udp, NetworkScope::Lan).unwrap();
        assert_eq!(convs[0].src_ip, "fe80::1");
        assert_eq!(convs[0].dst_ip, "ff02::fb");
        assert_eq!(convs[0].dst_port, 5353);
    }

    const ENDPOINT_TABLE: &str = "\
================================================================================
IPv6 Endpoints
Filter:tcp.port == 443 && eth.addr == aa:bb:cc:dd:ee:ff
                       |  Packets  | |  Bytes  | | Tx Packets | | Tx Bytes | | Rx Packets | | Rx Bytes |
192.168.1.37                 100      20000          60            12000         40             8000
52.94.233.129                 80      16000          50            10000         30             6000
================================================================================";

    #[test]
    fn endpoint_rows_flip_tx_and_rx_to_device_perspective() {
        let stats = parse_endpoint_table(ENDPOINT_TABLE).unwrap();
        assert_eq!(stats.len(), 2);
        let remote = &stats[1];
        assert_eq!(remote.address, "52.94.233.129");
        assert_eq!(remote.counters.packets, 80);
        assert_eq!(remote.counters.bytes, 16000);
        // 50 packets transmitted by the endpoint were received by the device.
        assert_eq!(remote.counters.rx_packets, 50);
        assert_eq!(remote.counters.rx_bytes, 10000);
        assert_eq!(remote.counters.tx_packets, 30);
        assert_eq!(remote.counters.tx_bytes, 6000);
    }

    #[test]
    fn identity_filters_cover_port_forms() {
        assert_eq!(identity_filter("tcp:8012"), "tcp.port == 8012");
        assert_eq!(identity_filter("udp:1982"), "udp.port == 1982");
        assert_eq!(
            identity_filter("9000"),
            "(tcp.port == 9000 || udp.port == 9000)"
        );
        assert_eq!(identity_filter("https"), "tcp.port == 443");
        assert_eq!(identity_filter("secure-mqtt"), "tcp.port == 8883");
        assert_eq!(identity_filter("mdns"), "mdns");
    }

    #[test]
    fn device_filter_binds_scope_and_mac() {
        let filter = device_filter("mdns", "aa:bb:cc:dd:ee:ff", NetworkScope::All);
        assert_eq!(filter, "mdns && eth.addr == aa:bb:cc:dd:ee:ff");

        let lan = device_filter("mdns", "aa:bb:cc:dd:ee:ff", NetworkScope::Lan);
        assert!(lan.contains("eth.dst.ig == 1"));
        assert!(lan.ends_with("&& eth.addr == aa:bb:cc:dd:ee:ff"));
    }
}
