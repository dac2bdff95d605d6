//! Buckets protocol chains into the layer taxonomy.

use super::containers::{LayeredProtocols, ProtocolChain, ProtocolIdentity};
use super::tables::ClassificationTables;

/// Reassembly pseudo-node tshark reports under TCP; it carries no protocol
/// information of its own and is skipped outright.
const SEGMENT_SENTINEL: &str = "tcp.segments";

/// Walks every chain and assigns each protocol name to a layer.
///
/// The scan stops at the first Application-layer match in a chain: deeper
/// nodes are encoded payload formats (e.g. eth -> ip -> tcp -> http -> json)
/// and must not be classified as separate protocols. Names matching no
/// table land in the unknown set for the resolver.
pub fn classify_chains(
    chains: &[ProtocolChain],
    tables: &ClassificationTables,
) -> LayeredProtocols {
    let mut layered = LayeredProtocols::default();

    for chain in chains {
        for protocol in chain {
            let name = protocol.as_str();

            // The root is always the link layer; nothing to classify.
            if name == "eth" {
                continue;
            }

            if tables.network.contains(&name) {
                push_unique(&mut layered.network, name);
            } else if tables.transport.contains(&name) {
                push_unique(&mut layered.transport, name);
            } else if tables.session.contains(&name) {
                push_unique(&mut layered.session, name);
            } else if tables.is_application(name) {
                let identity = ProtocolIdentity::named(name);
                if !layered.application.contains(&identity) {
                    layered.application.push(identity);
                }
                break;
            } else if name != SEGMENT_SENTINEL {
                push_unique(&mut layered.unknown, name);
            }
        }
    }

    layered
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_string());
    }
}
