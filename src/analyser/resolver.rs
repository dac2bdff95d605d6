//! Resolves protocols the inspection tool could not name directly.
//!
//! For each unknown name we pull every TCP and UDP conversation carrying
//! that protocol, split by LAN and WAN scope, and infer a transport:port
//! identity from the ports involved. The heuristics err on the side of
//! over-capturing: ambiguous unicast UDP emits both ports and flags them
//! for manual verification instead of silently guessing.

use super::containers::{
    ConversationEndpoint, LayeredProtocols, NetworkScope, ProtocolIdentity, Transport,
};
use super::tables::ClassificationTables;
use super::tshark::CaptureSource;

/// Outcome of resolving one capture's unknown set.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Identities that could be double-counted and need out-of-band
    /// reconciliation. Never discarded silently; the caller must surface
    /// these.
    pub flagged: Vec<ProtocolIdentity>,
    /// Names the tool could not be queried for; they stay unknown.
    pub unresolved: Vec<String>,
}

/// Resolves every name in the unknown set, merging the resulting
/// identities into the Application layer of `layered`.
///
/// TLS is always treated as potentially hiding another protocol, so it
/// joins the resolution queue whenever the session layer saw it. A failed
/// tool invocation leaves that one protocol unresolved and moves on; it is
/// never fatal to the file.
pub fn resolve_unknowns(
    source: &dyn CaptureSource,
    layered: &mut LayeredProtocols,
    tables: &ClassificationTables,
) -> Resolution {
    let mut queue: Vec<String> = layered.unknown.clone();
    if layered.session.iter().any(|name| name == "tls") {
        queue.push("tls".to_string());
    }

    let mut resolution = Resolution::default();

    for proto in &queue {
        match resolve_one(source, proto, tables) {
            Ok(outcome) => {
                for identity in outcome.identities {
                    if !layered.application.contains(&identity) {
                        layered.application.push(identity);
                    }
                }
                for identity in outcome.flagged {
                    if !resolution.flagged.contains(&identity) {
                        resolution.flagged.push(identity);
                    }
                }
                layered.unknown.retain(|name| name != proto);
            }
            Err(err) => {
                log::warn!("Could not resolve \"{proto}\", leaving it unknown: {err}");
                resolution.unresolved.push(proto.clone());
            }
        }
    }

    resolution
}

struct ResolvedPorts {
    identities: Vec<ProtocolIdentity>,
    flagged: Vec<ProtocolIdentity>,
}

/// Queries all four transport/scope combinations for one protocol name and
/// applies the port heuristics to every conversation found.
fn resolve_one(
    source: &dyn CaptureSource,
    proto: &str,
    tables: &ClassificationTables,
) -> crate::analyser::error::Result<ResolvedPorts> {
    let mut outcome = ResolvedPorts {
        identities: Vec::new(),
        flagged: Vec::new(),
    };

    for scope in [NetworkScope::Lan, NetworkScope::Wan] {
        for transport in [Transport::Tcp, Transport::Udp] {
            let conversations = source.conversations(transport, proto, scope)?;
            for conv in &conversations {
                resolve_conversation(conv, tables, &mut outcome);
            }
        }
    }

    Ok(outcome)
}

fn resolve_conversation(
    conv: &ConversationEndpoint,
    tables: &ClassificationTables,
    outcome: &mut ResolvedPorts,
) {
    match conv.transport {
        // TCP is stateful, so the SYN direction's destination port had to
        // be the original service port.
        Transport::Tcp => {
            push_identity(outcome, tcp_identity(conv.dst_port));
        }
        Transport::Udp => {
            if conv.dst_is_group() {
                // Group destination: the group port is the service port.
                push_identity(outcome, ProtocolIdentity::from_port(Transport::Udp, conv.dst_port));
            } else if tables.known_udp_ports.contains(&conv.dst_port) {
                push_identity(outcome, ProtocolIdentity::from_port(Transport::Udp, conv.dst_port));
            } else if tables.known_udp_ports.contains(&conv.src_port) {
                push_identity(outcome, ProtocolIdentity::from_port(Transport::Udp, conv.src_port));
            } else {
                // Unicast with no known port on either side. The service
                // port may have been advertised in broadcast traffic the
                // capture filter dropped, so record both ports and flag
                // them: if both later show up with co-occurring traffic,
                // the caller must reconcile the double count manually.
                let src = ProtocolIdentity::from_port(Transport::Udp, conv.src_port);
                let dst = ProtocolIdentity::from_port(Transport::Udp, conv.dst_port);
                for identity in [src, dst] {
                    if !outcome.flagged.contains(&identity) {
                        outcome.flagged.push(identity.clone());
                    }
                    push_identity(outcome, identity);
                }
            }
        }
    }
}

/// Port 443 is already classified as https; match it instead of minting a
/// second identity for the same traffic.
fn tcp_identity(port: u16) -> ProtocolIdentity {
    if port == 443 {
        ProtocolIdentity::named("https")
    } else {
        ProtocolIdentity::from_port(Transport::Tcp, port)
    }
}

fn push_identity(outcome: &mut ResolvedPorts, identity: ProtocolIdentity) {
    if !outcome.identities.contains(&identity) {
        outcome.identities.push(identity);
    }
}
