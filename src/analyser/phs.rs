//! Parser for the indentation-structured protocol hierarchy report.
//!
//! The report nests protocols two spaces per level. Rather than unwinding
//! the tree with recursion (deep reports would be bounded by stack depth),
//! we walk the lines once with an explicit stack holding the path from the
//! root to the current node, emitting a snapshot of the path at every node.

use super::containers::ProtocolChain;
use super::error::{AnalysisError, Result};

/// Enumerates every root-to-node protocol chain of the report, in document
/// order. A report with N nodes yields exactly N chains.
pub fn unwind_tree(lines: &[String]) -> Result<Vec<ProtocolChain>> {
    let mut chains: Vec<ProtocolChain> = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }

        let key = line
            .split_whitespace()
            .next()
            .map(|token| token.trim_end_matches(':').to_string())
            .ok_or_else(|| AnalysisError::MalformedReport(format!("blank report node: {line}")))?;

        let depth = (line.len() - line.trim_start().len()) / 2;
        if depth > stack.len() {
            return Err(AnalysisError::MalformedReport(format!(
                "indentation jumps from depth {} to {}: {}",
                stack.len(),
                depth,
                line.trim()
            )));
        }

        // Unwind back to this node's parent, then descend into it.
        stack.truncate(depth);
        stack.push(key);
        chains.push(stack.clone());
    }

    Ok(chains)
}
