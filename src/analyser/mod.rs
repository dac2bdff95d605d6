//! The core of smart-home capture analysis.
//! Drives tshark over pcaps to classify protocols, attribute per-device traffic and aggregate endpoint statistics.
pub mod containers;
pub mod endpoints;
pub mod error;
pub mod layers;
pub mod metrics;
pub mod phs;
pub mod resolver;
pub mod stats;
pub mod tables;
pub mod tshark;
