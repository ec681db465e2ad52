//! stratus-discover: Concurrent cloud resource discovery.
//!
//! Fans out one scan per resource family, expands security groups into
//! their member instances, and merges every result and failure into a
//! single bounded event stream that closes once all scans are done.

pub mod aws;
pub mod config;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod report;
pub mod scanner;

pub use orchestrator::{DiscoveryOptions, DiscoveryStream, Discoverer, NestedExpansion};
pub use scanner::Scanner;
