//! stratus-core: Shared types and error handling for stratus cloud discovery.
//!
//! This crate provides the foundational types used by the discovery engine:
//! - Provider resource records (instances, security groups, load balancers, etc.)
//! - The closed `Resource` union and its `ResourceKind` tags
//! - The `Event` / `DiscoveryError` model carried on the discovery stream
//! - The `ScanError` taxonomy returned by scanner operations

pub mod error;
pub mod events;
pub mod types;

pub use error::ScanError;
pub use events::{DiscoveryError, Event};
pub use types::{Resource, ResourceKind};
