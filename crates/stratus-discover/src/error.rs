//! Error types for the stratus-discover crate.
//!
//! Scanner failures during a run are stream events, not errors; these cover
//! setup and single lookups.

use thiserror::Error;

use stratus_core::ScanError;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;

#[cfg(test)]
mod tests {
    use stratus_core::types::ResourceKind;

    use super::*;

    #[test]
    fn test_scan_error_converts() {
        let err: DiscoverError = ScanError::Unsupported(ResourceKind::LoadBalancer).into();
        assert!(matches!(err, DiscoverError::Scan(ScanError::Unsupported(_))));
        assert!(err.to_string().starts_with("Scan error: "));
    }
}
