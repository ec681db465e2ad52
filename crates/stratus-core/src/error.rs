use thiserror::Error;

use crate::types::ResourceKind;

/// Failure of a single scanner operation.
///
/// A scanner operation fails atomically: no partial results accompany an
/// error.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("aws CLI not found at path: {path}")]
    CliNotFound { path: String },

    #[error("aws CLI exited with code {code}: {stderr}")]
    CliFailed { code: i32, stderr: String },

    #[error("Failed to parse output of {operation}: {source}")]
    Parse {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("{0} scanning is not supported by this scanner")]
    Unsupported(ResourceKind),

    #[error("Ambiguous lookup: {0}")]
    Ambiguous(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
