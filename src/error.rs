//! Error types for overlayd
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::engine::Rejection;

/// All error types that can occur in overlayd
#[derive(Debug, Error)]
pub enum OverlaydError {
    /// Request refused by the admission gate
    #[error("Request rejected: {0}")]
    Rejected(#[from] Rejection),

    /// The scheduler task is gone
    #[error("Engine stopped")]
    EngineStopped,

    /// An external collaborator call failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OverlaydError {
    /// The admission rejection carried by this error, if any
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

/// Result type alias for overlayd operations
pub type Result<T> = std::result::Result<T, OverlaydError>;
