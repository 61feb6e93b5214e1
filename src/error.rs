//! Error types for jira-bridge
//!
//! One error enum covers every failure a sync call can surface to its
//! caller. Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the bridge, its syncers and its clients
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Unknown channel, or a channel that failed to initialize
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required data or an unmapped value; `fields` is sorted
    #[error("{message}")]
    Validation { message: String, fields: Vec<String> },

    /// A counterpart project or entity cannot be resolved
    #[error("{0}")]
    RemoteState(String),

    /// Network failure reported by a client
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials rejected by a remote system
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Production management API errors
    #[error("Production management error: {0}")]
    Pm(#[from] pm_api::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BridgeError {
    /// Build a validation error over a set of field names.
    ///
    /// Names are sorted and de-duplicated, then listed after `prefix`.
    pub fn validation(prefix: impl AsRef<str>, fields: impl IntoIterator<Item = String>) -> Self {
        let mut fields: Vec<String> = fields.into_iter().collect();
        fields.sort();
        fields.dedup();
        BridgeError::Validation {
            message: format!("{}: {:?}", prefix.as_ref(), fields),
            fields,
        }
    }

    /// Field names carried by a validation error
    pub fn fields(&self) -> &[String] {
        match self {
            BridgeError::Validation { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Whether re-delivering the same event later could succeed.
    ///
    /// Only transport failures qualify; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Transport(_) => true,
            BridgeError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    true
                } else if let Some(status) = e.status() {
                    matches!(status.as_u16(), 429 | 500..=599)
                } else {
                    false
                }
            }
            BridgeError::Pm(e) => e.is_transient(),
            BridgeError::Auth(_) => false,
            BridgeError::Configuration(_) => false,
            BridgeError::Validation { .. } => false,
            BridgeError::RemoteState(_) => false,
            BridgeError::Io(_) => false,
            BridgeError::Json(_) => false,
            BridgeError::Yaml(_) => false,
        }
    }
}
