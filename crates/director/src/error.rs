//! Error types for the director crate.
//!
//! Errors only cross collaborator seams (backend, actuator, sinks) and config
//! loading. Arbitration and Act outcomes are ordinary values.

use thiserror::Error;

/// Result type for director operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating a stage.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The generative backend returned an error.
    #[error("backend failed: {reason}")]
    BackendFailed { reason: String },

    /// The backend answered with text that does not satisfy the turn contract.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The occupancy resource could not be acquired.
    #[error("resource unavailable: {reason}")]
    ResourceUnavailable { reason: String },

    /// A best-effort collaborator (display, history, release) failed.
    #[error("collaborator '{collaborator}' failed: {reason}")]
    CollaboratorFailed {
        collaborator: String,
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Create a backend failed error.
    pub fn backend_failed(reason: impl Into<String>) -> Self {
        Self::BackendFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create a resource unavailable error.
    pub fn resource_unavailable(reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a collaborator failed error.
    pub fn collaborator_failed(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollaboratorFailed {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }
}
