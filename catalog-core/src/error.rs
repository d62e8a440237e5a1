//! Error types shared by the catalog SDK.
//!
//! Every fallible SDK operation returns [`CoreError`]. The server crate maps
//! these onto HTTP status codes; within the SDK they stay transport-neutral.

use thiserror::Error;

/// Errors produced by catalog-core types and source providers.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A requested object (source, record, revision) does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A concurrent write or duplicate identifier was detected.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The input failed validation.
    #[error("invalid: {message}")]
    Invalid { message: String },

    /// A `secretRef` could not be materialised.
    #[error("secret {name}/{key} could not be resolved")]
    SecretMissing { name: String, key: String },

    /// A source provider failed to produce records.
    #[error("source error: {message}")]
    Source { message: String },

    /// The plugin does not implement the requested capability.
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// JSON serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors from source documents.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem errors while reading source material.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound { what: what.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CoreError::Invalid {
            message: message.into(),
        }
    }

    pub fn source(message: impl Into<String>) -> Self {
        CoreError::Source {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CoreError::Unsupported {
            message: message.into(),
        }
    }
}
