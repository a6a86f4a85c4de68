//! Error types for repo-core

use std::path::PathBuf;

use repo_model::{ActorKind, ApiError, ResourceAddress};

/// Result type for repo-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a reconciliation pass
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Desired-state document failed validation; no API call was made
    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },

    /// Document format could not be determined from the file extension
    #[error("Unsupported document format: .{extension}")]
    UnsupportedFormat { extension: String },

    /// Document could not be parsed in its detected format
    #[error("Failed to parse {format} document {path}: {message}")]
    DocumentParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    /// An operation depends on one at the same or a later level
    #[error("dependency cycle: {from} cannot depend on {to}")]
    DependencyCycle { from: ResourceAddress, to: ResourceAddress },

    /// A symbolic actor name could not be resolved to a platform id
    #[error("unable to resolve {kind} '{name}'")]
    UnresolvedActor { kind: ActorKind, name: String },

    /// Platform call failed while reading live state
    #[error("failed to read {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: ApiError,
    },

    /// Platform call failed for one resource
    #[error("{address}: {source}")]
    Api {
        address: ResourceAddress,
        #[source]
        source: ApiError,
    },

    /// A worker task panicked or was aborted
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The platform error behind this failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Fetch { source, .. } | Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}
