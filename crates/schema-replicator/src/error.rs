//! Error types for the replication library.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`MetadataPort`](crate::core::MetadataPort).
///
/// This is the only error a port may produce. The connection descriptor
/// classifies it into a [`ReplicateError`] before it leaves the catalog layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be opened or was lost.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The server rejected the statement.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// The statement did not complete within the configured timeout.
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether retrying the same statement may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Timeout(_))
    }

    /// Server error code, if the server answered at all.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            TransportError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Bad or missing configuration, or an unresolvable database/table selection.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The object does not exist on the endpoint. Callers branch on this.
    #[error("{object} not found in database {database}")]
    NotFound { object: String, database: String },

    /// Connection or statement execution failed at the metadata port.
    #[error("Transport error while {context}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    /// The target rejected a DDL operation.
    #[error("Apply failed for {operation}: {cause}")]
    Apply { operation: String, cause: String },

    /// Foreign-key references form a cycle.
    #[error("Dependency cycle in database {database} among tables: {}", tables.join(", "))]
    DependencyCycle {
        database: String,
        tables: Vec<String>,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Replication was cancelled (SIGINT, etc.)
    #[error("Replication cancelled")]
    Cancelled,
}

impl ReplicateError {
    /// Create a Transport error with context about where it occurred.
    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        ReplicateError::Transport {
            context: context.into(),
            source,
        }
    }

    /// Create an Apply error.
    pub fn apply(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        ReplicateError::Apply {
            operation: operation.into(),
            cause: cause.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(object: impl Into<String>, database: impl Into<String>) -> Self {
        ReplicateError::NotFound {
            object: object.into(),
            database: database.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicateError::NotFound { .. })
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReplicateError::Config(_)
            | ReplicateError::Yaml(_)
            | ReplicateError::Json(_)
            | ReplicateError::Io(_) => 2,
            ReplicateError::Transport { .. } => 3,
            ReplicateError::DependencyCycle { .. } => 4,
            ReplicateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
