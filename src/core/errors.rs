use std::collections::HashMap;
use thiserror::Error;

use crate::matrix::state::RunScope;

/// Unified error type for the comparison coordinator
#[derive(Debug, Error)]
pub enum CompareError {
    /// A version-detail fetch failed; the slot stays empty
    #[error("Failed to fetch version {version_id}")]
    VersionFetch {
        version_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The streaming channel failed to open or broke mid-run
    #[error("Transport failed during {operation}: {message}")]
    Transport {
        operation: String,
        message: String,
        context: HashMap<String, String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A run was requested while another one is still in flight
    #[error("A comparison run is already in progress ({active})")]
    RunInProgress { active: RunScope },

    /// An index did not address an existing entry
    #[error("Index {index} is out of range for {collection} (len {len})")]
    InvalidIndex {
        collection: String,
        index: usize,
        len: usize,
    },

    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A stream frame could not be understood
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        frame: Option<String>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Cancellation errors
    #[error("Operation was cancelled: {operation}")]
    Cancelled {
        operation: String,
        reason: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CompareError {
    /// Create a version fetch error
    pub fn version_fetch<S, E>(version_id: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::VersionFetch {
            version_id: version_id.into(),
            source: source.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source<S, E>(operation: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
            context: HashMap::new(),
            source: Some(Box::new(source)),
        }
    }

    /// Add context to a transport error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Transport { ref mut context, .. } = self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Create an out-of-range error
    pub fn invalid_index<S: Into<String>>(collection: S, index: usize, len: usize) -> Self {
        Self::InvalidIndex {
            collection: collection.into(),
            index,
            len,
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error with field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
            frame: None,
        }
    }

    /// Create a protocol error carrying the offending frame
    pub fn protocol_frame<S: Into<String>, F: Into<String>>(message: S, frame: F) -> Self {
        Self::Protocol {
            message: message.into(),
            frame: Some(frame.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: None,
        }
    }

    /// Whether re-triggering the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::VersionFetch { .. } | Self::Transport { .. } | Self::Io { .. } => true,
            Self::RunInProgress { .. } => true, // once the active run ends
            Self::Cancelled { .. } => true,
            Self::Protocol { .. } => true,
            Self::InvalidIndex { .. }
            | Self::Validation { .. }
            | Self::Configuration { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::VersionFetch { .. } => "version_fetch",
            Self::Transport { .. } => "transport",
            Self::RunInProgress { .. } => "run_in_progress",
            Self::InvalidIndex { .. } => "invalid_index",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Protocol { .. } => "protocol",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CompareError>;

impl From<std::io::Error> for CompareError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for CompareError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for CompareError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<reqwest::Error> for CompareError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport_with_source("http", err)
    }
}

impl From<anyhow::Error> for CompareError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}
