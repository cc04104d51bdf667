use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::{CompareError, Result};

/// Upper bound on retained test questions
pub const DEFAULT_MAX_QUESTIONS: usize = 20;

/// Number of empty version slots a new comparison view starts with
pub const DEFAULT_INITIAL_SLOTS: usize = 2;

/// Configuration for the execution coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Maximum number of questions retained by the question set
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    /// Number of empty slots created when the view opens
    #[serde(default = "default_initial_slots")]
    pub initial_slots: usize,
    /// Capacity of the broadcast channel used by `BroadcastObserver`
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Whether registered sinks are reset with `loaded()` when a run is cancelled
    #[serde(default = "default_true")]
    pub reset_on_cancel: bool,
    /// Streaming transport settings
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Settings for the streaming transports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Comparison endpoint for the SSE transport
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Connect timeout in milliseconds (None = client default)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Buffered frames per loopback run
    #[serde(default = "default_loopback_buffer")]
    pub loopback_buffer: usize,
}

fn default_max_questions() -> usize {
    DEFAULT_MAX_QUESTIONS
}

fn default_initial_slots() -> usize {
    DEFAULT_INITIAL_SLOTS
}

fn default_event_capacity() -> usize {
    256
}

fn default_loopback_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
            initial_slots: DEFAULT_INITIAL_SLOTS,
            event_capacity: default_event_capacity(),
            reset_on_cancel: true,
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout_ms: None,
            loopback_buffer: default_loopback_buffer(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl CoordinatorConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_questions == 0 {
            return Err(CompareError::configuration_field(
                "max_questions must be greater than 0",
                "max_questions",
            ));
        }
        if self.initial_slots < 2 {
            return Err(CompareError::configuration_field(
                "initial_slots must be at least 2",
                "initial_slots",
            ));
        }
        if self.event_capacity == 0 {
            return Err(CompareError::configuration_field(
                "event_capacity must be greater than 0",
                "event_capacity",
            ));
        }
        if self.transport.loopback_buffer == 0 {
            return Err(CompareError::configuration_field(
                "loopback_buffer must be greater than 0",
                "transport.loopback_buffer",
            ));
        }
        if let Some(endpoint) = &self.transport.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(CompareError::configuration_field(
                    format!("endpoint must be an http(s) URL, got '{}'", endpoint),
                    "transport.endpoint",
                ));
            }
        }
        if self.transport.connect_timeout_ms == Some(0) {
            return Err(CompareError::configuration_field(
                "connect_timeout_ms must be greater than 0",
                "transport.connect_timeout_ms",
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CompareError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&contents)
    }
}
