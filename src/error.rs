//! Error taxonomy for the acquisition pipeline.
//!
//! Store operations return `anyhow::Result`; the enums here cover the cases
//! where a caller has to branch on what went wrong.

use thiserror::Error;

/// Failure reading from the diagnostic adapter.
///
/// Everything except [`AdapterError::Link`] is a single-field failure: the
/// poller nulls that field and carries on with the tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("adapter did not answer within the read timeout")]
    Timeout,
    #[error("parameter {0} is not supported by the vehicle")]
    Unsupported(String),
    #[error("malformed adapter response: {0}")]
    Malformed(String),
    #[error("adapter link error: {0}")]
    Link(String),
}

impl AdapterError {
    /// Whether the error means the adapter itself is gone and needs a reconnect.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, AdapterError::Link(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("adapter unreachable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
    #[error("connection attempt cancelled")]
    Cancelled,
    #[error("adapter is not connected")]
    NotConnected,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("insufficient data for {parameter}: {found} samples, need at least {required}")]
    InsufficientData {
        parameter: String,
        found: usize,
        required: usize,
    },
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("VIN decode request failed: {0}")]
    Network(String),
    #[error("VIN decode service returned HTTP {0}")]
    Status(u16),
    #[error("VIN decode payload malformed: {0}")]
    Malformed(String),
}
