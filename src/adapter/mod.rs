//! Diagnostic protocol adapter seam.
//!
//! The pipeline only talks to the vehicle through [`DiagnosticAdapter`].
//! `Elm327Adapter` speaks to a real ELM327-compatible dongle over TCP,
//! and `SimulatedAdapter` generates a plausible drive cycle.

pub mod elm327;
pub mod parameters;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    db::ParameterValue,
    error::{AdapterError, ConfigError},
};

pub use elm327::Elm327Adapter;
pub use parameters::{spec_for, ParameterSpec, PARAMETERS, VIN_PARAMETER};
pub use simulated::SimulatedAdapter;

#[async_trait]
pub trait DiagnosticAdapter: Send {
    async fn connect(&mut self, address: &str) -> Result<(), AdapterError>;

    /// Releases the link. Must succeed or fail quietly when already closed.
    async fn disconnect(&mut self) -> Result<(), AdapterError>;

    async fn query_parameter(&mut self, name: &str) -> Result<ParameterValue, AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// `host:port` of the adapter. WiFi ELM327 dongles listen on 35000.
    pub address: String,
    /// Use the simulated adapter instead of a real one.
    pub simulate: bool,
    /// Switch to the simulated adapter when the real one ends up `Failed`.
    pub fallback_to_simulated: bool,
    /// Per-command read timeout.
    pub read_timeout_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            address: "192.168.0.10:35000".into(),
            simulate: false,
            fallback_to_simulated: true,
            read_timeout_ms: 2_000,
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.simulate && self.address.trim().is_empty() {
            return Err(ConfigError::new("adapter.address is required unless simulate is set"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::new("adapter.read_timeout_ms must be positive"));
        }
        Ok(())
    }
}
