//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_STABILITY_FACTOR, DEFAULT_WAIT_INTERVAL};

/// Tunables for the balancing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Minimum wall-clock interval between control-loop ticks, in
    /// milliseconds.
    pub wait_interval_ms: u64,
    /// Multiplier on the governor's control time window used to size the
    /// balancer's runtime averaging window.
    pub stability_factor: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            wait_interval_ms: DEFAULT_WAIT_INTERVAL.as_millis() as u64,
            stability_factor: DEFAULT_STABILITY_FACTOR,
        }
    }
}

impl AgentConfig {
    /// Inter-tick interval as a [`Duration`].
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }
}
