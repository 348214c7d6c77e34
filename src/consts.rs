use std::time::Duration;

/// Name this agent registers under with the upstream plugin loader.
pub const PLUGIN_NAME: &str = "power_balancer";

/// Minimum wall-clock interval between control-loop ticks.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Multiplier applied to the governor's control time window when sizing
/// the balancer's runtime averaging window.
pub const DEFAULT_STABILITY_FACTOR: f64 = 3.0;

// Platform signal names consumed by the agent.
pub const SIGNAL_POWER_PACKAGE_MAX: &str = "POWER_PACKAGE_MAX";
pub const SIGNAL_POWER_PACKAGE_MIN: &str = "POWER_PACKAGE_MIN";
pub const SIGNAL_POWER_PACKAGE_TDP: &str = "POWER_PACKAGE_TDP";
pub const SIGNAL_EPOCH_RUNTIME: &str = "EPOCH_RUNTIME";
pub const SIGNAL_EPOCH_COUNT: &str = "EPOCH_COUNT";
pub const SIGNAL_EPOCH_RUNTIME_NETWORK: &str = "EPOCH_RUNTIME_NETWORK";
pub const SIGNAL_EPOCH_RUNTIME_IGNORE: &str = "EPOCH_RUNTIME_IGNORE";

/// Platform control written by the enforcement path.
pub const CONTROL_POWER_PACKAGE_LIMIT: &str = "POWER_PACKAGE_LIMIT";
