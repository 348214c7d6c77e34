#![deny(unreachable_pub)]

// Core modules
mod agent;
mod consts;
mod errors;

// Collaborator interfaces and configuration
pub mod config;
pub mod platform;

// Re-exports
pub use agent::policy::{Policy, Sample, NUM_POLICY, NUM_SAMPLE};
pub use agent::step::{Step, NUM_STEP};
pub use agent::trace::{
    format_step_count, trace_formats, trace_names, TraceFormat, TraceRow, NUM_TRACE,
};
pub use agent::PowerBalancerAgent;
pub use config::AgentConfig;
pub use consts::{
    CONTROL_POWER_PACKAGE_LIMIT, DEFAULT_STABILITY_FACTOR, DEFAULT_WAIT_INTERVAL, PLUGIN_NAME,
    SIGNAL_EPOCH_COUNT, SIGNAL_EPOCH_RUNTIME, SIGNAL_EPOCH_RUNTIME_IGNORE,
    SIGNAL_EPOCH_RUNTIME_NETWORK, SIGNAL_POWER_PACKAGE_MAX, SIGNAL_POWER_PACKAGE_MIN,
    SIGNAL_POWER_PACKAGE_TDP,
};
pub use errors::{Error, Result};
pub use platform::{Domain, GovernorAdjust, PlatformIo, PowerBalancer, PowerGovernor, SignalIdx};
