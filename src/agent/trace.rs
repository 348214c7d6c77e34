//! Diagnostic trace row produced on leaf nodes.

use serde::Serialize;

use super::step::Step;
use crate::errors::{Error, Result};

/// Number of columns in a trace row.
pub const NUM_TRACE: usize = 7;

/// One row of leaf diagnostics: the last policy echoed back, the measured
/// runtime and the requested and enforced power limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TraceRow {
    pub policy_power_package_limit_total: f64,
    pub policy_step_count: f64,
    pub policy_max_epoch_runtime: f64,
    pub policy_power_slack: f64,
    pub epoch_runtime: f64,
    pub power_limit: f64,
    pub enforced_power_limit: f64,
}

impl TraceRow {
    pub fn to_array(&self) -> [f64; NUM_TRACE] {
        [
            self.policy_power_package_limit_total,
            self.policy_step_count,
            self.policy_max_epoch_runtime,
            self.policy_power_slack,
            self.epoch_runtime,
            self.power_limit,
            self.enforced_power_limit,
        ]
    }
}

/// Column names for the trace output.
pub fn trace_names() -> [&'static str; NUM_TRACE] {
    [
        "POLICY_POWER_PACKAGE_LIMIT_TOTAL",
        "POLICY_STEP_COUNT",
        "POLICY_MAX_EPOCH_RUNTIME",
        "POLICY_POWER_SLACK",
        "EPOCH_RUNTIME",
        "POWER_LIMIT",
        "ENFORCED_POWER_LIMIT",
    ]
}

/// How each trace column is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Plain decimal.
    Double,
    /// `"<loop>-<STEP_NAME>"`, see [`format_step_count`].
    StepCount,
}

impl TraceFormat {
    pub fn format(&self, value: f64) -> Result<String> {
        match self {
            TraceFormat::Double => Ok(format!("{value}")),
            TraceFormat::StepCount => format_step_count(value),
        }
    }
}

/// Per-column formats, aligned with [`trace_names`].
pub fn trace_formats() -> [TraceFormat; NUM_TRACE] {
    [
        TraceFormat::Double,
        TraceFormat::StepCount,
        TraceFormat::Double,
        TraceFormat::Double,
        TraceFormat::Double,
        TraceFormat::Double,
        TraceFormat::Double,
    ]
}

/// Render a step counter as `"<loop>-<STEP_NAME>"` for human-readable logs.
pub fn format_step_count(step: f64) -> Result<String> {
    if step < 0.0 {
        return Err(Error::NegativeStepCount(step));
    }
    let step_count = step as i64;
    let phase = Step::from_count(step_count);
    Ok(format!("{}-{}", Step::loop_count(step_count), phase.name()))
}
