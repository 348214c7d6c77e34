//! Scriptable platform collaborators for tests and simulation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{Domain, GovernorAdjust, PlatformIo, PowerBalancer, PowerGovernor, SignalIdx};
use crate::consts::CONTROL_POWER_PACKAGE_LIMIT;
use crate::errors::{Error, Result};

/// One recorded `write_control` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlWrite {
    pub name: String,
    pub domain: Domain,
    pub domain_idx: usize,
    pub value: f64,
}

#[derive(Debug, Default)]
struct PlatformState {
    values: HashMap<String, f64>,
    pushed: Vec<String>,
    controls: Vec<ControlWrite>,
}

/// In-memory platform with scriptable signal values.
///
/// Signals must be given a value with [`set_signal`](Self::set_signal)
/// before they can be pushed or read; sampling follows the latest value set.
#[derive(Debug)]
pub struct MockPlatformIo {
    num_package: usize,
    state: Mutex<PlatformState>,
}

impl Default for MockPlatformIo {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatformIo {
    pub fn new() -> Self {
        Self {
            num_package: 1,
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Platform with `num_package` processor packages.
    pub fn with_packages(num_package: usize) -> Self {
        Self {
            num_package,
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().expect("mock platform lock poisoned")
    }

    /// Set the current value of a named signal.
    pub fn set_signal(&self, name: &str, value: f64) {
        self.state().values.insert(name.to_string(), value);
    }

    /// Add `delta` to a named signal's current value (0 if unset).
    pub fn bump_signal(&self, name: &str, delta: f64) {
        let mut state = self.state();
        let entry = state.values.entry(name.to_string()).or_insert(0.0);
        *entry += delta;
    }

    /// Latest value written to a named control, if any.
    pub fn last_control(&self, name: &str) -> Option<f64> {
        self.state()
            .controls
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// All recorded control writes, oldest first.
    pub fn control_writes(&self) -> Vec<ControlWrite> {
        self.state().controls.clone()
    }
}

impl PlatformIo for MockPlatformIo {
    fn push_signal(&self, name: &str, _domain: Domain, _domain_idx: usize) -> Result<SignalIdx> {
        let mut state = self.state();
        if !state.values.contains_key(name) {
            return Err(Error::UnknownSignal(name.to_string()));
        }
        state.pushed.push(name.to_string());
        Ok(state.pushed.len() - 1)
    }

    fn sample(&self, idx: SignalIdx) -> Result<f64> {
        let state = self.state();
        let name = state.pushed.get(idx).ok_or(Error::BadSignalIndex(idx))?;
        state
            .values
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownSignal(name.clone()))
    }

    fn read_signal(&self, name: &str, _domain: Domain, _domain_idx: usize) -> Result<f64> {
        self.state()
            .values
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownSignal(name.to_string()))
    }

    fn write_control(
        &self,
        name: &str,
        domain: Domain,
        domain_idx: usize,
        value: f64,
    ) -> Result<()> {
        if name != CONTROL_POWER_PACKAGE_LIMIT {
            return Err(Error::UnknownControl(name.to_string()));
        }
        self.state().controls.push(ControlWrite {
            name: name.to_string(),
            domain,
            domain_idx,
            value,
        });
        Ok(())
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        if name == CONTROL_POWER_PACKAGE_LIMIT {
            Ok(Domain::Package)
        } else {
            Err(Error::UnknownControl(name.to_string()))
        }
    }

    fn num_domain(&self, domain: Domain) -> usize {
        match domain {
            Domain::Board => 1,
            Domain::Package => self.num_package,
        }
    }
}

/// Governor that clamps requests to fixed bounds and tracks writes.
#[derive(Debug, Clone)]
pub struct MockGovernor {
    pub min_power: f64,
    pub max_power: f64,
    pub time_window: f64,
    pub last_setting: Option<f64>,
    pub requests: Vec<f64>,
    pub init_calls: usize,
    pub sample_calls: usize,
}

impl Default for MockGovernor {
    fn default() -> Self {
        Self {
            min_power: 50.0,
            max_power: 300.0,
            time_window: 0.013,
            last_setting: None,
            requests: Vec::new(),
            init_calls: 0,
            sample_calls: 0,
        }
    }
}

impl MockGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(min_power: f64, max_power: f64) -> Self {
        Self {
            min_power,
            max_power,
            ..Self::default()
        }
    }
}

impl PowerGovernor for MockGovernor {
    fn init_platform_io(&mut self) -> Result<()> {
        self.init_calls += 1;
        Ok(())
    }

    fn sample_platform(&mut self) -> Result<()> {
        self.sample_calls += 1;
        Ok(())
    }

    fn adjust_platform(&mut self, node_power_request: f64) -> Result<GovernorAdjust> {
        self.requests.push(node_power_request);
        let actual = node_power_request.clamp(self.min_power, self.max_power);
        let wrote = self.last_setting != Some(actual);
        if wrote {
            self.last_setting = Some(actual);
        }
        Ok(GovernorAdjust { wrote, actual })
    }

    fn set_power_bounds(&mut self, min_pkg_power: f64, max_pkg_power: f64) {
        self.min_power = min_pkg_power;
        self.max_power = max_pkg_power;
    }

    fn power_package_time_window(&self) -> f64 {
        self.time_window
    }
}

/// Balancer with deterministic, scriptable convergence behavior.
///
/// Declares the runtime estimate stable after `stable_after` measurements
/// and the target met as soon as a measurement is at or under the target.
#[derive(Debug, Clone)]
pub struct MockBalancer {
    pub window: f64,
    pub cap: f64,
    pub limit: f64,
    pub target: f64,
    pub measured: f64,
    pub runtime: f64,
    pub slack: f64,
    pub stable_after: u32,
    pub observations: u32,
    pub force_target_met: bool,
}

impl Default for MockBalancer {
    fn default() -> Self {
        Self {
            window: 0.0,
            cap: f64::NAN,
            limit: f64::NAN,
            target: 0.0,
            measured: f64::NAN,
            runtime: 0.0,
            slack: 0.0,
            stable_after: 1,
            observations: 0,
            force_target_met: false,
        }
    }
}

impl MockBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `n` runtime measurements before reporting stability.
    pub fn with_stability(stable_after: u32) -> Self {
        Self {
            stable_after,
            ..Self::default()
        }
    }

    pub fn with_slack(slack: f64) -> Self {
        Self {
            slack,
            ..Self::default()
        }
    }
}

impl PowerBalancer for MockBalancer {
    fn averaging_window(&mut self, window: f64) {
        self.window = window;
    }

    fn power_cap(&mut self, cap: f64) {
        self.cap = cap;
        self.limit = cap;
        self.observations = 0;
    }

    fn target_runtime(&mut self, target: f64) {
        self.target = target;
    }

    fn power_limit(&self) -> f64 {
        self.limit
    }

    fn power_limit_adjusted(&mut self, limit: f64) {
        self.limit = limit;
    }

    fn is_runtime_stable(&mut self, measured_runtime: f64) -> bool {
        self.measured = measured_runtime;
        self.observations += 1;
        self.observations >= self.stable_after
    }

    fn calculate_runtime_sample(&mut self) {
        if !self.measured.is_nan() {
            self.runtime = self.measured;
        }
    }

    fn runtime_sample(&self) -> f64 {
        self.runtime
    }

    fn is_target_met(&mut self, measured_runtime: f64) -> bool {
        self.measured = measured_runtime;
        self.force_target_met || (self.target > 0.0 && measured_runtime <= self.target)
    }

    fn power_slack(&self) -> f64 {
        self.slack
    }
}
