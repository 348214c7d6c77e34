//! Leaf role: runs on every compute node.
//!
//! Owns the governor (hardware power clamp) and the balancer (per-node
//! adaptive power-limit algorithm), converts incoming policies into hardware
//! writes, and turns local telemetry into per-step sample updates.

use std::sync::Arc;

use tracing::debug;

use super::policy::{Policy, Sample};
use super::step::Step;
use super::trace::TraceRow;
use crate::consts::{
    SIGNAL_EPOCH_COUNT, SIGNAL_EPOCH_RUNTIME, SIGNAL_EPOCH_RUNTIME_IGNORE,
    SIGNAL_EPOCH_RUNTIME_NETWORK, SIGNAL_POWER_PACKAGE_MAX,
};
use crate::errors::{Error, Result};
use crate::platform::{Domain, PlatformIo, PowerBalancer, PowerGovernor, SignalIdx};

/// Handles for the epoch signals the leaf samples every tick.
#[derive(Debug, Clone, Copy)]
struct EpochSignals {
    runtime: SignalIdx,
    count: SignalIdx,
    runtime_network: SignalIdx,
    runtime_ignore: SignalIdx,
}

pub(crate) struct LeafRole {
    platform: Arc<dyn PlatformIo>,
    signals: EpochSignals,
    pub(crate) power_governor: Box<dyn PowerGovernor>,
    pub(crate) power_balancer: Box<dyn PowerBalancer>,
    /// Last policy received, echoed into the trace.
    policy: Policy,
    step_count: i64,
    pub(crate) is_step_complete: bool,
    /// Physical power ceiling for this node. Raised if a budget ever
    /// exceeds it.
    pub(crate) power_max: f64,
    pub(crate) last_epoch_count: f64,
    pub(crate) runtime: f64,
    /// Limit the governor actually enforced on the last write.
    actual_limit: f64,
    pub(crate) power_slack: f64,
    pub(crate) power_headroom: f64,
    /// Set when the governor clamped a request; cleared after the reduce
    /// step reports it.
    pub(crate) is_out_of_bounds: bool,
}

impl LeafRole {
    pub(crate) fn new(
        platform: Arc<dyn PlatformIo>,
        mut power_governor: Box<dyn PowerGovernor>,
        power_balancer: Box<dyn PowerBalancer>,
    ) -> Result<Self> {
        power_governor.init_platform_io()?;
        let signals = EpochSignals {
            runtime: platform.push_signal(SIGNAL_EPOCH_RUNTIME, Domain::Board, 0)?,
            count: platform.push_signal(SIGNAL_EPOCH_COUNT, Domain::Board, 0)?,
            runtime_network: platform.push_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, Domain::Board, 0)?,
            runtime_ignore: platform.push_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, Domain::Board, 0)?,
        };
        let power_max = platform.num_domain(Domain::Package) as f64
            * platform.read_signal(SIGNAL_POWER_PACKAGE_MAX, Domain::Package, 0)?;
        debug!(power_max, "leaf role constructed");
        Ok(Self {
            platform,
            signals,
            power_governor,
            power_balancer,
            policy: Policy::default(),
            step_count: -1,
            is_step_complete: true,
            power_max,
            last_epoch_count: 0.0,
            runtime: 0.0,
            actual_limit: f64::NAN,
            power_slack: 0.0,
            power_headroom: 0.0,
            is_out_of_bounds: false,
        })
    }

    /// React to a policy from the parent and drive the governor.
    ///
    /// A non-zero budget resets the algorithm; a changed step count must be
    /// exactly the local successor or the input is rejected. Either way the
    /// balancer's current limit request is pushed to the governor.
    /// Returns whether a hardware write occurred.
    pub(crate) fn adjust_platform(&mut self, in_policy: &Policy) -> Result<bool> {
        self.policy = *in_policy;
        if in_policy.power_package_limit_total != 0.0 {
            // New power cap from the resource manager: reset the algorithm.
            self.step_count = Step::SendDownLimit as i64;
            self.power_balancer
                .power_cap(in_policy.power_package_limit_total);
            if in_policy.power_package_limit_total > self.power_max {
                self.power_max = in_policy.power_package_limit_total;
            }
            self.is_step_complete = true;
            debug!(
                cap = in_policy.power_package_limit_total,
                "accepted new power budget"
            );
        } else if in_policy.step_count as i64 != self.step_count {
            self.step_count += 1;
            self.is_step_complete = false;
            if self.step_count != in_policy.step_count as i64 {
                return Err(Error::StepOutOfSync {
                    incoming: in_policy.step_count as i64,
                    local: self.step_count,
                });
            }
            Step::from_count(self.step_count)
                .imp()
                .enter_step(self, in_policy);
        }

        let mut result = false;
        let request_limit = self.power_balancer.power_limit();
        if !request_limit.is_nan() && request_limit != 0.0 {
            let adjust = self.power_governor.adjust_platform(request_limit)?;
            self.actual_limit = adjust.actual;
            result = adjust.wrote;
            if request_limit < adjust.actual {
                // Governor clamped the request up to its floor.
                self.is_out_of_bounds = true;
            }
            if result {
                self.power_balancer.power_limit_adjusted(adjust.actual);
            }
        }
        Ok(result)
    }

    /// Run the current step's sampling behavior and fill the outgoing
    /// sample. Returns whether this node's step is complete.
    pub(crate) fn sample_platform(&mut self, out_sample: &mut Sample) -> Result<bool> {
        Step::from_count(self.step_count).imp().sample_platform(self)?;
        self.power_governor.sample_platform()?;
        out_sample.step_count = self.step_count as f64;
        out_sample.max_epoch_runtime = self.runtime;
        out_sample.sum_power_slack = self.power_slack;
        out_sample.min_power_headroom = self.power_headroom;
        Ok(self.is_step_complete)
    }

    /// Fill the diagnostic trace row. Pure read.
    pub(crate) fn trace_values(&self, values: &mut TraceRow) {
        values.policy_power_package_limit_total = self.policy.power_package_limit_total;
        values.policy_step_count = self.policy.step_count;
        values.policy_max_epoch_runtime = self.policy.max_epoch_runtime;
        values.policy_power_slack = self.policy.power_slack;
        values.epoch_runtime = self.power_balancer.runtime_sample();
        values.power_limit = self.power_balancer.power_limit();
        values.enforced_power_limit = self.actual_limit;
    }

    pub(crate) fn sample_epoch_count(&self) -> Result<f64> {
        self.platform.sample(self.signals.count)
    }

    /// Epoch runtime with network-wait and ignored time subtracted,
    /// isolating node-local work that is uncorrelated across nodes.
    pub(crate) fn balanced_epoch_runtime(&self) -> Result<f64> {
        Ok(self.platform.sample(self.signals.runtime)?
            - self.platform.sample(self.signals.runtime_network)?
            - self.platform.sample(self.signals.runtime_ignore)?)
    }

    #[cfg(test)]
    pub(crate) fn step_count(&self) -> i64 {
        self.step_count
    }
}

impl std::fmt::Debug for LeafRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafRole")
            .field("step_count", &self.step_count)
            .field("is_step_complete", &self.is_step_complete)
            .field("power_max", &self.power_max)
            .field("runtime", &self.runtime)
            .field("actual_limit", &self.actual_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockBalancer, MockGovernor, MockPlatformIo};

    fn leaf_platform() -> Arc<MockPlatformIo> {
        let platform = MockPlatformIo::new();
        platform.set_signal(SIGNAL_POWER_PACKAGE_MAX, 200.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME, 0.0);
        platform.set_signal(SIGNAL_EPOCH_COUNT, 0.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 0.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.0);
        Arc::new(platform)
    }

    fn make_leaf(platform: Arc<MockPlatformIo>) -> LeafRole {
        LeafRole::new(
            platform,
            Box::new(MockGovernor::with_bounds(50.0, 200.0)),
            Box::new(MockBalancer::new()),
        )
        .unwrap()
    }

    fn budget_policy(cap: f64) -> Policy {
        Policy {
            power_package_limit_total: cap,
            ..Policy::default()
        }
    }

    fn step_policy(step_count: i64) -> Policy {
        Policy {
            step_count: step_count as f64,
            ..Policy::default()
        }
    }

    #[test]
    fn test_budget_reset() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);

        let wrote = leaf.adjust_platform(&budget_policy(150.0)).unwrap();
        assert!(wrote);
        assert_eq!(leaf.step_count(), 0);
        assert!(leaf.is_step_complete);
    }

    #[test]
    fn test_budget_raises_power_max() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        assert_eq!(leaf.power_max, 200.0);

        leaf.adjust_platform(&budget_policy(250.0)).unwrap();
        assert_eq!(leaf.power_max, 250.0);
    }

    #[test]
    fn test_step_advances_by_exactly_one() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();

        for next in 1..=6i64 {
            leaf.adjust_platform(&step_policy(next)).unwrap();
            assert_eq!(leaf.step_count(), next);
        }
    }

    #[test]
    fn test_skipped_step_rejected() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();

        let err = leaf.adjust_platform(&step_policy(2)).unwrap_err();
        assert_eq!(err, Error::StepOutOfSync { incoming: 2, local: 1 });
    }

    #[test]
    fn test_unchanged_step_is_noop() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();
        leaf.adjust_platform(&step_policy(1)).unwrap();

        // Re-delivery of the same policy does not advance the step.
        leaf.adjust_platform(&step_policy(1)).unwrap();
        assert_eq!(leaf.step_count(), 1);
    }

    #[test]
    fn test_out_of_bounds_flagged_on_clamped_request() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);

        // Governor floor is 50 W; a 20 W budget gets clamped up.
        leaf.adjust_platform(&budget_policy(20.0)).unwrap();
        assert!(leaf.is_out_of_bounds);
    }

    #[test]
    fn test_send_down_limit_completes_immediately() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();
        leaf.adjust_platform(&step_policy(1)).unwrap();
        leaf.adjust_platform(&step_policy(2)).unwrap();

        // Entering step 3 (SEND_DOWN_LIMIT) folds slack into the cap and
        // completes at once.
        let policy = Policy {
            step_count: 3.0,
            power_slack: 10.0,
            ..Policy::default()
        };
        leaf.adjust_platform(&policy).unwrap();
        assert!(leaf.is_step_complete);
        assert_eq!(leaf.power_balancer.power_limit(), 160.0);
    }

    #[test]
    fn test_measure_runtime_waits_for_epoch() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(Arc::clone(&platform));
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();
        leaf.adjust_platform(&step_policy(1)).unwrap();

        // No epoch boundary yet: step stays incomplete.
        let mut sample = Sample::default();
        assert!(!leaf.sample_platform(&mut sample).unwrap());

        // New epoch with 5s total, 1s network, 0.5s ignored.
        platform.set_signal(SIGNAL_EPOCH_COUNT, 1.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME, 5.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 1.0);
        platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.5);
        assert!(leaf.sample_platform(&mut sample).unwrap());
        assert_eq!(sample.max_epoch_runtime, 3.5);
        assert_eq!(sample.step_count, 1.0);
    }

    #[test]
    fn test_trace_echoes_policy() {
        let platform = leaf_platform();
        let mut leaf = make_leaf(platform);
        leaf.adjust_platform(&budget_policy(150.0)).unwrap();

        let mut row = TraceRow::default();
        leaf.trace_values(&mut row);
        assert_eq!(row.policy_power_package_limit_total, 150.0);
        assert_eq!(row.power_limit, 150.0);
        assert_eq!(row.enforced_power_limit, 150.0);
    }
}
