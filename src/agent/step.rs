//! The three-phase step state machine driving the balancing loop.
//!
//! Each loop walks the same cycle:
//! 1. `SendDownLimit` — fold the previous loop's slack into every node's cap.
//! 2. `MeasureRuntime` — measure balanced epoch runtime until stable.
//! 3. `ReduceLimit` — steer each node toward the tree-wide worst runtime and
//!    report the slack that frees up.
//!
//! The behaviors are stateless and shared: one strategy object per phase,
//! addressed by `step_count mod 3`. All mutable state lives in the role the
//! strategy is handed.

use serde::{Deserialize, Serialize};

use super::leaf::LeafRole;
use super::policy::{Policy, Sample};
use super::tree::RootRole;
use crate::errors::Result;

/// Number of phases in the step cycle.
pub const NUM_STEP: usize = 3;

/// Phase of the balancing loop, derived from a step counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Distribute the power budget (or previous slack) to all nodes.
    SendDownLimit = 0,
    /// Measure balanced epoch runtime under the current limits.
    MeasureRuntime = 1,
    /// Lower limits toward the target runtime and collect slack.
    ReduceLimit = 2,
}

impl Step {
    /// Phase for a step counter. Cyclic: 0 → 1 → 2 → 0 → …
    pub fn from_count(step_count: i64) -> Self {
        match step_count.rem_euclid(NUM_STEP as i64) {
            0 => Step::SendDownLimit,
            1 => Step::MeasureRuntime,
            _ => Step::ReduceLimit,
        }
    }

    /// Loop number for a step counter. Diagnostics only.
    pub fn loop_count(step_count: i64) -> i64 {
        step_count / NUM_STEP as i64
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::SendDownLimit => "STEP_SEND_DOWN_LIMIT",
            Step::MeasureRuntime => "STEP_MEASURE_RUNTIME",
            Step::ReduceLimit => "STEP_REDUCE_LIMIT",
        }
    }

    /// The shared strategy object for this phase.
    pub(crate) fn imp(&self) -> &'static dyn StepImp {
        STEP_TABLE[*self as usize]
    }
}

/// Per-phase behavior, dispatched against the owning role.
///
/// Implementations hold no state of their own; they only read and write the
/// role passed by reference.
pub(crate) trait StepImp: Send + Sync {
    /// Leaf entered this phase via a step advance.
    fn enter_step(&self, role: &mut LeafRole, in_policy: &Policy);

    /// Leaf sampling tick while in this phase.
    fn sample_platform(&self, role: &mut LeafRole) -> Result<()>;

    /// Root computes the next outgoing policy from the aggregated sample.
    fn update_policy(&self, role: &mut RootRole, sample: &Sample);
}

static STEP_TABLE: [&'static dyn StepImp; NUM_STEP] =
    [&SendDownLimitStep, &MeasureRuntimeStep, &ReduceLimitStep];

struct SendDownLimitStep;

impl StepImp for SendDownLimitStep {
    fn enter_step(&self, role: &mut LeafRole, in_policy: &Policy) {
        // Fold the slack granted by the root into the node's cap.
        let cap = role.power_balancer.power_limit() + in_policy.power_slack;
        role.power_balancer.power_cap(cap);
        role.is_step_complete = true;
    }

    fn sample_platform(&self, _role: &mut LeafRole) -> Result<()> {
        Ok(())
    }

    fn update_policy(&self, role: &mut RootRole, _sample: &Sample) {
        // Pure step transition: no new budget.
        role.tree.policy.power_package_limit_total = 0.0;
    }
}

struct MeasureRuntimeStep;

impl StepImp for MeasureRuntimeStep {
    fn enter_step(&self, _role: &mut LeafRole, _in_policy: &Policy) {}

    fn sample_platform(&self, role: &mut LeafRole) -> Result<()> {
        let epoch_count = role.sample_epoch_count()?;
        // Act once per completed epoch until the estimate settles.
        if epoch_count != role.last_epoch_count && !role.is_step_complete {
            let balanced_runtime = role.balanced_epoch_runtime()?;
            role.is_step_complete = role.power_balancer.is_runtime_stable(balanced_runtime);
            role.power_balancer.calculate_runtime_sample();
            role.runtime = role.power_balancer.runtime_sample();
            role.last_epoch_count = epoch_count;
        }
        Ok(())
    }

    fn update_policy(&self, role: &mut RootRole, sample: &Sample) {
        role.tree.policy.max_epoch_runtime = sample.max_epoch_runtime;
    }
}

struct ReduceLimitStep;

impl StepImp for ReduceLimitStep {
    fn enter_step(&self, role: &mut LeafRole, in_policy: &Policy) {
        role.power_balancer.target_runtime(in_policy.max_epoch_runtime);
    }

    fn sample_platform(&self, role: &mut LeafRole) -> Result<()> {
        let epoch_count = role.sample_epoch_count()?;
        if epoch_count != role.last_epoch_count && !role.is_step_complete {
            let balanced_runtime = role.balanced_epoch_runtime()?;
            role.power_balancer.calculate_runtime_sample();
            // An out-of-bounds limit request ends the step early: the
            // governor cannot enforce what the balancer wants.
            role.is_step_complete =
                role.is_out_of_bounds || role.power_balancer.is_target_met(balanced_runtime);
            role.power_slack = role.power_balancer.power_slack();
            role.is_out_of_bounds = false;
            role.power_headroom = role.power_max - role.power_balancer.power_limit();
            role.last_epoch_count = epoch_count;
        }
        Ok(())
    }

    fn update_policy(&self, role: &mut RootRole, sample: &Sample) {
        // Conservative bound: never hand out more slack than the tightest
        // node's measured headroom.
        let slack = sample.sum_power_slack / role.num_node as f64;
        role.tree.policy.power_slack = slack.min(sample.min_power_headroom);
    }
}
