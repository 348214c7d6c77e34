//! Tree and root roles: step synchronization up and down the fan-in tree.
//!
//! An interior node only relays: it broadcasts accepted policies unchanged
//! to its children and aggregates their samples element-wise. The root
//! additionally owns the tree-wide budget and computes the next policy each
//! time every node has finished the current step.

use tracing::debug;

use super::policy::{Policy, Sample};
use super::step::Step;
use crate::errors::{Error, Result};

#[derive(Debug)]
pub(crate) struct TreeRole {
    /// Last policy accepted (tree) or next policy to send (root).
    pub(crate) policy: Policy,
    pub(crate) step_count: i64,
    pub(crate) is_step_complete: bool,
    num_children: usize,
}

impl TreeRole {
    pub(crate) fn new(level: usize, fan_in: &[usize]) -> Result<Self> {
        if level == 0 || level > fan_in.len() {
            return Err(Error::InvalidLevel {
                level,
                depth: fan_in.len(),
            });
        }
        Ok(Self {
            policy: Policy::default(),
            step_count: -1,
            is_step_complete: true,
            num_children: fan_in[level - 1],
        })
    }

    /// Relay a policy from the parent.
    ///
    /// Acts only when this node's step is complete and the incoming step
    /// differs from the local one; accepts a reset to `SEND_DOWN_LIMIT` or
    /// exactly one step advance. Returns whether a broadcast occurred.
    pub(crate) fn descend(&mut self, in_policy: &Policy, out_policy: &mut [Policy]) -> Result<bool> {
        debug_assert_eq!(
            out_policy.len(),
            self.num_children,
            "output policy slots do not match fan-in"
        );
        let mut result = false;
        if self.is_step_complete && in_policy.step_count as i64 != self.step_count {
            let incoming = in_policy.step_count as i64;
            if incoming == Step::SendDownLimit as i64 {
                self.step_count = Step::SendDownLimit as i64;
            } else if incoming == self.step_count + 1 {
                self.step_count += 1;
            } else {
                return Err(Error::StepOutOfSync {
                    incoming,
                    local: self.step_count,
                });
            }
            self.is_step_complete = false;
            // The input policy is relayed verbatim to every child.
            for child_policy in out_policy.iter_mut() {
                *child_policy = *in_policy;
            }
            self.policy = *in_policy;
            result = true;
        }
        Ok(result)
    }

    /// Aggregate the children's samples.
    ///
    /// Returns true exactly once per step: on the first tick where every
    /// child reports the node's current step, so parents are not
    /// re-signaled for a step they already saw complete.
    pub(crate) fn ascend(&mut self, in_sample: &[Sample], out_sample: &mut Sample) -> Result<bool> {
        debug_assert_eq!(
            in_sample.len(),
            self.num_children,
            "input sample count does not match fan-in"
        );
        let mut result = false;
        *out_sample = Sample::aggregate(in_sample);
        if !self.is_step_complete && out_sample.step_count as i64 == self.step_count {
            result = true;
            self.is_step_complete = true;
        }
        Ok(result)
    }
}

#[derive(Debug)]
pub(crate) struct RootRole {
    pub(crate) tree: TreeRole,
    /// Total node count, the product of all fan-ins.
    pub(crate) num_node: usize,
    /// Last accepted top-level cap. NaN until the first budget arrives, so
    /// the first external policy always registers as a cap change.
    root_cap: f64,
    min_power: f64,
    max_power: f64,
}

impl RootRole {
    pub(crate) fn new(
        level: usize,
        fan_in: &[usize],
        min_power: f64,
        max_power: f64,
    ) -> Result<Self> {
        let mut tree = TreeRole::new(level, fan_in)?;
        tree.step_count = Step::SendDownLimit as i64;
        tree.is_step_complete = false;
        Ok(Self {
            tree,
            num_node: fan_in.iter().product(),
            root_cap: f64::NAN,
            min_power,
            max_power,
        })
    }

    /// React to the externally supplied policy.
    ///
    /// A changed cap resets the tree to `SEND_DOWN_LIMIT` and validates the
    /// budget against the configured package power range; otherwise the
    /// root advances when its own policy (updated by [`ascend`](Self::ascend))
    /// is one step ahead. Returns whether a broadcast occurred.
    pub(crate) fn descend(&mut self, in_policy: &Policy, out_policy: &mut [Policy]) -> Result<bool> {
        debug_assert_eq!(
            out_policy.len(),
            self.tree.num_children,
            "output policy slots do not match fan-in"
        );
        let mut result = false;
        if in_policy.power_package_limit_total != self.root_cap {
            self.tree.step_count = Step::SendDownLimit as i64;
            self.tree.policy = Policy {
                power_package_limit_total: in_policy.power_package_limit_total,
                step_count: Step::SendDownLimit as i64 as f64,
                max_epoch_runtime: 0.0,
                power_slack: 0.0,
            };
            self.root_cap = in_policy.power_package_limit_total;
            if self.root_cap > self.max_power || self.root_cap < self.min_power {
                return Err(Error::InvalidBudget {
                    cap: self.root_cap,
                    min: self.min_power,
                    max: self.max_power,
                });
            }
            debug!(cap = self.root_cap, "root accepted new power budget");
            result = true;
        } else if self.tree.step_count + 1 == self.tree.policy.step_count as i64 {
            self.tree.step_count += 1;
            self.tree.is_step_complete = false;
            result = true;
        } else if self.tree.step_count != self.tree.policy.step_count as i64 {
            return Err(Error::StepOutOfSync {
                incoming: self.tree.policy.step_count as i64,
                local: self.tree.step_count,
            });
        }
        if result {
            for child_policy in out_policy.iter_mut() {
                *child_policy = self.tree.policy;
            }
        }
        Ok(result)
    }

    /// Aggregate samples; on first-time completion run the current step's
    /// policy update and advance the root's step counter for the next
    /// `descend`.
    pub(crate) fn ascend(&mut self, in_sample: &[Sample], out_sample: &mut Sample) -> Result<bool> {
        let result = self.tree.ascend(in_sample, out_sample)?;
        if result {
            if self.tree.step_count != self.tree.policy.step_count as i64 {
                return Err(Error::SampleStepMismatch {
                    sample: self.tree.policy.step_count as i64,
                    local: self.tree.step_count,
                });
            }
            let step = Step::from_count(self.tree.step_count);
            step.imp().update_policy(self, out_sample);
            self.tree.policy.step_count = (self.tree.step_count + 1) as f64;
            debug!(
                step = step.name(),
                next_step = self.tree.policy.step_count,
                "root step complete"
            );
        }
        Ok(result)
    }
}
