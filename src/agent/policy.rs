//! Policy and sample vectors exchanged between tree tiers.
//!
//! A policy flows parent→child and a sample flows child→parent, both as
//! fixed-order sequences of four doubles. The field order is part of the
//! wire contract with the tree transport and must not change.

use serde::{Deserialize, Serialize};

/// Number of fields in a policy vector.
pub const NUM_POLICY: usize = 4;

/// Number of fields in a sample vector.
pub const NUM_SAMPLE: usize = 4;

/// Policy sent down the tree each control tick.
///
/// `power_package_limit_total == 0.0` is a reserved sentinel: the policy
/// carries no new budget and only drives a step transition. A fresh budget
/// is always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Total power budget for the subtree, in watts. Zero means "step
    /// transition only".
    pub power_package_limit_total: f64,
    /// Step counter the receiver must advance to.
    pub step_count: f64,
    /// Slowest balanced epoch runtime observed tree-wide, in seconds.
    pub max_epoch_runtime: f64,
    /// Power each node should fold into its cap, in watts.
    pub power_slack: f64,
}

impl Policy {
    /// Field order for endpoint marshaling.
    pub fn to_array(&self) -> [f64; NUM_POLICY] {
        [
            self.power_package_limit_total,
            self.step_count,
            self.max_epoch_runtime,
            self.power_slack,
        ]
    }

    pub fn from_array(values: [f64; NUM_POLICY]) -> Self {
        Self {
            power_package_limit_total: values[0],
            step_count: values[1],
            max_epoch_runtime: values[2],
            power_slack: values[3],
        }
    }

    /// Field names, declared for upstream configuration validation.
    pub fn names() -> [&'static str; NUM_POLICY] {
        [
            "POWER_PACKAGE_LIMIT_TOTAL",
            "STEP_COUNT",
            "MAX_EPOCH_RUNTIME",
            "POWER_SLACK",
        ]
    }
}

/// Sample sent up the tree each control tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Step counter of the slowest node in the subtree.
    pub step_count: f64,
    /// Worst balanced epoch runtime in the subtree, in seconds.
    pub max_epoch_runtime: f64,
    /// Total unused power the subtree could give back, in watts.
    pub sum_power_slack: f64,
    /// Tightest distance to any node's physical power ceiling, in watts.
    pub min_power_headroom: f64,
}

impl Sample {
    pub fn to_array(&self) -> [f64; NUM_SAMPLE] {
        [
            self.step_count,
            self.max_epoch_runtime,
            self.sum_power_slack,
            self.min_power_headroom,
        ]
    }

    pub fn from_array(values: [f64; NUM_SAMPLE]) -> Self {
        Self {
            step_count: values[0],
            max_epoch_runtime: values[1],
            sum_power_slack: values[2],
            min_power_headroom: values[3],
        }
    }

    /// Field names, declared for upstream configuration validation.
    pub fn names() -> [&'static str; NUM_SAMPLE] {
        [
            "STEP_COUNT",
            "MAX_EPOCH_RUNTIME",
            "SUM_POWER_SLACK",
            "MIN_POWER_HEADROOM",
        ]
    }

    /// Element-wise aggregation of children samples.
    ///
    /// Step count takes the minimum so it reflects the slowest child;
    /// runtime takes the worst case; slack sums because it is a shared
    /// resource; headroom is bounded by the tightest child.
    pub fn aggregate(samples: &[Sample]) -> Sample {
        debug_assert!(!samples.is_empty(), "aggregating an empty sample set");
        let mut out = Sample {
            step_count: f64::INFINITY,
            max_epoch_runtime: f64::NEG_INFINITY,
            sum_power_slack: 0.0,
            min_power_headroom: f64::INFINITY,
        };
        for sample in samples {
            out.step_count = out.step_count.min(sample.step_count);
            out.max_epoch_runtime = out.max_epoch_runtime.max(sample.max_epoch_runtime);
            out.sum_power_slack += sample.sum_power_slack;
            out.min_power_headroom = out.min_power_headroom.min(sample.min_power_headroom);
        }
        out
    }
}
