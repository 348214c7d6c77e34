//! The power-balancing agent: role selection and uniform dispatch.
//!
//! A node's place in the fan-in tree fixes its role once, at `init`:
//! level 0 is a leaf, the top level is the root, everything between is an
//! interior tree node. The facade forwards every call to that one role and
//! caches the boolean outcomes so the enclosing control loop can query them
//! repeatedly within a tick.
//!
//! ```text
//!             external cap
//!                  |
//!               RootRole          update_policy / descend
//!              /        \
//!         TreeRole    TreeRole    relay + aggregate
//!         /  |  \      /  |  \
//!      LeafRole ...         ...   governor + balancer
//! ```

pub(crate) mod leaf;
pub(crate) mod policy;
pub(crate) mod step;
pub(crate) mod trace;
pub(crate) mod tree;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::consts::{
    CONTROL_POWER_PACKAGE_LIMIT, PLUGIN_NAME, SIGNAL_POWER_PACKAGE_MAX, SIGNAL_POWER_PACKAGE_MIN,
    SIGNAL_POWER_PACKAGE_TDP,
};
use crate::errors::{Error, Result};
use crate::platform::{Domain, PlatformIo, PowerBalancer, PowerGovernor};
use leaf::LeafRole;
use policy::{Policy, Sample};
use trace::TraceRow;
use tree::{RootRole, TreeRole};

/// The one role a node plays in the tree, chosen at [`PowerBalancerAgent::init`].
#[derive(Debug)]
pub(crate) enum Role {
    Leaf(LeafRole),
    Tree(TreeRole),
    Root(RootRole),
}

impl Role {
    fn descend(&mut self, in_policy: &Policy, out_policy: &mut [Policy]) -> Result<bool> {
        match self {
            Role::Tree(role) => role.descend(in_policy, out_policy),
            Role::Root(role) => role.descend(in_policy, out_policy),
            Role::Leaf(_) => {
                debug_assert!(false, "descend called on a leaf role");
                Ok(false)
            }
        }
    }

    fn ascend(&mut self, in_sample: &[Sample], out_sample: &mut Sample) -> Result<bool> {
        match self {
            Role::Tree(role) => role.ascend(in_sample, out_sample),
            Role::Root(role) => role.ascend(in_sample, out_sample),
            Role::Leaf(_) => {
                debug_assert!(false, "ascend called on a leaf role");
                Ok(false)
            }
        }
    }

    fn adjust_platform(&mut self, in_policy: &Policy) -> Result<bool> {
        match self {
            Role::Leaf(role) => role.adjust_platform(in_policy),
            _ => {
                debug_assert!(false, "adjust_platform called on a non-leaf role");
                Ok(false)
            }
        }
    }

    fn sample_platform(&mut self, out_sample: &mut Sample) -> Result<bool> {
        match self {
            Role::Leaf(role) => role.sample_platform(out_sample),
            _ => {
                debug_assert!(false, "sample_platform called on a non-leaf role");
                Ok(false)
            }
        }
    }

    fn trace_values(&self, values: &mut TraceRow) {
        match self {
            Role::Leaf(role) => role.trace_values(values),
            _ => debug_assert!(false, "trace_values called on a non-leaf role"),
        }
    }
}

/// Facade over the Leaf/Tree/Root role hierarchy.
///
/// Exposes the same protocol regardless of role; calls that do not apply to
/// the active role are benign no-ops (and assertion failures in debug
/// builds, since they indicate an integration bug).
pub struct PowerBalancerAgent {
    platform: Arc<dyn PlatformIo>,
    role: Option<Role>,
    // Collaborators held until init decides whether this node is a leaf.
    governor: Option<Box<dyn PowerGovernor>>,
    balancer: Option<Box<dyn PowerBalancer>>,
    config: AgentConfig,
    last_wait: Instant,
    power_tdp: f64,
    do_send_policy: bool,
    do_send_sample: bool,
    do_write_batch: bool,
}

impl PowerBalancerAgent {
    /// Create an uninitialized agent. The governor and balancer are only
    /// required on nodes that will become leaves.
    pub fn new(
        platform: Arc<dyn PlatformIo>,
        governor: Option<Box<dyn PowerGovernor>>,
        balancer: Option<Box<dyn PowerBalancer>>,
        config: AgentConfig,
    ) -> Result<Self> {
        let power_tdp = platform.read_signal(SIGNAL_POWER_PACKAGE_TDP, Domain::Board, 0)?;
        Ok(Self {
            platform,
            role: None,
            governor,
            balancer,
            config,
            last_wait: Instant::now(),
            power_tdp,
            do_send_policy: false,
            do_send_sample: false,
            do_write_batch: false,
        })
    }

    /// Select this node's role from its tree level. Called exactly once.
    pub fn init(&mut self, level: usize, fan_in: &[usize]) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if fan_in.is_empty() {
            warn!("single node job detected, use the governor directly");
            if level != 0 {
                return Err(Error::InvalidLevel { level, depth: 0 });
            }
        }
        let role = if level == 0 {
            let governor = self
                .governor
                .take()
                .ok_or(Error::MissingCollaborator("power governor"))?;
            let mut balancer = self
                .balancer
                .take()
                .ok_or(Error::MissingCollaborator("power balancer"))?;
            let averaging_window =
                self.config.stability_factor * governor.power_package_time_window();
            balancer.averaging_window(averaging_window);
            info!(averaging_window, "initializing leaf role");
            Role::Leaf(LeafRole::new(Arc::clone(&self.platform), governor, balancer)?)
        } else if level == fan_in.len() {
            let num_pkg = self
                .platform
                .num_domain(self.platform.control_domain_type(CONTROL_POWER_PACKAGE_LIMIT)?);
            let min_power = num_pkg as f64
                * self
                    .platform
                    .read_signal(SIGNAL_POWER_PACKAGE_MIN, Domain::Package, 0)?;
            let max_power = num_pkg as f64
                * self
                    .platform
                    .read_signal(SIGNAL_POWER_PACKAGE_MAX, Domain::Package, 0)?;
            info!(level, min_power, max_power, "initializing root role");
            Role::Root(RootRole::new(level, fan_in, min_power, max_power)?)
        } else {
            info!(level, "initializing tree role");
            Role::Tree(TreeRole::new(level, fan_in)?)
        };
        self.role = Some(role);
        Ok(())
    }

    /// Relay a policy toward the children; see [`Role`] dispatch.
    pub fn split_policy(&mut self, in_policy: &Policy, out_policy: &mut [Policy]) -> Result<()> {
        self.do_send_policy = match self.role.as_mut() {
            Some(role) => role.descend(in_policy, out_policy)?,
            None => false,
        };
        Ok(())
    }

    /// Whether the last `split_policy` produced child policies to send.
    pub fn do_send_policy(&self) -> bool {
        self.do_send_policy
    }

    /// Aggregate children samples toward the parent.
    pub fn aggregate_sample(&mut self, in_sample: &[Sample], out_sample: &mut Sample) -> Result<()> {
        self.do_send_sample = match self.role.as_mut() {
            Some(role) => role.ascend(in_sample, out_sample)?,
            None => false,
        };
        Ok(())
    }

    /// Whether the last aggregation (or leaf sampling) completed a step.
    pub fn do_send_sample(&self) -> bool {
        self.do_send_sample
    }

    /// Apply a policy to the local platform (leaf only).
    pub fn adjust_platform(&mut self, in_policy: &Policy) -> Result<()> {
        self.do_write_batch = match self.role.as_mut() {
            Some(role) => role.adjust_platform(in_policy)?,
            None => false,
        };
        Ok(())
    }

    /// Whether the last `adjust_platform` wrote to hardware.
    pub fn do_write_batch(&self) -> bool {
        self.do_write_batch
    }

    /// Sample the local platform into an outgoing sample (leaf only).
    pub fn sample_platform(&mut self, out_sample: &mut Sample) -> Result<()> {
        self.do_send_sample = match self.role.as_mut() {
            Some(role) => role.sample_platform(out_sample)?,
            None => false,
        };
        Ok(())
    }

    /// Enforce the minimum inter-tick interval. Sleeps only for whatever
    /// remains of the interval since the previous call.
    pub fn wait(&mut self) {
        let elapsed = self.last_wait.elapsed();
        let interval = self.config.wait_interval();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
        self.last_wait = Instant::now();
    }

    /// Validate a policy at the boundary: NaN fields get defaults (TDP for
    /// the budget, zero elsewhere), a non-zero budget is clamped into the
    /// platform's package power range, and an all-zero result is rejected.
    pub fn validate_policy(&self, policy: &mut Policy) -> Result<()> {
        if policy.power_package_limit_total.is_nan() {
            policy.power_package_limit_total = self.power_tdp;
        }
        if policy.step_count.is_nan() {
            policy.step_count = 0.0;
        }
        if policy.max_epoch_runtime.is_nan() {
            policy.max_epoch_runtime = 0.0;
        }
        if policy.power_slack.is_nan() {
            policy.power_slack = 0.0;
        }

        // Zero is a valid budget field outside SEND_DOWN_LIMIT, so only a
        // non-zero budget is clamped.
        if policy.power_package_limit_total != 0.0 {
            let min_power = self
                .platform
                .read_signal(SIGNAL_POWER_PACKAGE_MIN, Domain::Board, 0)?;
            let max_power = self
                .platform
                .read_signal(SIGNAL_POWER_PACKAGE_MAX, Domain::Board, 0)?;
            // Tolerant comparisons: a NaN bound leaves the budget alone.
            if policy.power_package_limit_total > max_power {
                policy.power_package_limit_total = max_power;
            } else if policy.power_package_limit_total < min_power {
                policy.power_package_limit_total = min_power;
            }
        }

        if policy.to_array().iter().all(|field| *field == 0.0) {
            return Err(Error::InvalidPolicy);
        }
        Ok(())
    }

    /// Statically apply a policy's budget, split evenly across the control
    /// domains. Used when the agent enforces a policy without running the
    /// balancing loop.
    pub fn enforce_policy(&self, policy: &Policy) -> Result<()> {
        let control_domain = self.platform.control_domain_type(CONTROL_POWER_PACKAGE_LIMIT)?;
        let num_domain = self.platform.num_domain(control_domain);
        let per_domain_limit = policy.power_package_limit_total / num_domain as f64;
        self.platform
            .write_control(CONTROL_POWER_PACKAGE_LIMIT, Domain::Board, 0, per_domain_limit)
    }

    /// Fill the diagnostic trace row (leaf only).
    pub fn trace_values(&self, values: &mut TraceRow) {
        if let Some(role) = self.role.as_ref() {
            role.trace_values(values);
        }
    }

    pub fn report_header(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    pub fn report_host(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    pub fn report_region(&self) -> BTreeMap<u64, Vec<(String, String)>> {
        BTreeMap::new()
    }

    pub fn plugin_name() -> &'static str {
        PLUGIN_NAME
    }

    /// Policy field names declared for upstream configuration validation.
    pub fn policy_names() -> [&'static str; policy::NUM_POLICY] {
        Policy::names()
    }

    /// Sample field names declared for upstream configuration validation.
    pub fn sample_names() -> [&'static str; policy::NUM_SAMPLE] {
        Sample::names()
    }
}

impl std::fmt::Debug for PowerBalancerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerBalancerAgent")
            .field("role", &self.role)
            .field("power_tdp", &self.power_tdp)
            .field("do_send_policy", &self.do_send_policy)
            .field("do_send_sample", &self.do_send_sample)
            .field("do_write_batch", &self.do_write_batch)
            .finish_non_exhaustive()
    }
}
