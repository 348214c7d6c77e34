//! Balancer interface: the per-node adaptive power-limit algorithm.

/// Turns per-node runtime history into power limit adjustments.
///
/// The agent drives this object through the three-phase step cycle: it
/// receives a cap when a budget arrives, a target runtime in the reduce
/// phase, and measured balanced epoch runtimes every epoch.
pub trait PowerBalancer {
    /// Size the runtime averaging window, in seconds. Set once at agent
    /// initialization from the governor's control time window.
    fn averaging_window(&mut self, window: f64);

    /// Set the node's power cap. Resets the balancer's trial limit.
    fn power_cap(&mut self, cap: f64);

    /// Set the epoch runtime the balancer should steer toward.
    fn target_runtime(&mut self, target: f64);

    /// The power limit the balancer currently wants enforced. NaN until a
    /// cap has been set.
    fn power_limit(&self) -> f64;

    /// Notice that the governor achieved `limit` rather than the requested
    /// value.
    fn power_limit_adjusted(&mut self, limit: f64);

    /// Feed one balanced epoch runtime measurement; returns whether the
    /// runtime estimate has stabilized.
    fn is_runtime_stable(&mut self, measured_runtime: f64) -> bool;

    /// Recompute the runtime sample from the measurements fed so far.
    fn calculate_runtime_sample(&mut self);

    /// The current runtime sample.
    fn runtime_sample(&self) -> f64;

    /// Feed one balanced epoch runtime measurement; returns whether the
    /// target runtime has been met.
    fn is_target_met(&mut self, measured_runtime: f64) -> bool;

    /// Power the node could give up without exceeding its target runtime.
    fn power_slack(&self) -> f64;
}
