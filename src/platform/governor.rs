//! Governor interface: the hardware power clamp.

use crate::errors::Result;

/// Outcome of a governor adjustment request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorAdjust {
    /// Whether hardware state actually changed.
    pub wrote: bool,
    /// The power limit the hardware will enforce. Equals the request unless
    /// clamped by the governor's bounds.
    pub actual: f64,
}

/// Enforces node power limits on hardware, clamping requests to what the
/// platform can achieve.
pub trait PowerGovernor {
    /// Register the governor's own signals and controls with the platform.
    fn init_platform_io(&mut self) -> Result<()>;

    /// Advance the governor's own sampling. Called once per tick from the
    /// agent's sample path.
    fn sample_platform(&mut self) -> Result<()>;

    /// Request a total node power limit. Returns whether a hardware write
    /// occurred and the limit actually achievable.
    fn adjust_platform(&mut self, node_power_request: f64) -> Result<GovernorAdjust>;

    /// Set the min and max package power bounds the governor clamps to.
    fn set_power_bounds(&mut self, min_pkg_power: f64, max_pkg_power: f64);

    /// Time window, in seconds, over which the package power control
    /// averages.
    fn power_package_time_window(&self) -> f64;
}
