//! Collaborator interfaces at the hardware boundary.
//!
//! The agent core never touches hardware directly. Everything it needs is
//! expressed through three traits:
//! - [`PlatformIo`]: register-and-read named telemetry signals, write named
//!   controls, query domain topology.
//! - [`PowerGovernor`]: clamp a requested node power limit to what the
//!   hardware can enforce.
//! - [`PowerBalancer`]: the per-node adaptive algorithm turning runtime
//!   history into power limit adjustments.
//!
//! Production implementations live outside this crate; [`mock`] provides
//! scriptable stand-ins for tests and simulation.

pub mod balancer;
pub mod governor;
pub mod mock;

pub use balancer::PowerBalancer;
pub use governor::{GovernorAdjust, PowerGovernor};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Hardware domain a signal or control is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// The whole compute node.
    Board,
    /// One processor package.
    Package,
}

/// Handle returned by [`PlatformIo::push_signal`], used for batched reads.
pub type SignalIdx = usize;

/// Register-and-read access to platform telemetry and controls.
///
/// Methods take `&self`; implementations are expected to manage their own
/// interior mutability, the same way a batched hardware I/O session would.
pub trait PlatformIo: Send + Sync {
    /// Register a named signal for batched sampling. Returns a handle for
    /// later [`sample`](Self::sample) calls.
    fn push_signal(&self, name: &str, domain: Domain, domain_idx: usize) -> Result<SignalIdx>;

    /// Read the latest value of a previously pushed signal.
    fn sample(&self, idx: SignalIdx) -> Result<f64>;

    /// Read a named signal immediately, outside the batch.
    fn read_signal(&self, name: &str, domain: Domain, domain_idx: usize) -> Result<f64>;

    /// Write a named control.
    fn write_control(&self, name: &str, domain: Domain, domain_idx: usize, value: f64)
        -> Result<()>;

    /// Domain a named control is natively scoped to.
    fn control_domain_type(&self, name: &str) -> Result<Domain>;

    /// Number of instances of a domain on this node.
    fn num_domain(&self, domain: Domain) -> usize;
}
