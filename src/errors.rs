use thiserror::Error;

/// Errors surfaced by the balancing agent.
///
/// Every variant is a protocol or configuration violation: the control loop
/// treats them as fatal and does not retry. Internal contract violations
/// (wrong vector sizes, role methods called on the wrong role kind) are
/// guarded by `debug_assert!` instead and never reach this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The policy step received from the parent is not the local step's
    /// successor. Protects against missed or duplicated ticks.
    #[error("policy step {incoming} is out of sync with agent step {local}")]
    StepOutOfSync { incoming: i64, local: i64 },

    /// An aggregated sample completed a step the root is not currently in.
    #[error("sample step count {sample} does not match agent step count {local}")]
    SampleStepMismatch { sample: i64, local: i64 },

    /// The externally supplied power budget is outside the configured
    /// package power range.
    #[error("invalid power budget: {cap} W outside {min} W..{max} W")]
    InvalidBudget { cap: f64, min: f64, max: f64 },

    /// A policy resolved to all zeros after default substitution.
    #[error("invalid policy: all fields zero after default substitution")]
    InvalidPolicy,

    /// A step-count trace column carried a negative value.
    #[error("step count signal is negative: {0}")]
    NegativeStepCount(f64),

    /// The node's tree level does not fit the configured fan-in sequence.
    #[error("level {level} is invalid for a fan-in sequence of depth {depth}")]
    InvalidLevel { level: usize, depth: usize },

    /// `init` was called a second time on the same agent.
    #[error("agent role already initialized")]
    AlreadyInitialized,

    /// A leaf role was requested without the collaborator it needs.
    #[error("leaf role requires a {0}")]
    MissingCollaborator(&'static str),

    /// The platform has no signal registered under this name.
    #[error("unknown platform signal: {0}")]
    UnknownSignal(String),

    /// The platform has no control registered under this name.
    #[error("unknown platform control: {0}")]
    UnknownControl(String),

    /// A signal index was sampled without a prior `push_signal`.
    #[error("signal index {0} was never pushed")]
    BadSignalIndex(usize),

    /// Error propagated from the platform I/O layer.
    #[error("platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, Error>;
