//! Engine error type.
//!
//! Every variant is a contract violation, not a transient condition: the
//! engine performs no retries, and an error from `simulate` aborts the run.
//! Variants carry the offending IDs and values so a failure can be diagnosed
//! from the message alone.

use crate::graph::GraphError;
use crate::id::ModuleId;
use crate::sim::{SimulationPattern, SimulationStage};
use crate::time::SimTime;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// `simulate` was invoked before a topology graph was assigned.
    #[error("simulate called before a topology was initiated")]
    NoTopology,

    /// A scheduling primitive was used while no simulation is active.
    #[error("{operation} requires an active simulation (stage is Out)")]
    NotSimulating { operation: &'static str },

    /// `cleanup` was invoked mid-run.
    #[error("cleanup refused: a simulation is currently running")]
    CleanupWhileSimulating,

    /// A stage-restricted module hook was invoked out of stage.
    #[error("{operation} is legal only during {expected:?}, current stage is {actual:?}")]
    StageMismatch {
        operation: &'static str,
        expected: SimulationStage,
        actual: SimulationStage,
    },

    /// A pattern-restricted hook was invoked under the other dispatch pattern.
    #[error("{operation} is legal only under {expected:?}, configured pattern is {actual:?}")]
    PatternMismatch {
        operation: &'static str,
        expected: SimulationPattern,
        actual: SimulationPattern,
    },

    /// An event key did not resolve in the event arena.
    #[error("{operation}: unknown or destroyed event")]
    UnknownEvent { operation: &'static str },

    /// An event was scheduled while already sitting in the queue.
    #[error("event is already scheduled at {occurrence}")]
    AlreadyScheduled { occurrence: SimTime },

    /// A timer was scheduled before an owning module was set.
    #[error("timer cannot be scheduled without an owning module")]
    TimerWithoutOwner,

    /// An event was destroyed while still scheduled during an active run.
    #[error("event destroyed while scheduled during an active simulation")]
    DestroyWhileScheduled,

    /// A popped queue entry referred to an event whose scheduled flag was
    /// already clear. Indicates misuse of the raw scheduling primitives.
    #[error("future-events queue corrupted: popped an unscheduled event")]
    QueueCorrupted,

    /// A popped event would have moved the clock backward.
    #[error("causality violation: event at {event_time} behind clock {clock}")]
    CausalityViolation { event_time: SimTime, clock: SimTime },

    /// A particle reached the dispatcher with no destination module.
    #[error("particle has no destination module")]
    ParticleWithoutDestination,

    /// A timer fired whose owning module is not in the topology.
    #[error("module not found: {0:?}")]
    ModuleNotFound(ModuleId),

    /// A module-centric event reached a module that does not override the
    /// required hook.
    #[error("module {module:?} ({name}) does not handle {operation}")]
    UnhandledParticle {
        module: ModuleId,
        name: String,
        operation: &'static str,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type SimResult<T> = Result<T, SimError>;
