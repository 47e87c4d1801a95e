//! Future-event records.
//!
//! Everything that can sit in the future-events queue is an [`EventRecord`]:
//! shared metadata ([`EventMeta`]) plus a closed [`EventBody`] union with one
//! variant per event kind. The run loop dispatches by exhaustive match, so an
//! unknown event kind cannot reach the queue. Records live in the simulation
//! context's arena; the queue holds keys, never owning pointers.

use crate::error::SimResult;
use crate::id::{ModuleId, ParticleId, ParticleKey, TimerKey};
use crate::sim::SimContext;
use crate::time::SimTime;
use std::any::Any;
use std::fmt;

// ---------------------------------------------------------------------------
// Behavior hooks (particle-centric dispatch)
// ---------------------------------------------------------------------------

/// Handling logic carried by a timer itself, invoked by the engine under the
/// particle-centric pattern instead of the owning module's hook.
pub trait TimerBehavior: Any {
    fn on_triggered(&mut self, ctx: &mut SimContext, timer: TimerKey) -> SimResult<()> {
        let _ = (ctx, timer);
        Ok(())
    }
}

/// Handling logic carried by a particle itself, invoked on arrival under the
/// particle-centric pattern.
pub trait ParticleBehavior: Any {
    fn on_arrival(&mut self, ctx: &mut SimContext, particle: ParticleKey) -> SimResult<()> {
        let _ = (ctx, particle);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event data
// ---------------------------------------------------------------------------

/// Fields shared by every event kind, embedded by value.
#[derive(Debug, Clone)]
pub struct EventMeta {
    pub name: String,
    pub kind: i32,
    /// When the event fires. For a particle this doubles as its time of
    /// arrival at `next_module`.
    pub occurrence: SimTime,
    /// True iff the event currently sits in the future-events queue.
    pub scheduled: bool,
    pub created_at: SimTime,
    /// The module being processed when the event was constructed, if any.
    pub created_by: Option<ModuleId>,
}

impl EventMeta {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: i32,
        created_at: SimTime,
        created_by: Option<ModuleId>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            occurrence: SimTime::ZERO,
            scheduled: false,
            created_at,
            created_by,
        }
    }
}

/// State specific to a module timer.
pub struct TimerState {
    /// The module whose timeout this is. Required before scheduling.
    pub owner: Option<ModuleId>,
    /// Opaque payload for the owner's own use.
    pub attachment: Option<Box<dyn Any>>,
    /// Particle-centric handling logic, if any.
    pub behavior: Option<Box<dyn TimerBehavior>>,
}

impl TimerState {
    fn new(owner: Option<ModuleId>) -> Self {
        Self {
            owner,
            attachment: None,
            behavior: None,
        }
    }
}

impl fmt::Debug for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerState")
            .field("owner", &self.owner)
            .field("attachment", &self.attachment.is_some())
            .field("behavior", &self.behavior.is_some())
            .finish()
    }
}

/// State specific to a moving particle. A particle is simultaneously a
/// simulated entity and its own arrival event.
pub struct ParticleState {
    pub id: ParticleId,
    /// The module the particle last departed from.
    pub previous_module: Option<ModuleId>,
    /// The module the particle is heading to (or sitting in).
    pub next_module: Option<ModuleId>,
    /// Arrival time at `previous_module`.
    pub previous_arrival: SimTime,
    /// Particle-centric handling logic, if any.
    pub behavior: Option<Box<dyn ParticleBehavior>>,
}

impl ParticleState {
    fn new(id: ParticleId, next_module: Option<ModuleId>) -> Self {
        Self {
            id,
            previous_module: None,
            next_module,
            previous_arrival: SimTime::ZERO,
            behavior: None,
        }
    }
}

impl fmt::Debug for ParticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleState")
            .field("id", &self.id)
            .field("previous_module", &self.previous_module)
            .field("next_module", &self.next_module)
            .field("previous_arrival", &self.previous_arrival)
            .field("behavior", &self.behavior.is_some())
            .finish()
    }
}

/// The closed set of event kinds.
#[derive(Debug)]
pub enum EventBody {
    Timer(TimerState),
    Particle(ParticleState),
}

impl EventBody {
    pub fn as_timer(&self) -> Option<&TimerState> {
        match self {
            EventBody::Timer(t) => Some(t),
            EventBody::Particle(_) => None,
        }
    }

    pub fn as_timer_mut(&mut self) -> Option<&mut TimerState> {
        match self {
            EventBody::Timer(t) => Some(t),
            EventBody::Particle(_) => None,
        }
    }

    pub fn as_particle(&self) -> Option<&ParticleState> {
        match self {
            EventBody::Particle(p) => Some(p),
            EventBody::Timer(_) => None,
        }
    }

    pub fn as_particle_mut(&mut self) -> Option<&mut ParticleState> {
        match self {
            EventBody::Particle(p) => Some(p),
            EventBody::Timer(_) => None,
        }
    }
}

/// A complete event as stored in the context's arena.
#[derive(Debug)]
pub struct EventRecord {
    pub meta: EventMeta,
    pub body: EventBody,
}

impl EventRecord {
    pub(crate) fn timer(
        name: impl Into<String>,
        kind: i32,
        created_at: SimTime,
        created_by: Option<ModuleId>,
        owner: Option<ModuleId>,
    ) -> Self {
        Self {
            meta: EventMeta::new(name, kind, created_at, created_by),
            body: EventBody::Timer(TimerState::new(owner)),
        }
    }

    pub(crate) fn particle(
        name: impl Into<String>,
        kind: i32,
        created_at: SimTime,
        created_by: Option<ModuleId>,
        id: ParticleId,
        next_module: Option<ModuleId>,
    ) -> Self {
        Self {
            meta: EventMeta::new(name, kind, created_at, created_by),
            body: EventBody::Particle(ParticleState::new(id, next_module)),
        }
    }
}
