use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Arena key for an event record in the simulation context.
    pub struct EventKey;
}

/// Identifies a stationary simulated module. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

/// Identifies a transient moving particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticleId(pub u64);

/// Identifies a vertex in a [`crate::graph::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub u64);

impl From<ModuleId> for VertexId {
    fn from(id: ModuleId) -> Self {
        VertexId(id.0)
    }
}

/// Typed handle to a timer event. Wraps the underlying arena key so the
/// scheduling API cannot confuse timers and particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey(pub(crate) EventKey);

/// Typed handle to a moving-particle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticleKey(pub(crate) EventKey);

impl From<TimerKey> for EventKey {
    fn from(k: TimerKey) -> Self {
        k.0
    }
}

impl From<ParticleKey> for EventKey {
    fn from(k: ParticleKey) -> Self {
        k.0
    }
}

/// Explicit, caller-owned ID source.
///
/// Replaces a process-wide generator singleton: each scenario constructs its
/// own allocator and threads it through module construction, so independent
/// simulations never share counters and tests stay deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdAllocator {
    next_module: u64,
    next_particle: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next module ID.
    pub fn module_id(&mut self) -> ModuleId {
        let id = ModuleId(self.next_module);
        self.next_module += 1;
        id
    }

    /// Allocate the next particle ID.
    pub fn particle_id(&mut self) -> ParticleId {
        let id = ParticleId(self.next_particle);
        self.next_particle += 1;
        id
    }

    /// Number of module IDs handed out so far.
    pub fn modules_allocated(&self) -> u64 {
        self.next_module
    }

    /// Restart both sequences from zero.
    pub fn reset(&mut self) {
        self.next_module = 0;
        self.next_particle = 0;
    }
}
