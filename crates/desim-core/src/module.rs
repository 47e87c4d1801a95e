//! Simulated modules.
//!
//! A module is a stationary simulated entity: uniquely identified, aware of
//! its topology neighbors, and reacting to events through overridable hooks.
//! Shared state lives in [`ModuleBase`], embedded by value in each concrete
//! module; behavior comes from the [`SimModule`] trait. The engine never
//! calls the hooks directly — it goes through the `sim_*` wrappers below,
//! which validate the current stage or dispatch pattern first.

use crate::error::{SimError, SimResult};
use crate::graph::VertexKey;
use crate::id::{ModuleId, ParticleKey, TimerKey};
use crate::sim::{SimContext, SimulationPattern, SimulationStage};
use std::any::Any;
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Shared module state
// ---------------------------------------------------------------------------

/// Identity, neighbor lists, and event bookkeeping common to every module.
///
/// The particle and timer sets are bookkeeping only: the future-events queue
/// is authoritative for scheduling. Neighbor vectors are written once by the
/// simulator at topology initiation and read-only afterwards.
#[derive(Debug)]
pub struct ModuleBase {
    id: ModuleId,
    name: String,
    kind: i32,
    particles: BTreeSet<ParticleKey>,
    timers: BTreeSet<TimerKey>,
    sources: Vec<ModuleId>,
    destinations: Vec<ModuleId>,
}

impl ModuleBase {
    pub fn new(id: ModuleId, kind: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            particles: BTreeSet::new(),
            timers: BTreeSet::new(),
            sources: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    /// Modules that may send particles here, in topology order.
    pub fn sources(&self) -> &[ModuleId] {
        &self.sources
    }

    /// Modules particles may be forwarded to, in topology order.
    pub fn destinations(&self) -> &[ModuleId] {
        &self.destinations
    }

    pub fn sources_nb(&self) -> usize {
        self.sources.len()
    }

    pub fn destinations_nb(&self) -> usize {
        self.destinations.len()
    }

    pub fn source(&self, index: usize) -> Option<ModuleId> {
        self.sources.get(index).copied()
    }

    pub fn destination(&self, index: usize) -> Option<ModuleId> {
        self.destinations.get(index).copied()
    }

    /// Particles currently captured inside this module.
    pub fn captured_particles(&self) -> &BTreeSet<ParticleKey> {
        &self.particles
    }

    pub fn holds_particle(&self, particle: ParticleKey) -> bool {
        self.particles.contains(&particle)
    }

    /// Timers this module is currently tracking.
    pub fn active_timers(&self) -> &BTreeSet<TimerKey> {
        &self.timers
    }

    /// Record a timer as active for this module. The engine drops the entry
    /// when the timer fires; module code drops it on cancellation.
    pub fn track_timer(&mut self, timer: TimerKey) {
        self.timers.insert(timer);
    }

    pub fn untrack_timer(&mut self, timer: TimerKey) {
        self.timers.remove(&timer);
    }

    pub(crate) fn capture_particle(&mut self, particle: ParticleKey) {
        self.particles.insert(particle);
    }

    pub(crate) fn release_particle(&mut self, particle: ParticleKey) {
        self.particles.remove(&particle);
    }

    pub(crate) fn set_neighbours(&mut self, sources: Vec<ModuleId>, destinations: Vec<ModuleId>) {
        self.sources = sources;
        self.destinations = destinations;
    }
}

// ---------------------------------------------------------------------------
// Module behavior trait
// ---------------------------------------------------------------------------

/// A concrete simulated module.
///
/// Implementors embed a [`ModuleBase`] and override the hooks they care
/// about. `handle_particle_arrival` and `handle_particle_departure` have
/// failing defaults: a module-centric module that receives particles must
/// say what to do with them. The rest default to no-ops.
pub trait SimModule {
    fn base(&self) -> &ModuleBase;
    fn base_mut(&mut self) -> &mut ModuleBase;

    /// Called once per run at the start of the initialization stage.
    fn get_ready(&mut self, ctx: &mut SimContext) -> SimResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called once per run during post-processing.
    fn terminate(&mut self, ctx: &mut SimContext) -> SimResult<()> {
        let _ = ctx;
        Ok(())
    }

    fn handle_particle_arrival(
        &mut self,
        ctx: &mut SimContext,
        particle: ParticleKey,
    ) -> SimResult<()> {
        let _ = (ctx, particle);
        Err(unhandled(self.base(), "handle_particle_arrival"))
    }

    fn handle_particle_departure(
        &mut self,
        ctx: &mut SimContext,
        particle: ParticleKey,
    ) -> SimResult<()> {
        let _ = (ctx, particle);
        Err(unhandled(self.base(), "handle_particle_departure"))
    }

    fn handle_timer_triggering(&mut self, ctx: &mut SimContext, timer: TimerKey) -> SimResult<()> {
        let _ = (ctx, timer);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

fn unhandled(base: &ModuleBase, operation: &'static str) -> SimError {
    SimError::UnhandledParticle {
        module: base.id(),
        name: base.name().to_owned(),
        operation,
    }
}

/// Modules are graph vertices keyed by their own unique ID.
impl VertexKey for Box<dyn SimModule> {
    type Key = ModuleId;
    fn vertex_key(&self) -> ModuleId {
        self.base().id()
    }
}

// ---------------------------------------------------------------------------
// Engine capability wrappers
// ---------------------------------------------------------------------------
//
// Each wrapper validates the context before delegating to the overridable
// hook, so out-of-stage and wrong-pattern invocations fail instead of
// silently executing.

fn require_stage(
    ctx: &SimContext,
    operation: &'static str,
    expected: SimulationStage,
) -> SimResult<()> {
    if ctx.stage() != expected {
        return Err(SimError::StageMismatch {
            operation,
            expected,
            actual: ctx.stage(),
        });
    }
    Ok(())
}

fn require_module_centric(ctx: &SimContext, operation: &'static str) -> SimResult<()> {
    if ctx.pattern() != SimulationPattern::ModuleCentric {
        return Err(SimError::PatternMismatch {
            operation,
            expected: SimulationPattern::ModuleCentric,
            actual: ctx.pattern(),
        });
    }
    Ok(())
}

pub(crate) fn sim_get_ready(module: &mut dyn SimModule, ctx: &mut SimContext) -> SimResult<()> {
    require_stage(ctx, "get_ready", SimulationStage::Initialization)?;
    module.get_ready(ctx)
}

pub(crate) fn sim_terminate(module: &mut dyn SimModule, ctx: &mut SimContext) -> SimResult<()> {
    require_stage(ctx, "terminate", SimulationStage::PostProcessing)?;
    module.terminate(ctx)
}

pub(crate) fn sim_handle_particle_arrival(
    module: &mut dyn SimModule,
    ctx: &mut SimContext,
    particle: ParticleKey,
) -> SimResult<()> {
    require_module_centric(ctx, "handle_particle_arrival")?;
    module.base_mut().capture_particle(particle);
    module.handle_particle_arrival(ctx, particle)
}

pub(crate) fn sim_handle_timer_triggering(
    module: &mut dyn SimModule,
    ctx: &mut SimContext,
    timer: TimerKey,
) -> SimResult<()> {
    require_module_centric(ctx, "handle_timer_triggering")?;
    module.base_mut().untrack_timer(timer);
    module.handle_timer_triggering(ctx, timer)
}

/// Departure path used by module code itself when forwarding a particle on:
/// releases the particle from the module's bookkeeping, then runs the
/// departure hook. Module-centric only, like the arrival path.
pub fn notify_particle_departure(
    module: &mut dyn SimModule,
    ctx: &mut SimContext,
    particle: ParticleKey,
) -> SimResult<()> {
    require_module_centric(ctx, "handle_particle_departure")?;
    module.base_mut().release_particle(particle);
    module.handle_particle_departure(ctx, particle)
}
