//! The simulation engine: context, stages, future-events queue, dispatch.
//!
//! [`SimContext`] is an explicitly constructed context object — pattern,
//! stage, clock, event arena, and the priority queue of future events — that
//! is threaded through every hook. Two independent simulations never share
//! state. [`Simulator`] pairs a context with the topology graph and drives
//! the stage machine: per run, an initialization sweep, the pop-dispatch
//! loop, and a termination sweep.

use crate::error::{SimError, SimResult};
use crate::event::{EventBody, EventRecord, ParticleBehavior, TimerBehavior};
use crate::graph::{ArcId, Graph};
use crate::id::{EventKey, ModuleId, ParticleId, ParticleKey, TimerKey, VertexId};
use crate::module::{self, SimModule};
use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Where event-handling logic lives: on the modules or on the events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimulationPattern {
    #[default]
    ModuleCentric,
    ParticleCentric,
}

/// The stage machine governing which hooks are legal to invoke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimulationStage {
    #[default]
    Out,
    Initialization,
    Running,
    PostProcessing,
}

/// The topology the simulator runs over: modules as vertices, keyed by their
/// own IDs, with plain arc weights.
pub type Topology = Graph<Box<dyn SimModule>, i32>;

impl Topology {
    /// Insert a module as a vertex whose graph ID is the module's own ID.
    pub fn add_module(&mut self, module: Box<dyn SimModule>) -> ModuleId {
        let id = module.base().id();
        self.add_vertex_with_id(module, id.into());
        id
    }

    /// Declare that particles may flow from one module to another.
    pub fn connect_modules(&mut self, from: ModuleId, to: ModuleId) -> Option<ArcId> {
        self.connect(from.into(), to.into(), 0)
    }
}

// ---------------------------------------------------------------------------
// Future-events queue
// ---------------------------------------------------------------------------

/// One queue slot: occurrence time, insertion sequence, arena key.
///
/// Ordering is reversed so `BinaryHeap` (a max-heap) pops the earliest time
/// first; the monotonically increasing sequence number breaks ties FIFO, so
/// equal-time dispatch order is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    time: SimTime,
    seq: u64,
    key: EventKey,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Simulation context
// ---------------------------------------------------------------------------

/// All mutable engine state apart from the topology graph.
///
/// Hooks receive `&mut SimContext`, which lets them create, schedule, and
/// cancel events synchronously while the dispatch loop is mid-iteration;
/// the loop itself never holds a borrow into the arena across a hook call.
pub struct SimContext {
    pattern: SimulationPattern,
    stage: SimulationStage,
    clock: SimTime,
    /// The module whose event is being dispatched right now. Events created
    /// inside a hook read their creator (and a particle its first
    /// destination) from here.
    processed: Option<ModuleId>,
    events: SlotMap<EventKey, EventRecord>,
    queue: BinaryHeap<QueueEntry>,
    next_seq: u64,
    next_particle: u64,
}

impl SimContext {
    pub fn new(pattern: SimulationPattern) -> Self {
        Self {
            pattern,
            stage: SimulationStage::Out,
            clock: SimTime::ZERO,
            processed: None,
            events: SlotMap::with_key(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_particle: 0,
        }
    }

    pub fn pattern(&self) -> SimulationPattern {
        self.pattern
    }

    pub fn stage(&self) -> SimulationStage {
        self.stage
    }

    /// True while a run is active in any stage past `Out`.
    pub fn is_simulating(&self) -> bool {
        self.stage != SimulationStage::Out
    }

    pub fn clock(&self) -> SimTime {
        self.clock
    }

    /// The module currently being processed by the dispatch loop, if any.
    pub fn processed_module(&self) -> Option<ModuleId> {
        self.processed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of event records currently alive in the arena, queued or not.
    pub fn events_alive(&self) -> usize {
        self.events.len()
    }

    /// Occurrence time of the earliest queued event.
    pub fn peek_next_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|e| e.time)
    }

    pub(crate) fn set_stage(&mut self, stage: SimulationStage) {
        self.stage = stage;
    }

    /// Force a stage transition from outside the engine, so external tests
    /// can seed or cancel events between runs. Test scaffolding only.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_stage_for_test(&mut self, stage: SimulationStage) {
        self.stage = stage;
    }

    pub(crate) fn set_pattern(&mut self, pattern: SimulationPattern) {
        self.pattern = pattern;
    }

    pub(crate) fn set_processed(&mut self, module: Option<ModuleId>) {
        self.processed = module;
    }

    // -----------------------------------------------------------------------
    // Event construction
    // -----------------------------------------------------------------------

    /// Create a detached timer. Creation time is the current clock; creator
    /// and initial owner are the currently processed module.
    pub fn create_timer(&mut self, name: impl Into<String>) -> TimerKey {
        self.create_timer_with(name, 0, None)
    }

    /// `create_timer` with an explicit kind tag and particle-centric
    /// behavior.
    pub fn create_timer_with(
        &mut self,
        name: impl Into<String>,
        kind: i32,
        behavior: Option<Box<dyn TimerBehavior>>,
    ) -> TimerKey {
        let record = EventRecord::timer(name, kind, self.clock, self.processed, self.processed);
        let key = self.events.insert(record);
        if let Some(b) = behavior
            && let Some(t) = self.events[key].body.as_timer_mut()
        {
            t.behavior = Some(b);
        }
        TimerKey(key)
    }

    /// Create a detached particle with a fresh particle ID. Its initial
    /// `next_module` is the currently processed module (the particle starts
    /// where it was created).
    pub fn create_particle(&mut self, name: impl Into<String>) -> ParticleKey {
        self.create_particle_with(name, 0, None)
    }

    pub fn create_particle_with(
        &mut self,
        name: impl Into<String>,
        kind: i32,
        behavior: Option<Box<dyn ParticleBehavior>>,
    ) -> ParticleKey {
        let id = ParticleId(self.next_particle);
        self.next_particle += 1;
        let record =
            EventRecord::particle(name, kind, self.clock, self.processed, id, self.processed);
        let key = self.events.insert(record);
        if let Some(b) = behavior
            && let Some(p) = self.events[key].body.as_particle_mut()
        {
            p.behavior = Some(b);
        }
        ParticleKey(key)
    }

    /// Remove an event from the arena.
    ///
    /// Destroying a still-scheduled event during an active run is an error
    /// (the queue would hold a dangling key). Outside a run the stale queue
    /// entry is spliced out too, so post-`max_time` leftovers can be torn
    /// down safely.
    pub fn destroy_event(&mut self, key: impl Into<EventKey>) -> SimResult<()> {
        let key = key.into();
        let record = self
            .events
            .get(key)
            .ok_or(SimError::UnknownEvent {
                operation: "destroy_event",
            })?;
        if record.meta.scheduled {
            if self.is_simulating() {
                return Err(SimError::DestroyWhileScheduled);
            }
            self.remove_queue_entry(key);
        }
        self.events.remove(key);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Insert an event into the future-events queue at the given time.
    ///
    /// Guards: a simulation must be active, the event must exist, it must
    /// not already be scheduled, and a timer must have an owner.
    pub fn schedule_at(&mut self, key: impl Into<EventKey>, time: SimTime) -> SimResult<()> {
        let key = key.into();
        if !self.is_simulating() {
            return Err(SimError::NotSimulating {
                operation: "schedule_at",
            });
        }
        let record = self.events.get_mut(key).ok_or(SimError::UnknownEvent {
            operation: "schedule_at",
        })?;
        if record.meta.scheduled {
            return Err(SimError::AlreadyScheduled {
                occurrence: record.meta.occurrence,
            });
        }
        if let EventBody::Timer(t) = &record.body
            && t.owner.is_none()
        {
            return Err(SimError::TimerWithoutOwner);
        }
        record.meta.occurrence = time;
        record.meta.scheduled = true;
        let entry = QueueEntry {
            time,
            seq: self.next_seq,
            key,
        };
        self.next_seq += 1;
        self.queue.push(entry);
        Ok(())
    }

    /// Set a timer's owner and schedule it in one step.
    pub fn schedule_timer_for(
        &mut self,
        timer: TimerKey,
        owner: ModuleId,
        time: SimTime,
    ) -> SimResult<()> {
        self.set_timer_owner(timer, owner)?;
        self.schedule_at(timer, time)
    }

    /// Send a particle toward a destination module, arriving at the given
    /// time: the current `next_module` becomes `previous_module`, the
    /// current occurrence time becomes `previous_arrival`, and the particle
    /// is rescheduled as its own arrival event.
    pub fn send(
        &mut self,
        particle: ParticleKey,
        destination: ModuleId,
        arrival: SimTime,
    ) -> SimResult<()> {
        if !self.is_simulating() {
            return Err(SimError::NotSimulating { operation: "send" });
        }
        let record = self
            .events
            .get_mut(particle.0)
            .ok_or(SimError::UnknownEvent { operation: "send" })?;
        if record.meta.scheduled {
            return Err(SimError::AlreadyScheduled {
                occurrence: record.meta.occurrence,
            });
        }
        let occurrence = record.meta.occurrence;
        if let Some(state) = record.body.as_particle_mut() {
            state.previous_module = state.next_module;
            state.previous_arrival = occurrence;
            state.next_module = Some(destination);
        }
        self.schedule_at(particle, arrival)
    }

    /// Remove an event from the queue without firing it. No-op when the
    /// event is not scheduled.
    ///
    /// Implemented as a linear scan-and-rebuild: the heap is drained into a
    /// vector, the target spliced out, and the rest re-heapified. O(n), an
    /// accepted tradeoff while cancellation stays rare relative to firing.
    pub fn cancel(&mut self, key: impl Into<EventKey>) -> SimResult<()> {
        let key = key.into();
        if !self.is_simulating() {
            return Err(SimError::NotSimulating {
                operation: "cancel",
            });
        }
        let record = self.events.get_mut(key).ok_or(SimError::UnknownEvent {
            operation: "cancel",
        })?;
        if !record.meta.scheduled {
            return Ok(());
        }
        record.meta.scheduled = false;
        self.remove_queue_entry(key);
        Ok(())
    }

    fn remove_queue_entry(&mut self, key: EventKey) {
        let entries = std::mem::take(&mut self.queue).into_vec();
        self.queue = entries.into_iter().filter(|e| e.key != key).collect();
    }

    // -----------------------------------------------------------------------
    // Event accessors
    // -----------------------------------------------------------------------

    fn record(&self, key: EventKey, operation: &'static str) -> SimResult<&EventRecord> {
        self.events
            .get(key)
            .ok_or(SimError::UnknownEvent { operation })
    }

    fn record_mut(&mut self, key: EventKey, operation: &'static str) -> SimResult<&mut EventRecord> {
        self.events
            .get_mut(key)
            .ok_or(SimError::UnknownEvent { operation })
    }

    pub fn event_name(&self, key: impl Into<EventKey>) -> SimResult<&str> {
        Ok(&self.record(key.into(), "event_name")?.meta.name)
    }

    pub fn event_kind(&self, key: impl Into<EventKey>) -> SimResult<i32> {
        Ok(self.record(key.into(), "event_kind")?.meta.kind)
    }

    pub fn is_scheduled(&self, key: impl Into<EventKey>) -> SimResult<bool> {
        Ok(self.record(key.into(), "is_scheduled")?.meta.scheduled)
    }

    pub fn occurrence(&self, key: impl Into<EventKey>) -> SimResult<SimTime> {
        Ok(self.record(key.into(), "occurrence")?.meta.occurrence)
    }

    pub fn created_at(&self, key: impl Into<EventKey>) -> SimResult<SimTime> {
        Ok(self.record(key.into(), "created_at")?.meta.created_at)
    }

    pub fn created_by(&self, key: impl Into<EventKey>) -> SimResult<Option<ModuleId>> {
        Ok(self.record(key.into(), "created_by")?.meta.created_by)
    }

    fn timer_state(&self, timer: TimerKey, operation: &'static str) -> SimResult<&crate::event::TimerState> {
        self.record(timer.0, operation)?
            .body
            .as_timer()
            .ok_or(SimError::UnknownEvent { operation })
    }

    fn particle_state(
        &self,
        particle: ParticleKey,
        operation: &'static str,
    ) -> SimResult<&crate::event::ParticleState> {
        self.record(particle.0, operation)?
            .body
            .as_particle()
            .ok_or(SimError::UnknownEvent { operation })
    }

    pub fn timer_owner(&self, timer: TimerKey) -> SimResult<Option<ModuleId>> {
        Ok(self.timer_state(timer, "timer_owner")?.owner)
    }

    pub fn set_timer_owner(&mut self, timer: TimerKey, owner: ModuleId) -> SimResult<()> {
        let record = self.record_mut(timer.0, "set_timer_owner")?;
        if let Some(t) = record.body.as_timer_mut() {
            t.owner = Some(owner);
        }
        Ok(())
    }

    /// Attach opaque data to a timer for its owner to pick up on firing.
    pub fn set_timer_attachment(
        &mut self,
        timer: TimerKey,
        attachment: Box<dyn Any>,
    ) -> SimResult<()> {
        let record = self.record_mut(timer.0, "set_timer_attachment")?;
        if let Some(t) = record.body.as_timer_mut() {
            t.attachment = Some(attachment);
        }
        Ok(())
    }

    pub fn take_timer_attachment(&mut self, timer: TimerKey) -> SimResult<Option<Box<dyn Any>>> {
        let record = self.record_mut(timer.0, "take_timer_attachment")?;
        Ok(record.body.as_timer_mut().and_then(|t| t.attachment.take()))
    }

    pub fn particle_id(&self, particle: ParticleKey) -> SimResult<ParticleId> {
        Ok(self.particle_state(particle, "particle_id")?.id)
    }

    pub fn previous_module(&self, particle: ParticleKey) -> SimResult<Option<ModuleId>> {
        Ok(self.particle_state(particle, "previous_module")?.previous_module)
    }

    pub fn next_module(&self, particle: ParticleKey) -> SimResult<Option<ModuleId>> {
        Ok(self.particle_state(particle, "next_module")?.next_module)
    }

    /// Arrival time at the particle's previous module.
    pub fn previous_arrival(&self, particle: ParticleKey) -> SimResult<SimTime> {
        Ok(self
            .particle_state(particle, "previous_arrival")?
            .previous_arrival)
    }

    /// Arrival time at the particle's next module (its occurrence time).
    pub fn next_arrival(&self, particle: ParticleKey) -> SimResult<SimTime> {
        self.occurrence(particle)
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Owns a [`SimContext`] and the topology, and drives the stage machine.
pub struct Simulator {
    ctx: SimContext,
    graph: Option<Topology>,
}

enum Dispatch {
    ModuleTimer(ModuleId, TimerKey),
    ModuleParticle(ModuleId, ParticleKey),
    EventTimer(ModuleId, TimerKey),
    EventParticle(ModuleId, ParticleKey),
}

impl Simulator {
    pub fn new(pattern: SimulationPattern) -> Self {
        Self {
            ctx: SimContext::new(pattern),
            graph: None,
        }
    }

    pub fn ctx(&self) -> &SimContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut SimContext {
        &mut self.ctx
    }

    pub fn clock(&self) -> SimTime {
        self.ctx.clock
    }

    pub fn stage(&self) -> SimulationStage {
        self.ctx.stage
    }

    pub fn pattern(&self) -> SimulationPattern {
        self.ctx.pattern
    }

    /// Switch dispatch pattern. Refused mid-run: the two patterns route the
    /// same queue to different hooks, and flipping between pops would make
    /// the guards meaningless.
    pub fn set_pattern(&mut self, pattern: SimulationPattern) -> SimResult<()> {
        if self.ctx.is_simulating() {
            return Err(SimError::StageMismatch {
                operation: "set_pattern",
                expected: SimulationStage::Out,
                actual: self.ctx.stage,
            });
        }
        self.ctx.set_pattern(pattern);
        Ok(())
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.graph.as_ref()
    }

    /// Adopt a topology, replacing (and cleaning up) any prior state, and
    /// push each module's predecessor/successor ID lists into it.
    pub fn initiate(&mut self, mut graph: Topology) -> SimResult<()> {
        self.cleanup()?;
        let ids: Vec<VertexId> = graph.vertex_ids().collect();
        for id in ids {
            let sources: Vec<ModuleId> =
                graph.predecessors(id).into_iter().map(|v| ModuleId(v.0)).collect();
            let destinations: Vec<ModuleId> =
                graph.successors(id).into_iter().map(|v| ModuleId(v.0)).collect();
            if let Ok(module) = graph.vertex_mut(id) {
                module.base_mut().set_neighbours(sources, destinations);
            }
        }
        self.graph = Some(graph);
        Ok(())
    }

    /// Tear down: destroy every still-queued event, drop the topology, and
    /// reset the clock. Refused while a run is active.
    pub fn cleanup(&mut self) -> SimResult<()> {
        if self.ctx.is_simulating() {
            return Err(SimError::CleanupWhileSimulating);
        }
        while let Some(entry) = self.ctx.queue.pop() {
            self.ctx.events.remove(entry.key);
        }
        self.graph = None;
        self.ctx.clock = SimTime::ZERO;
        self.ctx.processed = None;
        Ok(())
    }

    /// Run the simulation `runs` times. Each run resets the clock to zero,
    /// sweeps `get_ready` over every module in ascending vertex-ID order,
    /// executes the pop-dispatch loop until the queue empties or the next
    /// event lies beyond `max_time` (zero means unlimited), then sweeps
    /// `terminate`.
    ///
    /// On any engine error the stage is reset to `Out` before the error
    /// propagates, so `cleanup` remains callable.
    pub fn simulate(&mut self, max_time: SimTime, runs: u32) -> SimResult<()> {
        if self.graph.is_none() {
            return Err(SimError::NoTopology);
        }
        for _ in 0..runs {
            if let Err(e) = self.run_once(max_time) {
                self.ctx.set_stage(SimulationStage::Out);
                self.ctx.set_processed(None);
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_once(&mut self, max_time: SimTime) -> SimResult<()> {
        self.ctx.clock = SimTime::ZERO;

        self.ctx.set_stage(SimulationStage::Initialization);
        self.sweep_modules(module::sim_get_ready)?;

        self.ctx.set_stage(SimulationStage::Running);
        self.run_events(max_time)?;

        self.ctx.set_stage(SimulationStage::PostProcessing);
        self.sweep_modules(module::sim_terminate)?;

        self.ctx.set_stage(SimulationStage::Out);
        Ok(())
    }

    /// Call a stage hook on every module, in ascending vertex-ID order.
    fn sweep_modules(
        &mut self,
        hook: fn(&mut dyn SimModule, &mut SimContext) -> SimResult<()>,
    ) -> SimResult<()> {
        let graph = self.graph.as_mut().ok_or(SimError::NoTopology)?;
        let ids: Vec<VertexId> = graph.vertex_ids().collect();
        for id in ids {
            if let Ok(m) = graph.vertex_mut(id) {
                hook(m.as_mut(), &mut self.ctx)?;
            }
        }
        Ok(())
    }

    /// The pop-dispatch loop.
    fn run_events(&mut self, max_time: SimTime) -> SimResult<()> {
        loop {
            let next = match self.ctx.queue.peek() {
                Some(e) => *e,
                // Queue empty: the run is over.
                None => break,
            };
            if !max_time.is_zero() && next.time > max_time {
                // Beyond the horizon: the event stays queued and scheduled.
                break;
            }
            self.ctx.queue.pop();

            let record = self
                .ctx
                .events
                .get_mut(next.key)
                .ok_or(SimError::QueueCorrupted)?;
            if !record.meta.scheduled {
                return Err(SimError::QueueCorrupted);
            }
            // Removal from the queue always logically unschedules, before
            // any handling happens.
            record.meta.scheduled = false;

            let occurrence = record.meta.occurrence;
            if occurrence < self.ctx.clock {
                return Err(SimError::CausalityViolation {
                    event_time: occurrence,
                    clock: self.ctx.clock,
                });
            }
            self.ctx.clock = occurrence;

            let dispatch = match (&record.body, self.ctx.pattern) {
                (EventBody::Timer(t), pattern) => {
                    let owner = t.owner.ok_or(SimError::TimerWithoutOwner)?;
                    match pattern {
                        SimulationPattern::ModuleCentric => {
                            Dispatch::ModuleTimer(owner, TimerKey(next.key))
                        }
                        SimulationPattern::ParticleCentric => {
                            Dispatch::EventTimer(owner, TimerKey(next.key))
                        }
                    }
                }
                (EventBody::Particle(p), pattern) => {
                    let dest = p.next_module.ok_or(SimError::ParticleWithoutDestination)?;
                    match pattern {
                        SimulationPattern::ModuleCentric => {
                            Dispatch::ModuleParticle(dest, ParticleKey(next.key))
                        }
                        SimulationPattern::ParticleCentric => {
                            Dispatch::EventParticle(dest, ParticleKey(next.key))
                        }
                    }
                }
            };

            let result = self.dispatch(dispatch);
            self.ctx.set_processed(None);
            result?;
        }
        Ok(())
    }

    fn dispatch(&mut self, dispatch: Dispatch) -> SimResult<()> {
        match dispatch {
            Dispatch::ModuleTimer(owner, timer) => {
                self.ctx.set_processed(Some(owner));
                let graph = self.graph.as_mut().ok_or(SimError::NoTopology)?;
                let m = graph
                    .vertex_mut(owner.into())
                    .map_err(|_| SimError::ModuleNotFound(owner))?;
                module::sim_handle_timer_triggering(m.as_mut(), &mut self.ctx, timer)
            }
            Dispatch::ModuleParticle(dest, particle) => {
                self.ctx.set_processed(Some(dest));
                let graph = self.graph.as_mut().ok_or(SimError::NoTopology)?;
                let m = graph
                    .vertex_mut(dest.into())
                    .map_err(|_| SimError::ModuleNotFound(dest))?;
                module::sim_handle_particle_arrival(m.as_mut(), &mut self.ctx, particle)
            }
            Dispatch::EventTimer(owner, timer) => {
                self.ctx.set_processed(Some(owner));
                let behavior = self
                    .ctx
                    .events
                    .get_mut(timer.0)
                    .and_then(|r| r.body.as_timer_mut())
                    .and_then(|t| t.behavior.take());
                match behavior {
                    Some(mut b) => {
                        let result = b.on_triggered(&mut self.ctx, timer);
                        if let Some(t) = self
                            .ctx
                            .events
                            .get_mut(timer.0)
                            .and_then(|r| r.body.as_timer_mut())
                            && t.behavior.is_none()
                        {
                            t.behavior = Some(b);
                        }
                        result
                    }
                    None => Ok(()),
                }
            }
            Dispatch::EventParticle(dest, particle) => {
                self.ctx.set_processed(Some(dest));
                let behavior = self
                    .ctx
                    .events
                    .get_mut(particle.0)
                    .and_then(|r| r.body.as_particle_mut())
                    .and_then(|p| p.behavior.take());
                match behavior {
                    Some(mut b) => {
                        let result = b.on_arrival(&mut self.ctx, particle);
                        if let Some(p) = self
                            .ctx
                            .events
                            .get_mut(particle.0)
                            .and_then(|r| r.body.as_particle_mut())
                            && p.behavior.is_none()
                        {
                            p.behavior = Some(b);
                        }
                        result
                    }
                    None => Ok(()),
                }
            }
        }
    }

    fn module_by_id(&mut self, id: ModuleId) -> SimResult<&mut dyn SimModule> {
        let graph = self.graph.as_mut().ok_or(SimError::NoTopology)?;
        let module = graph
            .vertex_mut(id.into())
            .map_err(|_| SimError::ModuleNotFound(id))?;
        Ok(module.as_mut())
    }

    // -----------------------------------------------------------------------
    // Module access for scenario drivers and tests
    // -----------------------------------------------------------------------

    pub fn module(&self, id: ModuleId) -> SimResult<&dyn SimModule> {
        let graph = self.graph.as_ref().ok_or(SimError::NoTopology)?;
        graph
            .vertex(id.into())
            .map(|b| b.as_ref())
            .map_err(|_| SimError::ModuleNotFound(id))
    }

    pub fn module_mut(&mut self, id: ModuleId) -> SimResult<&mut dyn SimModule> {
        self.module_by_id(id)
    }

    /// Downcast a module to its concrete type.
    pub fn module_as<T: SimModule + 'static>(&self, id: ModuleId) -> Option<&T> {
        self.module(id).ok()?.as_any().downcast_ref::<T>()
    }

    pub fn module_as_mut<T: SimModule + 'static>(&mut self, id: ModuleId) -> Option<&mut T> {
        self.module_mut(id).ok()?.as_any_mut().downcast_mut::<T>()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdAllocator;
    use crate::module::ModuleBase;

    // -----------------------------------------------------------------------
    // Context-level scheduling guards
    // -----------------------------------------------------------------------

    fn running_ctx() -> SimContext {
        let mut ctx = SimContext::new(SimulationPattern::ModuleCentric);
        ctx.set_stage(SimulationStage::Running);
        ctx
    }

    #[test]
    fn schedule_requires_active_simulation() {
        let mut ctx = SimContext::new(SimulationPattern::ModuleCentric);
        let p = ctx.create_particle("p");
        let err = ctx.schedule_at(p, SimTime::from_secs(1)).unwrap_err();
        assert!(matches!(err, SimError::NotSimulating { .. }));
    }

    #[test]
    fn schedule_sets_flag_and_queue_entry() {
        let mut ctx = running_ctx();
        let p = ctx.create_particle("p");
        assert!(!ctx.is_scheduled(p).unwrap());

        ctx.schedule_at(p, SimTime::from_secs(4)).unwrap();
        assert!(ctx.is_scheduled(p).unwrap());
        assert_eq!(ctx.occurrence(p).unwrap(), SimTime::from_secs(4));
        assert_eq!(ctx.queue_len(), 1);
        assert_eq!(ctx.peek_next_time(), Some(SimTime::from_secs(4)));
    }

    #[test]
    fn double_schedule_is_rejected() {
        let mut ctx = running_ctx();
        let p = ctx.create_particle("p");
        ctx.schedule_at(p, SimTime::from_secs(1)).unwrap();
        let err = ctx.schedule_at(p, SimTime::from_secs(2)).unwrap_err();
        assert!(matches!(err, SimError::AlreadyScheduled { .. }));
        assert_eq!(ctx.queue_len(), 1, "no duplicate queue entry");
    }

    #[test]
    fn timer_without_owner_cannot_be_scheduled() {
        let mut ctx = running_ctx();
        let t = ctx.create_timer("t");
        assert_eq!(ctx.timer_owner(t).unwrap(), None);
        let err = ctx.schedule_at(t, SimTime::from_secs(1)).unwrap_err();
        assert!(matches!(err, SimError::TimerWithoutOwner));

        ctx.schedule_timer_for(t, ModuleId(3), SimTime::from_secs(1))
            .unwrap();
        assert_eq!(ctx.timer_owner(t).unwrap(), Some(ModuleId(3)));
        assert!(ctx.is_scheduled(t).unwrap());
    }

    #[test]
    fn created_events_inherit_clock_and_processed_module() {
        let mut ctx = running_ctx();
        ctx.clock = SimTime::from_secs(7);
        ctx.set_processed(Some(ModuleId(2)));
        let t = ctx.create_timer("t");
        assert_eq!(ctx.created_at(t).unwrap(), SimTime::from_secs(7));
        assert_eq!(ctx.created_by(t).unwrap(), Some(ModuleId(2)));
        assert_eq!(ctx.timer_owner(t).unwrap(), Some(ModuleId(2)));

        let p = ctx.create_particle("p");
        assert_eq!(ctx.next_module(p).unwrap(), Some(ModuleId(2)));
    }

    #[test]
    fn send_updates_route_and_reschedules() {
        let mut ctx = running_ctx();
        ctx.set_processed(Some(ModuleId(1)));
        let p = ctx.create_particle("p");
        assert_eq!(ctx.next_module(p).unwrap(), Some(ModuleId(1)));

        ctx.send(p, ModuleId(2), SimTime::from_secs(5)).unwrap();
        assert_eq!(ctx.previous_module(p).unwrap(), Some(ModuleId(1)));
        assert_eq!(ctx.next_module(p).unwrap(), Some(ModuleId(2)));
        assert_eq!(ctx.next_arrival(p).unwrap(), SimTime::from_secs(5));
        assert!(ctx.is_scheduled(p).unwrap());
    }

    #[test]
    fn send_records_previous_arrival_time() {
        let mut ctx = running_ctx();
        ctx.set_processed(Some(ModuleId(1)));
        let p = ctx.create_particle("p");
        ctx.send(p, ModuleId(2), SimTime::from_secs(5)).unwrap();

        // Simulate the arrival at module 2, then forward at time 9.
        if let Some(rec) = ctx.events.get_mut(p.0) {
            rec.meta.scheduled = false;
        }
        ctx.queue.clear();
        ctx.send(p, ModuleId(3), SimTime::from_secs(9)).unwrap();
        assert_eq!(ctx.previous_arrival(p).unwrap(), SimTime::from_secs(5));
        assert_eq!(ctx.previous_module(p).unwrap(), Some(ModuleId(2)));
    }

    #[test]
    fn cancel_is_noop_when_unscheduled() {
        let mut ctx = running_ctx();
        let p = ctx.create_particle("p");
        ctx.cancel(p).unwrap();
        assert!(!ctx.is_scheduled(p).unwrap());
    }

    #[test]
    fn cancel_removes_target_and_preserves_order() {
        let mut ctx = running_ctx();
        let a = ctx.create_particle("a");
        let b = ctx.create_particle("b");
        let c = ctx.create_particle("c");
        ctx.schedule_at(a, SimTime::from_secs(1)).unwrap();
        ctx.schedule_at(b, SimTime::from_secs(2)).unwrap();
        ctx.schedule_at(c, SimTime::from_secs(3)).unwrap();

        ctx.cancel(b).unwrap();
        assert!(!ctx.is_scheduled(b).unwrap());
        assert_eq!(ctx.queue_len(), 2);

        let order: Vec<EventKey> = std::mem::take(&mut ctx.queue)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.key)
            .collect();
        assert_eq!(order, vec![a.into(), c.into()]);
    }

    #[test]
    fn equal_time_events_pop_in_scheduling_order() {
        let mut ctx = running_ctx();
        let keys: Vec<ParticleKey> = (0..4).map(|i| ctx.create_particle(format!("p{i}"))).collect();
        for &k in &keys {
            ctx.schedule_at(k, SimTime::from_secs(5)).unwrap();
        }
        let popped: Vec<EventKey> = std::mem::take(&mut ctx.queue)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.key)
            .collect();
        let expected: Vec<EventKey> = keys.iter().map(|&k| k.into()).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn destroy_while_scheduled_mid_run_is_rejected() {
        let mut ctx = running_ctx();
        let p = ctx.create_particle("p");
        ctx.schedule_at(p, SimTime::from_secs(1)).unwrap();
        let err = ctx.destroy_event(p).unwrap_err();
        assert!(matches!(err, SimError::DestroyWhileScheduled));
        assert!(ctx.is_scheduled(p).unwrap());
    }

    #[test]
    fn destroy_outside_run_purges_stale_queue_entry() {
        let mut ctx = running_ctx();
        let p = ctx.create_particle("p");
        ctx.schedule_at(p, SimTime::from_secs(1)).unwrap();

        // Leftover from a truncated run.
        ctx.set_stage(SimulationStage::Out);
        ctx.destroy_event(p).unwrap();
        assert_eq!(ctx.queue_len(), 0);
        assert!(ctx.is_scheduled(p).is_err(), "record is gone");
    }

    // -----------------------------------------------------------------------
    // Full-loop scenarios
    // -----------------------------------------------------------------------

    /// Schedules one timer per configured time during `get_ready`, records
    /// the clock at every firing.
    struct Pinger {
        base: ModuleBase,
        times: Vec<SimTime>,
        fired_at: Vec<SimTime>,
        terminated: usize,
    }

    impl Pinger {
        fn boxed(id: ModuleId, times: Vec<SimTime>) -> Box<dyn SimModule> {
            Box::new(Self {
                base: ModuleBase::new(id, 0, "pinger"),
                times,
                fired_at: Vec::new(),
                terminated: 0,
            })
        }
    }

    impl SimModule for Pinger {
        fn base(&self) -> &ModuleBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }
        fn get_ready(&mut self, ctx: &mut SimContext) -> SimResult<()> {
            for &time in &self.times {
                let timer = ctx.create_timer("ping");
                ctx.schedule_timer_for(timer, self.base.id(), time)?;
            }
            Ok(())
        }
        fn handle_timer_triggering(&mut self, ctx: &mut SimContext, _t: TimerKey) -> SimResult<()> {
            self.fired_at.push(ctx.clock());
            Ok(())
        }
        fn terminate(&mut self, _ctx: &mut SimContext) -> SimResult<()> {
            self.terminated += 1;
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn single_pinger(times: Vec<i64>) -> (Simulator, ModuleId) {
        let mut ids = IdAllocator::new();
        let id = ids.module_id();
        let mut topo = Topology::new_directed();
        topo.add_module(Pinger::boxed(
            id,
            times.into_iter().map(SimTime::from_secs).collect(),
        ));
        let mut sim = Simulator::new(SimulationPattern::ModuleCentric);
        sim.initiate(topo).unwrap();
        (sim, id)
    }

    #[test]
    fn simulate_before_initiate_fails() {
        let mut sim = Simulator::new(SimulationPattern::ModuleCentric);
        let err = sim.simulate(SimTime::ZERO, 1).unwrap_err();
        assert!(matches!(err, SimError::NoTopology));
    }

    #[test]
    fn popped_events_advance_clock_monotonically() {
        let (mut sim, id) = single_pinger(vec![9, 2, 7, 2, 4]);
        sim.simulate(SimTime::ZERO, 1).unwrap();
        let pinger = sim.module_as::<Pinger>(id).unwrap();
        let secs: Vec<i64> = pinger.fired_at.iter().map(|t| t.whole_secs()).collect();
        assert_eq!(secs, vec![2, 2, 4, 7, 9]);
        assert_eq!(sim.clock(), SimTime::from_secs(9));
        assert_eq!(sim.stage(), SimulationStage::Out);
        assert_eq!(pinger.terminated, 1);
    }

    #[test]
    fn max_time_truncation_leaves_late_event_queued() {
        let (mut sim, id) = single_pinger(vec![1, 2, 3, 10]);
        sim.simulate(SimTime::from_secs(5), 1).unwrap();
        let pinger = sim.module_as::<Pinger>(id).unwrap();
        let secs: Vec<i64> = pinger.fired_at.iter().map(|t| t.whole_secs()).collect();
        assert_eq!(secs, vec![1, 2, 3]);
        assert_eq!(sim.ctx().queue_len(), 1);
        assert_eq!(sim.ctx().peek_next_time(), Some(SimTime::from_secs(10)));
        assert!(sim.clock() <= SimTime::from_secs(5));
    }

    #[test]
    fn multiple_runs_reset_the_clock() {
        let (mut sim, id) = single_pinger(vec![3]);
        sim.simulate(SimTime::ZERO, 2).unwrap();
        let pinger = sim.module_as::<Pinger>(id).unwrap();
        let secs: Vec<i64> = pinger.fired_at.iter().map(|t| t.whole_secs()).collect();
        assert_eq!(secs, vec![3, 3], "each run starts from clock zero");
        assert_eq!(pinger.terminated, 2);
    }

    #[test]
    fn cleanup_refused_while_simulating_and_drains_afterwards() {
        let (mut sim, _) = single_pinger(vec![1]);
        sim.ctx_mut().set_stage(SimulationStage::Running);
        assert!(matches!(
            sim.cleanup().unwrap_err(),
            SimError::CleanupWhileSimulating
        ));
        sim.ctx_mut().set_stage(SimulationStage::Out);

        // Leave a stale event behind, then clean up.
        sim.ctx_mut().set_stage(SimulationStage::Running);
        let p = sim.ctx_mut().create_particle("stale");
        sim.ctx_mut().schedule_at(p, SimTime::from_secs(99)).unwrap();
        sim.ctx_mut().set_stage(SimulationStage::Out);
        sim.cleanup().unwrap();
        assert_eq!(sim.ctx().queue_len(), 0);
        assert!(sim.ctx().is_scheduled(p).is_err(), "queued event destroyed");
        assert!(sim.topology().is_none());
    }

    /// On its timer at t=5, schedules a second timer in the past.
    struct TimeTraveler {
        base: ModuleBase,
        armed: bool,
    }

    impl SimModule for TimeTraveler {
        fn base(&self) -> &ModuleBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }
        fn get_ready(&mut self, ctx: &mut SimContext) -> SimResult<()> {
            let t = ctx.create_timer("start");
            ctx.schedule_timer_for(t, self.base.id(), SimTime::from_secs(5))
        }
        fn handle_timer_triggering(&mut self, ctx: &mut SimContext, _t: TimerKey) -> SimResult<()> {
            if !self.armed {
                self.armed = true;
                let t = ctx.create_timer("past");
                ctx.schedule_timer_for(t, self.base.id(), SimTime::from_secs(3))?;
            }
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn scheduling_into_the_past_aborts_with_causality_violation() {
        let mut ids = IdAllocator::new();
        let id = ids.module_id();
        let mut topo = Topology::new_directed();
        topo.add_module(Box::new(TimeTraveler {
            base: ModuleBase::new(id, 0, "traveler"),
            armed: false,
        }));
        let mut sim = Simulator::new(SimulationPattern::ModuleCentric);
        sim.initiate(topo).unwrap();

        let err = sim.simulate(SimTime::ZERO, 1).unwrap_err();
        assert!(matches!(err, SimError::CausalityViolation { .. }));
        assert_eq!(sim.stage(), SimulationStage::Out, "stage reset on error");
        sim.cleanup().unwrap();
    }

    #[test]
    fn initiate_populates_neighbour_lists() {
        let mut ids = IdAllocator::new();
        let a = ids.module_id();
        let b = ids.module_id();
        let c = ids.module_id();
        let mut topo = Topology::new_directed();
        topo.add_module(Pinger::boxed(a, vec![]));
        topo.add_module(Pinger::boxed(b, vec![]));
        topo.add_module(Pinger::boxed(c, vec![]));
        topo.connect_modules(a, b);
        topo.connect_modules(b, c);

        let mut sim = Simulator::new(SimulationPattern::ModuleCentric);
        sim.initiate(topo).unwrap();

        let mid = sim.module(b).unwrap();
        assert_eq!(mid.base().sources(), &[a]);
        assert_eq!(mid.base().destinations(), &[c]);
        assert_eq!(sim.module(a).unwrap().base().sources_nb(), 0);
        assert_eq!(sim.module(c).unwrap().base().destinations_nb(), 0);
    }

    #[test]
    fn modules_are_reachable_and_mutable_by_id() {
        let (mut sim, id) = single_pinger(vec![1]);
        assert_eq!(sim.module(id).unwrap().base().name(), "pinger");
        assert!(matches!(
            sim.module_mut(ModuleId(99)),
            Err(SimError::ModuleNotFound(ModuleId(99)))
        ));

        // Mutate through the downcast path, then observe the effect.
        sim.module_as_mut::<Pinger>(id)
            .unwrap()
            .times
            .push(SimTime::from_secs(4));
        sim.simulate(SimTime::ZERO, 1).unwrap();
        let pinger = sim.module_as::<Pinger>(id).unwrap();
        let secs: Vec<i64> = pinger.fired_at.iter().map(|t| t.whole_secs()).collect();
        assert_eq!(secs, vec![1, 4]);
    }

    #[test]
    fn set_pattern_refused_mid_run() {
        let (mut sim, _) = single_pinger(vec![1]);
        sim.ctx_mut().set_stage(SimulationStage::Running);
        assert!(sim.set_pattern(SimulationPattern::ParticleCentric).is_err());
        sim.ctx_mut().set_stage(SimulationStage::Out);
        sim.set_pattern(SimulationPattern::ParticleCentric).unwrap();
        assert_eq!(sim.pattern(), SimulationPattern::ParticleCentric);
    }

    // -----------------------------------------------------------------------
    // Particle-centric dispatch
    // -----------------------------------------------------------------------

    /// Timer behavior that launches a self-routing particle toward a fixed
    /// destination.
    struct Launch {
        dest: ModuleId,
    }

    impl TimerBehavior for Launch {
        fn on_triggered(&mut self, ctx: &mut SimContext, _t: TimerKey) -> SimResult<()> {
            let p = ctx.create_particle_with("rover", 0, Some(Box::new(Recordings::default())));
            let arrival = ctx.clock() + SimTime::from_secs(2);
            ctx.send(p, self.dest, arrival)
        }
    }

    #[derive(Default)]
    struct Recordings {
        arrivals: Vec<SimTime>,
    }

    impl ParticleBehavior for Recordings {
        fn on_arrival(&mut self, ctx: &mut SimContext, particle: ParticleKey) -> SimResult<()> {
            self.arrivals.push(ctx.clock());
            assert_eq!(ctx.processed_module(), ctx.next_module(particle).unwrap());
            Ok(())
        }
    }

    #[test]
    fn particle_centric_dispatch_runs_event_behaviors() {
        let mut ids = IdAllocator::new();
        let a = ids.module_id();
        let b = ids.module_id();
        let mut topo = Topology::new_directed();
        topo.add_module(Pinger::boxed(a, vec![]));
        topo.add_module(Pinger::boxed(b, vec![]));
        topo.connect_modules(a, b);

        let mut sim = Simulator::new(SimulationPattern::ParticleCentric);
        sim.initiate(topo).unwrap();

        // Arm the launching timer by hand: under the particle-centric
        // pattern modules stay passive.
        sim.ctx_mut().set_stage(SimulationStage::Running);
        let t = sim
            .ctx_mut()
            .create_timer_with("launch", 0, Some(Box::new(Launch { dest: b })));
        sim.ctx_mut()
            .schedule_timer_for(t, a, SimTime::from_secs(3))
            .unwrap();
        sim.run_events(SimTime::ZERO).unwrap();
        sim.ctx_mut().set_stage(SimulationStage::Out);

        assert_eq!(sim.clock(), SimTime::from_secs(5), "3 + 2s travel");
        // Behavior slot was restored after dispatch; no module hook ran.
        let pinger = sim.module_as::<Pinger>(b).unwrap();
        assert!(pinger.fired_at.is_empty());
    }

    /// Under particle-centric dispatch a module's hooks are unreachable: a
    /// plain timer with no behavior fires as a no-op.
    #[test]
    fn plain_timer_is_noop_under_particle_centric_pattern() {
        let (mut sim, _) = single_pinger(vec![1]);
        sim.set_pattern(SimulationPattern::ParticleCentric).unwrap();
        // Pinger::get_ready schedules a plain timer with no behavior; under
        // particle-centric dispatch it fires as a no-op instead of reaching
        // the module hook.
        sim.simulate(SimTime::ZERO, 1).unwrap();
        let id = ModuleId(0);
        let pinger = sim.module_as::<Pinger>(id).unwrap();
        assert!(pinger.fired_at.is_empty());
    }
}
