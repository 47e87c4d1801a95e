//! Shared scenario fixtures for tests, benchmarks, and examples.
//!
//! Three small module-centric modules — a timer-driven particle source, a
//! FIFO queue with a configurable service interval, and an absorbing sink —
//! plus a builder wiring them into a chain. Compiled for tests and behind
//! the `test-utils` feature.

use crate::error::SimResult;
use crate::id::{IdAllocator, ModuleId, ParticleKey, TimerKey};
use crate::module::{self, ModuleBase, SimModule};
use crate::rng::{IntervalSource, SimRng};
use crate::sim::{SimContext, SimulationPattern, Simulator, Topology};
use crate::time::SimTime;
use std::any::Any;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Emits one particle per timer firing toward its first destination, drawing
/// the inter-arrival interval from an [`IntervalSource`].
pub struct GeneratorModule {
    base: ModuleBase,
    interval: Box<dyn IntervalSource>,
    rng: SimRng,
    /// Stop after this many particles; `None` runs until `max_time`.
    limit: Option<u64>,
    emitted: u64,
}

impl GeneratorModule {
    pub fn new(
        id: ModuleId,
        interval: Box<dyn IntervalSource>,
        limit: Option<u64>,
        seed: u64,
    ) -> Self {
        Self {
            base: ModuleBase::new(id, 1, "generator"),
            interval,
            rng: SimRng::new(seed),
            limit,
            emitted: 0,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn arm_next(&mut self, ctx: &mut SimContext) -> SimResult<()> {
        if self.limit.is_some_and(|n| self.emitted >= n) {
            return Ok(());
        }
        let delay = self.interval.next_interval(&mut self.rng);
        let timer = ctx.create_timer("emit");
        let at = ctx.clock() + delay;
        ctx.schedule_timer_for(timer, self.base.id(), at)?;
        self.base.track_timer(timer);
        Ok(())
    }
}

impl SimModule for GeneratorModule {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn get_ready(&mut self, ctx: &mut SimContext) -> SimResult<()> {
        self.emitted = 0;
        self.arm_next(ctx)
    }

    fn handle_timer_triggering(&mut self, ctx: &mut SimContext, timer: TimerKey) -> SimResult<()> {
        // The timer has served its purpose; reclaim the record.
        ctx.destroy_event(timer)?;
        let Some(dest) = self.base.destination(0) else {
            // Nowhere to send; a generator without a destination idles.
            return Ok(());
        };
        let particle = ctx.create_particle("job");
        ctx.send(particle, dest, ctx.clock())?;
        self.emitted += 1;
        self.arm_next(ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// FIFO single-server queue. Each arrival is enqueued; the server holds a
/// particle for one service interval, then forwards it to the first
/// destination. A zero interval forwards at the same clock reading.
pub struct QueueModule {
    base: ModuleBase,
    service: Box<dyn IntervalSource>,
    rng: SimRng,
    waiting: VecDeque<ParticleKey>,
    busy: bool,
    forwarded: u64,
}

impl QueueModule {
    pub fn new(id: ModuleId, service: Box<dyn IntervalSource>, seed: u64) -> Self {
        Self {
            base: ModuleBase::new(id, 2, "queue"),
            service,
            rng: SimRng::new(seed),
            waiting: VecDeque::new(),
            busy: false,
            forwarded: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn backlog(&self) -> usize {
        self.waiting.len()
    }

    fn start_service(&mut self, ctx: &mut SimContext) -> SimResult<()> {
        let hold = self.service.next_interval(&mut self.rng);
        let timer = ctx.create_timer("service-done");
        ctx.schedule_timer_for(timer, self.base.id(), ctx.clock() + hold)?;
        self.base.track_timer(timer);
        self.busy = true;
        Ok(())
    }
}

impl SimModule for QueueModule {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn get_ready(&mut self, _ctx: &mut SimContext) -> SimResult<()> {
        self.waiting.clear();
        self.busy = false;
        self.forwarded = 0;
        Ok(())
    }

    fn handle_particle_arrival(
        &mut self,
        ctx: &mut SimContext,
        particle: ParticleKey,
    ) -> SimResult<()> {
        self.waiting.push_back(particle);
        if !self.busy {
            self.start_service(ctx)?;
        }
        Ok(())
    }

    fn handle_particle_departure(
        &mut self,
        _ctx: &mut SimContext,
        _particle: ParticleKey,
    ) -> SimResult<()> {
        Ok(())
    }

    fn handle_timer_triggering(&mut self, ctx: &mut SimContext, timer: TimerKey) -> SimResult<()> {
        ctx.destroy_event(timer)?;
        let Some(particle) = self.waiting.pop_front() else {
            self.busy = false;
            return Ok(());
        };
        let Some(dest) = self.base.destination(0) else {
            self.busy = false;
            return Ok(());
        };
        module::notify_particle_departure(self, ctx, particle)?;
        ctx.send(particle, dest, ctx.clock())?;
        self.forwarded += 1;
        if self.waiting.is_empty() {
            self.busy = false;
        } else {
            self.start_service(ctx)?;
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

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Absorbs every particle that arrives, recording the clock reading.
pub struct SinkModule {
    base: ModuleBase,
    arrivals: Vec<SimTime>,
}

impl SinkModule {
    pub fn new(id: ModuleId) -> Self {
        Self {
            base: ModuleBase::new(id, 3, "sink"),
            arrivals: Vec::new(),
        }
    }

    pub fn arrivals(&self) -> &[SimTime] {
        &self.arrivals
    }
}

impl SimModule for SinkModule {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn get_ready(&mut self, _ctx: &mut SimContext) -> SimResult<()> {
        self.arrivals.clear();
        Ok(())
    }

    fn handle_particle_arrival(
        &mut self,
        ctx: &mut SimContext,
        particle: ParticleKey,
    ) -> SimResult<()> {
        self.arrivals.push(ctx.clock());
        // Absorbed for good: release the bookkeeping entry and reclaim the
        // record so long runs don't grow the arena.
        self.base.release_particle(particle);
        ctx.destroy_event(particle)?;
        Ok(())
    }

    fn handle_particle_departure(
        &mut self,
        _ctx: &mut SimContext,
        _particle: ParticleKey,
    ) -> SimResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Scenario builder
// ---------------------------------------------------------------------------

/// A generator → queue → sink chain, initiated and ready to simulate.
pub struct ChainScenario {
    pub sim: Simulator,
    pub generator: ModuleId,
    pub queue: ModuleId,
    pub sink: ModuleId,
}

/// Build the canonical three-module chain.
pub fn three_node_chain(
    interarrival: Box<dyn IntervalSource>,
    service: Box<dyn IntervalSource>,
    limit: Option<u64>,
    seed: u64,
) -> ChainScenario {
    let mut ids = IdAllocator::new();
    let generator = ids.module_id();
    let queue = ids.module_id();
    let sink = ids.module_id();

    let mut topo = Topology::new_directed().with_name("chain");
    topo.add_module(Box::new(GeneratorModule::new(
        generator,
        interarrival,
        limit,
        seed,
    )));
    topo.add_module(Box::new(QueueModule::new(queue, service, seed ^ 1)));
    topo.add_module(Box::new(SinkModule::new(sink)));
    topo.connect_modules(generator, queue);
    topo.connect_modules(queue, sink);

    let mut sim = Simulator::new(SimulationPattern::ModuleCentric);
    sim.initiate(topo)
        .unwrap_or_else(|e| panic!("chain initiation failed: {e}"));
    ChainScenario {
        sim,
        generator,
        queue,
        sink,
    }
}
