//! Desim Core -- a discrete-event simulation engine.
//!
//! This crate provides the kernel underlying queueing-network, telecom, and
//! logistics simulations: a simulated clock advanced only by popping the
//! chronologically next event from a priority queue, dispatched to the
//! simulated module that owns it, with the dispatch free to schedule or
//! cancel further events synchronously.
//!
//! # Simulation Stages
//!
//! Each call to [`sim::Simulator::simulate`] takes every run through four
//! stages, validated at every hook invocation:
//!
//! 1. **Out** -- No run active; scheduling primitives are refused.
//! 2. **Initialization** -- Clock reset to zero, `get_ready` swept over every
//!    module in ascending vertex-ID order.
//! 3. **Running** -- The pop-dispatch loop: pop the earliest event, advance
//!    the clock to its occurrence time, dispatch by event kind and pattern.
//! 4. **PostProcessing** -- `terminate` swept over every module.
//!
//! # Dispatch Patterns
//!
//! Under [`sim::SimulationPattern::ModuleCentric`] events are routed to
//! module hooks (`handle_timer_triggering`, `handle_particle_arrival`).
//! Under `ParticleCentric` the events carry their own behavior objects and
//! handle themselves. The two are mutually exclusive per context, enforced
//! by the capability wrappers.
//!
//! # Key Types
//!
//! - [`sim::Simulator`] -- Owns the context and topology, drives the stages.
//! - [`sim::SimContext`] -- Clock, stage, event arena, future-events queue;
//!   threaded through every hook.
//! - [`graph::Graph`] -- Generic topology container with GraphML export.
//! - [`module::SimModule`] -- Trait implemented by simulated entities.
//! - [`event::EventBody`] -- Closed union of event kinds: timer or particle.
//! - [`time::SimTime`] -- Q40.24 fixed-point clock scalar.
//! - [`rng::SimRng`] -- Deterministic SplitMix64 generator feeding the
//!   random interval sources module behaviors draw from.

pub mod error;
pub mod event;
pub mod graph;
pub mod id;
pub mod module;
pub mod rng;
pub mod sim;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
