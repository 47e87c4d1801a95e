//! M/M/1-style queue example: exponential arrivals into a single server.
//!
//! Builds a generator → queue → sink chain with exponentially distributed
//! inter-arrival and service times, runs it for an hour of simulated time,
//! and prints what each module observed. With arrival mean 10s and service
//! mean 8s, utilization is ~0.8 and a visible backlog builds up and drains.
//!
//! Run with: `cargo run -p desim-examples --example mm1_queue`

use desim_core::rng::ExponentialInterval;
use desim_core::test_utils::{three_node_chain, GeneratorModule, QueueModule, SinkModule};
use desim_core::time::SimTime;

fn main() {
    let mut scenario = three_node_chain(
        Box::new(ExponentialInterval {
            mean: SimTime::from_secs(10),
        }),
        Box::new(ExponentialInterval {
            mean: SimTime::from_secs(8),
        }),
        None,
        0xDE51_2024,
    );

    let horizon: SimTime = "1h".parse().unwrap();
    scenario
        .sim
        .simulate(horizon, 1)
        .expect("simulation run failed");

    let generator = scenario
        .sim
        .module_as::<GeneratorModule>(scenario.generator)
        .unwrap();
    let queue = scenario
        .sim
        .module_as::<QueueModule>(scenario.queue)
        .unwrap();
    let sink = scenario.sim.module_as::<SinkModule>(scenario.sink).unwrap();

    println!("=== M/M/1 chain after {horizon} of simulated time ===\n");
    println!("generator emitted : {}", generator.emitted());
    println!("queue forwarded   : {}", queue.forwarded());
    println!("queue backlog     : {}", queue.backlog());
    println!("sink received     : {}", sink.arrivals().len());

    if let (Some(first), Some(last)) = (sink.arrivals().first(), sink.arrivals().last()) {
        println!("first arrival     : {first}");
        println!("last arrival      : {last}");
    }
    println!("clock at stop     : {}", scenario.sim.clock());
    println!(
        "still queued      : {} event(s) past the horizon",
        scenario.sim.ctx().queue_len()
    );
}
