//! GraphML export example: build a small topology and print it as GraphML.
//!
//! The document can be opened directly in graph tools such as yEd or Gephi.
//!
//! Run with: `cargo run -p desim-examples --example graphml_export`

use desim_core::id::IdAllocator;
use desim_core::rng::ConstantInterval;
use desim_core::sim::Topology;
use desim_core::test_utils::{GeneratorModule, QueueModule, SinkModule};
use desim_core::time::SimTime;

fn main() {
    let mut ids = IdAllocator::new();
    let gen_a = ids.module_id();
    let gen_b = ids.module_id();
    let queue = ids.module_id();
    let sink = ids.module_id();

    // Two generators feeding one queue, which drains into a sink.
    let mut topo = Topology::new_directed().with_name("merge");
    topo.add_module(Box::new(GeneratorModule::new(
        gen_a,
        Box::new(ConstantInterval(SimTime::from_secs(3))),
        None,
        1,
    )));
    topo.add_module(Box::new(GeneratorModule::new(
        gen_b,
        Box::new(ConstantInterval(SimTime::from_secs(5))),
        None,
        2,
    )));
    topo.add_module(Box::new(QueueModule::new(
        queue,
        Box::new(ConstantInterval(SimTime::from_secs(1))),
        3,
    )));
    topo.add_module(Box::new(SinkModule::new(sink)));
    topo.connect_modules(gen_a, queue);
    topo.connect_modules(gen_b, queue);
    topo.connect_modules(queue, sink);

    let mut out = Vec::new();
    topo.save_graphml(&mut out).expect("export failed");
    print!("{}", String::from_utf8(out).expect("graphml is utf-8"));
}
