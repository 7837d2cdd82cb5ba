//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::sync::Arc;
use std::time::Duration;
use texflow::distribute::{ContextMode, DistributionEngine};
use texflow::gpu::headless::{DrawLog, HeadlessContext, RecordingDrawerFactory};
use texflow::pipeline::nodes::ProxyStage;
use texflow::pipeline::{chain, NodeId, PipelineGraph};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Engine on its own thread over a fresh headless context, plus the log of
/// every draw it makes.
pub fn headless_engine(name: &str) -> (DistributionEngine, Arc<DrawLog>) {
    let factory = RecordingDrawerFactory::new();
    let log = factory.log();
    let engine = DistributionEngine::new(
        name,
        ContextMode::Independent(Arc::new(HeadlessContext::new())),
        Arc::new(factory),
    )
    .expect("engine should start");
    (engine, log)
}

/// Linear chain of `len` proxy nodes built with `append`; returns them in order.
pub fn proxy_chain(graph: &PipelineGraph, len: usize) -> Vec<NodeId> {
    let nodes: Vec<NodeId> = (0..len).map(|_| graph.add_node(ProxyStage::new())).collect();
    for node in nodes.iter().skip(1) {
        chain::append(graph, nodes[0], *node).expect("append should succeed");
    }
    nodes
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
