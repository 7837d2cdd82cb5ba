//! Test to verify test infrastructure works correctly

mod common;

use common::builders::FrameBuilder;
use texflow::pipeline::chain;
use texflow::pipeline::PipelineGraph;
use texflow::{Matrix4, TextureId};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let frame = FrameBuilder::new(9)
        .size(1920, 1080)
        .transform(Matrix4::scale(-1.0, 1.0, 1.0))
        .build();

    assert_eq!(frame.texture, TextureId(9));
    assert_eq!((frame.width, frame.height), (1920, 1080));
    assert_eq!(frame.transform.get(0, 0), -1.0);
    assert!(!frame.is_external);
}

#[test]
fn test_proxy_chain_helper() {
    let graph = PipelineGraph::new().unwrap();
    let nodes = common::proxy_chain(&graph, 3);
    assert_eq!(chain::walk(&graph, nodes[0]).unwrap(), nodes);
}

#[test]
fn test_headless_engine_starts() {
    let (engine, log) = common::headless_engine("infra");
    engine.sync().unwrap();
    assert!(engine.is_running());
    assert!(engine.is_independent());
    assert_eq!(log.draws(), 0);
    engine.release_blocking();
    assert!(!engine.is_running());
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
