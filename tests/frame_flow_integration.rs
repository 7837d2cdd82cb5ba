//! Integration tests for frames moving through stages
//!
//! These tests validate:
//! - Off-screen rendering replacing the forwarded frame
//! - Failures reported on the callback worker without stopping siblings
//! - Captured stills delivered asynchronously

mod common;

use common::builders::FrameBuilder;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use texflow::gpu::headless::{HeadlessContext, RecordingEffect, SyntheticCapturer};
use texflow::gpu::GpuContext;
use texflow::pipeline::chain;
use texflow::pipeline::nodes::{BranchStage, CaptureStage, EffectStage, PipelineMode, ProxyStage};
use texflow::pipeline::{
    AnyStage, FrameAction, NodeId, PipelineGraph, Stage, StageContext, StageError, StageFailure,
};
use texflow::{Frame, TextureId};

/// Custom stage remembering every frame it saw
struct FrameRecorder {
    seen: Arc<Mutex<Vec<Frame>>>,
}

impl Stage for FrameRecorder {
    fn name(&self) -> &str {
        "Recorder"
    }

    fn on_frame(&mut self, _ctx: &mut StageContext, frame: &Frame) -> Result<FrameAction, StageError> {
        self.seen.lock().push(*frame);
        Ok(FrameAction::Forward)
    }
}

fn recorder(graph: &PipelineGraph) -> (NodeId, Arc<Mutex<Vec<Frame>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let node = graph.add_node(AnyStage::custom(FrameRecorder { seen: seen.clone() }));
    (node, seen)
}

fn context() -> Arc<dyn GpuContext> {
    Arc::new(HeadlessContext::new())
}

#[test]
fn test_effect_forwards_rendered_frame() {
    let graph = PipelineGraph::new().unwrap();
    let head = graph.add_node(ProxyStage::new());
    let effect = RecordingEffect::new("tint");
    let applied = effect.counter();
    let effect = graph.add_node(EffectStage::new(context(), Box::new(effect)));
    let (tail, seen) = recorder(&graph);
    chain::append(&graph, head, effect).unwrap();
    chain::append(&graph, head, tail).unwrap();
    graph.resize(head, 320, 240).unwrap();

    graph.on_frame(head, &FrameBuilder::new(1000).size(640, 480).external().build());

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    // Rendered into the node-sized buffer, not the camera texture
    assert_ne!(seen[0].texture, TextureId(1000));
    assert_eq!((seen[0].width, seen[0].height), (320, 240));
    assert!(!seen[0].is_external);
}

#[test]
fn test_pass_through_forwards_original() {
    let graph = PipelineGraph::new().unwrap();
    let head = graph.add_node(ProxyStage::new());
    let effect = graph.add_node(EffectStage::with_mode(
        context(),
        Box::new(RecordingEffect::new("tint")),
        PipelineMode::PassThrough,
    ));
    let (tail, seen) = recorder(&graph);
    chain::append(&graph, head, effect).unwrap();
    chain::append(&graph, head, tail).unwrap();

    let frame = FrameBuilder::new(5).build();
    graph.on_frame(head, &frame);

    assert_eq!(*seen.lock(), vec![frame]);
}

#[test]
fn test_failure_reported_and_siblings_served() {
    let graph = PipelineGraph::new().unwrap();
    let branch = graph.add_node(BranchStage::new());
    let failing = graph.add_node(EffectStage::new(
        context(),
        Box::new(RecordingEffect::failing("broken")),
    ));
    let (after_failure, seen_after) = recorder(&graph);
    let (sibling, seen_sibling) = recorder(&graph);
    graph.add_downstream(branch, failing).unwrap();
    graph.add_downstream(branch, sibling).unwrap();
    chain::append(&graph, failing, after_failure).unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    graph
        .set_error_callback(failing, move |f: &StageFailure| {
            sink.lock().push((f.node, f.stage.clone()))
        })
        .unwrap();

    graph.on_frame(branch, &FrameBuilder::new(1).build());
    graph.on_frame(branch, &FrameBuilder::new(2).build());
    graph.flush_callbacks();

    assert_eq!(seen_sibling.lock().len(), 2);
    // The failing node still forwards the frame it received
    assert_eq!(seen_after.lock().len(), 2);
    let failures = failures.lock();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|(node, _)| *node == failing));
    assert!(failures[0].1.starts_with("Effect"));
}

#[test]
fn test_capture_delivers_stills_on_worker() {
    let graph = PipelineGraph::new().unwrap();
    let head = graph.add_node(ProxyStage::new());

    let taken = Arc::new(AtomicUsize::new(0));
    let bytes = Arc::new(AtomicUsize::new(0));
    let mut capture = CaptureStage::new(Box::new(SyntheticCapturer));
    capture.request_capture(2, 0).unwrap();
    let (count, size) = (taken.clone(), bytes.clone());
    capture.set_callback(move |still| {
        count.fetch_add(1, Ordering::SeqCst);
        size.store(still.pixels.len(), Ordering::SeqCst);
    });
    let capture = graph.add_node(capture);
    chain::append(&graph, head, capture).unwrap();

    for i in 0..5 {
        graph.on_frame(head, &FrameBuilder::new(i + 1).size(8, 4).build());
    }
    graph.flush_callbacks();

    assert_eq!(taken.load(Ordering::SeqCst), 2);
    assert_eq!(bytes.load(Ordering::SeqCst), 8 * 4 * 4);
}

#[test]
fn test_removed_node_stops_receiving() {
    let graph = PipelineGraph::new().unwrap();
    let head = graph.add_node(ProxyStage::new());
    let (middle, seen_middle) = recorder(&graph);
    let (tail, seen_tail) = recorder(&graph);
    chain::append(&graph, head, middle).unwrap();
    chain::append(&graph, head, tail).unwrap();

    graph.on_frame(head, &FrameBuilder::new(1).build());
    chain::remove(&graph, middle).unwrap();
    graph.on_frame(head, &FrameBuilder::new(2).build());

    assert_eq!(seen_middle.lock().len(), 1);
    assert_eq!(seen_tail.lock().len(), 2);
}
