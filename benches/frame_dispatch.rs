//! Benchmarks for the frame path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::{Duration, Instant};
use texflow::distribute::{ContextMode, DistributionEngine, FrameThrottle};
use texflow::gpu::headless::{HeadlessContext, HeadlessSurface, RecordingDrawerFactory};
use texflow::pipeline::chain;
use texflow::pipeline::nodes::{BranchStage, ProxyStage};
use texflow::pipeline::{PipelineGraph, TargetId};
use texflow::{Frame, Matrix4, MirrorMode, TextureId};

fn frame() -> Frame {
    Frame::new(TextureId(1), 1280, 720).expect("non-zero frame size")
}

fn bench_linear_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_chain");

    for len in [1usize, 8, 64].iter() {
        let graph = PipelineGraph::new().expect("graph");
        let head = graph.add_node(ProxyStage::new());
        for _ in 1..*len {
            let node = graph.add_node(ProxyStage::new());
            chain::append(&graph, head, node).expect("append");
        }

        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("on_frame", len), &frame(), |b, frame| {
            b.iter(|| graph.on_frame(head, black_box(frame)));
        });
    }

    group.finish();
}

fn bench_branch_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_fan_out");

    for width in [2usize, 16, 128].iter() {
        let graph = PipelineGraph::new().expect("graph");
        let branch = graph.add_node(BranchStage::new());
        for _ in 0..*width {
            let child = graph.add_node(ProxyStage::new());
            graph.add_downstream(branch, child).expect("add child");
        }

        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::new("on_frame", width), &frame(), |b, frame| {
            b.iter(|| graph.on_frame(branch, black_box(frame)));
        });
    }

    group.finish();
}

fn bench_throttle(c: &mut Criterion) {
    let mut group = c.benchmark_group("throttle");

    group.bench_function("should_draw", |b| {
        let mut throttle = FrameThrottle::new(30.0);
        throttle.mark_drawn(Instant::now());
        b.iter(|| black_box(throttle.should_draw(Instant::now())));
    });

    group.bench_function("mirror_apply", |b| {
        let model_view = Matrix4::IDENTITY;
        b.iter(|| black_box(MirrorMode::Both.apply(black_box(&model_view))));
    });

    group.finish();
}

fn bench_engine_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_dispatch");
    group.measurement_time(Duration::from_secs(5));

    for targets in [1u32, 8].iter() {
        let engine = DistributionEngine::new(
            "bench",
            ContextMode::Independent(Arc::new(HeadlessContext::new())),
            Arc::new(RecordingDrawerFactory::new()),
        )
        .expect("engine");
        for id in 0..*targets {
            engine
                .add_target(TargetId(id), HeadlessSurface::window(1280, 720), false, 0.0)
                .expect("add target");
        }

        group.throughput(Throughput::Elements(*targets as u64));
        group.bench_with_input(
            BenchmarkId::new("request_frame_and_sync", targets),
            &frame(),
            |b, frame| {
                b.iter(|| {
                    engine.request_frame(*frame);
                    engine.sync().expect("sync");
                });
            },
        );
        engine.release_blocking();
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_linear_chain,
    bench_branch_fan_out,
    bench_throttle,
    bench_engine_dispatch
);
criterion_main!(benches);
