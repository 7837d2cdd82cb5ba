//! texflow - headless demo run
//!
//! Builds a complete chain on the software GPU backend, pushes synthetic
//! frames through it and prints per-engine statistics:
//!
//! ```text
//! [Proxy] ──► [Effect] ──► [Capture] ──► [Branch] ──► [Distributor] ══► targets
//!                                                └──► [Surface]
//! ```
//!
//! Usage: `texflow [config.toml|config.json] [frames]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use texflow::config::{default_config_path, LoggingConfig, TexflowConfig};
use texflow::distribute::{ContextMode, DistributionEngine};
use texflow::gpu::headless::{
    HeadlessContext, HeadlessSurface, RecordingDrawerFactory, RecordingEffect, SyntheticCapturer,
};
use texflow::gpu::{GpuContext, GpuThread};
use texflow::pipeline::chain;
use texflow::pipeline::nodes::{
    BranchStage, CaptureStage, DistributorStage, EffectStage, ProxyStage, SurfaceStage,
};
use texflow::pipeline::PipelineGraph;
use texflow::types::Frame;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FRAMES: u32 = 120;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).or_else(default_config_path);
    let frames: u32 = match args.next() {
        Some(n) => n.parse().context("frame count must be a number")?,
        None => DEFAULT_FRAMES,
    };

    let config = match &config_path {
        Some(path) if path.exists() => TexflowConfig::load(path)?,
        _ => TexflowConfig::default(),
    };
    config.validate()?;

    let _log_guard = init_logging(&config.logging)?;
    tracing::info!("Starting texflow demo ({} frames)", frames);
    if let Some(path) = config_path.filter(|p| p.exists()) {
        tracing::info!("Loaded config from {:?}", path);
    }

    run(&config, frames)
}

/// Stderr logging plus an optional daily-rolling file. The guard must
/// outlive every log call.
fn init_logging(logging: &LoggingConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

fn run(config: &TexflowConfig, frames: u32) -> Result<()> {
    let context = Arc::new(HeadlessContext::new());
    let gpu = GpuThread::spawn("texflow-gpu", context.clone())?;
    let factory = Arc::new(RecordingDrawerFactory::new());
    let draw_log = factory.log();

    let mode = if config.engine.independent_context {
        ContextMode::Independent(context.clone())
    } else {
        ContextMode::Shared(gpu.handle())
    };
    let engine = DistributionEngine::new(&config.engine.name, mode, factory.clone())?;
    engine.resize(config.engine.width, config.engine.height)?;

    let targets = if config.targets.is_empty() {
        vec![Default::default()]
    } else {
        config.targets.clone()
    };
    for target in &targets {
        let sink = HeadlessSurface::window(config.engine.width, config.engine.height);
        target
            .install(&engine, sink, &config.options)
            .with_context(|| format!("Failed to install target {}", target.id))?;
    }

    let graph = PipelineGraph::new()?;
    let head = graph.add_node(ProxyStage::new());

    let shared_context: Arc<dyn GpuContext> = context.clone();
    let effect = graph.add_node(EffectStage::with_mode(
        shared_context.clone(),
        Box::new(RecordingEffect::new("tint")),
        config.options.pipeline_mode,
    ));

    let stills = Arc::new(AtomicUsize::new(0));
    let mut capture = CaptureStage::new(Box::new(SyntheticCapturer));
    config.options.arm_capture(&mut capture)?;
    let counter = stills.clone();
    capture.set_callback(move |still| {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Still {} ({} bytes)", still.index, still.pixels.len());
    });
    let capture = graph.add_node(capture);

    let branch = graph.add_node(BranchStage::new());
    let distributor = graph.add_node(DistributorStage::new(engine.clone()));

    let mut surface = SurfaceStage::new(shared_context, factory);
    surface.set_sink(HeadlessSurface::encoder(
        config.engine.width,
        config.engine.height,
    ))?;
    surface.set_max_fps(config.options.max_fps)?;
    surface.set_mirror(config.options.mirror_mode);
    let surface = graph.add_node(surface);

    for node in [effect, capture, branch] {
        chain::append(&graph, head, node)?;
    }
    graph.add_downstream(branch, distributor)?;
    graph.add_downstream(branch, surface)?;
    graph.resize(head, config.engine.width, config.engine.height)?;

    tracing::info!("Chain: {}", chain::describe(&graph, head)?);

    for i in 0..frames {
        let texture = context.allocate_texture();
        let frame = Frame::new(texture, config.engine.width, config.engine.height)?;
        let graph = graph.clone();
        gpu.handle().post(move || graph.on_frame(head, &frame))?;
        if i % 30 == 29 {
            std::thread::sleep(Duration::from_millis(16));
        }
    }
    gpu.handle().run_sync(|| ())?;
    engine.sync()?;
    graph.flush_callbacks();

    let snapshot = chain::snapshot(&graph, head)?;
    tracing::debug!("Snapshot: {}", snapshot.to_json()?);

    let stats = engine.stats();
    println!("chain      : {}", chain::describe(&graph, head)?);
    println!("targets    : {}", engine.count());
    println!(
        "engine     : {} requested, {} processed, {} drawn, {} throttled",
        stats.frames_requested, stats.frames_processed, stats.draws, stats.throttled
    );
    println!("draw calls : {}", draw_log.draws());
    println!("stills     : {}", stills.load(Ordering::Relaxed));

    engine.release_blocking();
    let graph_for_release = graph.clone();
    gpu.handle()
        .run_sync(move || graph_for_release.release(head))?
        .context("Failed to release chain")?;
    gpu.shutdown();

    tracing::info!("Shutting down...");
    Ok(())
}
