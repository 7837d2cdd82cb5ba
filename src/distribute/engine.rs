//! DistributionEngine: fans one upstream frame out to many render targets.
//!
//! All target state lives on the engine's *owning thread*: either the GPU
//! thread the upstream stage draws on ([`ContextMode::Shared`]) or a thread
//! the engine spawns with a shared context ([`ContextMode::Independent`]).
//!
//! Callers talk to it through a FIFO request queue. Structural requests
//! (`add_target`, `remove_target`, `remove_all_targets`, `sync`) block until
//! the owning thread has applied them; everything else is fire-and-forget.
//! A blocking request issued on the owning thread itself runs inline, and is
//! rejected when made from inside one of the engine's own draws.
//!
//! ```text
//! caller ──push──▶ [request queue] ──drain task──▶ owning thread
//!                                                   │
//!                          targets (BTreeMap) ◀─────┘  draw / present
//! ```

use crate::distribute::request::{EngineRequest, Reply};
use crate::distribute::target::{DrawOutcome, RenderTarget, TargetInfo};
use crate::distribute::throttle::validate_max_fps;
use crate::gpu::{check_sink, DrawerFactory, GpuContext, GpuHandle, GpuThread, RenderSurface};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::TargetId;
use crate::types::{Color, Frame, Matrix4, MirrorMode};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where the engine runs.
pub enum ContextMode {
    /// Share the upstream stage's GPU thread and context.
    Shared(GpuHandle),
    /// Own a thread with a context shared from this parent.
    Independent(Arc<dyn GpuContext>),
}

/// Engine lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EngineState {
    Created = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Created,
            1 => EngineState::Started,
            2 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }

    pub fn accepts_requests(self) -> bool {
        matches!(self, EngineState::Created | EngineState::Started)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Created => "Created",
            EngineState::Started => "Started",
            EngineState::Stopping => "Stopping",
            EngineState::Stopped => "Stopped",
        };
        write!(f, "{}", name)
    }
}

/// Frame counters across all targets of one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Frames handed to `request_frame`
    pub frames_requested: u64,
    /// Frames the owning thread ran the draw loop for
    pub frames_processed: u64,
    pub draws: u64,
    pub throttled: u64,
    pub not_ready: u64,
    pub failures: u64,
}

#[derive(Default)]
struct EngineCounters {
    frames_requested: AtomicU64,
    frames_processed: AtomicU64,
    draws: AtomicU64,
    throttled: AtomicU64,
    not_ready: AtomicU64,
    failures: AtomicU64,
}

impl EngineCounters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            frames_requested: self.frames_requested.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Owning-thread state. Only locked from the owning thread.
struct EngineCore {
    targets: BTreeMap<TargetId, RenderTarget>,
    frame_size: (u32, u32),
    factory: Arc<dyn DrawerFactory>,
}

struct EngineShared {
    name: String,
    tx: Sender<EngineRequest>,
    rx: Receiver<EngineRequest>,
    state: AtomicU8,
    gpu: GpuHandle,
    owned_thread: Mutex<Option<GpuThread>>,
    owns_context: bool,
    core: Mutex<EngineCore>,
    /// Last-known target state for non-blocking queries
    snapshot: RwLock<BTreeMap<TargetId, TargetInfo>>,
    first_frame_done: AtomicBool,
    counters: EngineCounters,
}

/// Cloneable handle to a distribution engine.
#[derive(Clone)]
pub struct DistributionEngine {
    shared: Arc<EngineShared>,
}

impl DistributionEngine {
    pub fn new(
        name: &str,
        mode: ContextMode,
        factory: Arc<dyn DrawerFactory>,
    ) -> PipelineResult<Self> {
        let (gpu, owned_thread, owns_context) = match mode {
            ContextMode::Shared(handle) => (handle, None, false),
            ContextMode::Independent(parent) => {
                let context = parent.create_shared()?;
                let thread = GpuThread::spawn(&format!("{}-gpu", name), context)?;
                (thread.handle(), Some(thread), true)
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(EngineShared {
            name: name.to_string(),
            tx,
            rx,
            state: AtomicU8::new(EngineState::Created as u8),
            gpu,
            owned_thread: Mutex::new(owned_thread),
            owns_context,
            core: Mutex::new(EngineCore {
                targets: BTreeMap::new(),
                frame_size: (0, 0),
                factory,
            }),
            snapshot: RwLock::new(BTreeMap::new()),
            first_frame_done: AtomicBool::new(false),
            counters: EngineCounters::default(),
        });

        let starter = shared.clone();
        shared.gpu.post(move || starter.start())?;

        tracing::debug!(
            "Distribution engine '{}' created on '{}' ({})",
            name,
            shared.gpu.name(),
            if owns_context { "independent" } else { "shared" }
        );
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Started and holding a usable context.
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Started && self.shared.gpu.context().is_valid()
    }

    /// Whether the engine runs on a thread it spawned itself.
    pub fn is_independent(&self) -> bool {
        self.shared.owns_context
    }

    pub fn gpu(&self) -> &GpuHandle {
        &self.shared.gpu
    }

    // ── Structural (blocking) ──

    /// Add a target drawing into `sink`; replaces an existing target with
    /// the same id.
    pub fn add_target(
        &self,
        id: TargetId,
        sink: Arc<dyn RenderSurface>,
        recordable: bool,
        max_fps: f32,
    ) -> PipelineResult<()> {
        check_sink(sink.as_ref())?;
        let max_fps = validate_max_fps(max_fps)?;
        self.shared.call(|reply| EngineRequest::AddTarget {
            id,
            sink,
            recordable,
            max_fps,
            reply,
        })
    }

    pub fn remove_target(&self, id: TargetId) -> PipelineResult<()> {
        self.shared
            .call(|reply| EngineRequest::RemoveTarget { id, reply })
    }

    pub fn remove_all_targets(&self) -> PipelineResult<()> {
        self.shared.call(|reply| EngineRequest::RemoveAll { reply })
    }

    /// Block until every request queued before this one has been handled.
    pub fn sync(&self) -> PipelineResult<()> {
        self.shared.call(|reply| EngineRequest::Sync { reply })
    }

    // ── Queued ──

    pub fn set_enabled(&self, id: TargetId, enabled: bool) -> PipelineResult<()> {
        self.shared.enqueue(EngineRequest::SetEnabled { id, enabled })?;
        if let Some(info) = self.shared.snapshot.write().get_mut(&id) {
            info.enabled = enabled;
        }
        Ok(())
    }

    pub fn set_mirror(&self, id: TargetId, mode: MirrorMode) -> PipelineResult<()> {
        self.shared.enqueue(EngineRequest::SetMirror {
            id: Some(id),
            mode,
        })?;
        if let Some(info) = self.shared.snapshot.write().get_mut(&id) {
            info.mirror = mode;
        }
        Ok(())
    }

    pub fn set_mirror_all(&self, mode: MirrorMode) -> PipelineResult<()> {
        self.shared
            .enqueue(EngineRequest::SetMirror { id: None, mode })?;
        for info in self.shared.snapshot.write().values_mut() {
            info.mirror = mode;
        }
        Ok(())
    }

    pub fn set_model_view(&self, id: TargetId, matrix: Matrix4) -> PipelineResult<()> {
        self.shared
            .enqueue(EngineRequest::SetModelView { id, matrix })?;
        if let Some(info) = self.shared.snapshot.write().get_mut(&id) {
            info.model_view = matrix;
        }
        Ok(())
    }

    /// 0 means unlimited. Invalid values fail before anything is queued.
    pub fn set_max_fps(&self, id: TargetId, max_fps: f32) -> PipelineResult<()> {
        let max_fps = validate_max_fps(max_fps)?;
        self.shared
            .enqueue(EngineRequest::SetMaxFps { id, max_fps })?;
        if let Some(info) = self.shared.snapshot.write().get_mut(&id) {
            info.max_fps = max_fps;
        }
        Ok(())
    }

    pub fn clear(&self, id: TargetId, color: Color) -> PipelineResult<()> {
        self.shared.enqueue(EngineRequest::Clear {
            id: Some(id),
            color,
        })
    }

    pub fn clear_all(&self, color: Color) -> PipelineResult<()> {
        self.shared
            .enqueue(EngineRequest::Clear { id: None, color })
    }

    /// New frame size; off-screen scratch buffers follow on the next draw.
    pub fn resize(&self, width: u32, height: u32) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "engine size must be non-zero, got {}x{}",
                width, height
            )));
        }
        self.shared
            .enqueue(EngineRequest::Resize { width, height })
    }

    /// Drop cached drawer programs on every target.
    pub fn refresh(&self) -> PipelineResult<()> {
        self.shared.enqueue(EngineRequest::Refresh)
    }

    /// Hot path. Returns whether the frame was accepted.
    ///
    /// On the owning thread, once a first frame has gone through the queue,
    /// pending requests are drained and the frame is drawn inline.
    pub fn request_frame(&self, frame: Frame) -> bool {
        let shared = &self.shared;
        shared.counters.frames_requested.fetch_add(1, Ordering::Relaxed);
        if !shared.state().accepts_requests() {
            tracing::trace!("Engine '{}' dropped frame: not running", shared.name);
            return false;
        }

        if shared.gpu.is_current() && shared.first_frame_done.load(Ordering::Acquire) {
            shared.drain();
            if let Some(mut core) = shared.core.try_lock() {
                shared.draw_frame(&mut core, &frame);
                drop(core);
                // Requests queued by the draw itself
                shared.drain();
                return true;
            }
        }
        shared.enqueue(EngineRequest::Frame(frame)).is_ok()
    }

    // ── Queries (non-blocking, last-known state) ──

    pub fn is_enabled(&self, id: TargetId) -> bool {
        self.shared
            .snapshot
            .read()
            .get(&id)
            .is_some_and(|info| info.enabled)
    }

    pub fn mirror(&self, id: TargetId) -> Option<MirrorMode> {
        self.shared.snapshot.read().get(&id).map(|info| info.mirror)
    }

    pub fn count(&self) -> usize {
        self.shared.snapshot.read().len()
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        self.shared.snapshot.read().keys().copied().collect()
    }

    pub fn target_info(&self, id: TargetId) -> Option<TargetInfo> {
        self.shared.snapshot.read().get(&id).cloned()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    // ── Lifecycle ──

    /// Stop the engine. Returns once the owning thread has been asked to
    /// stop; teardown happens there. Idempotent.
    pub fn release(&self) {
        if self.shared.begin_stop() {
            self.shared.push_stop(None);
        }
    }

    /// Like [`release`](Self::release) but waits for teardown to finish.
    pub fn release_blocking(&self) {
        if !self.shared.begin_stop() {
            return;
        }
        let (reply, done) = crossbeam_channel::bounded(1);
        self.shared.push_stop(Some(reply));
        if !self.shared.gpu.is_current() {
            let _ = done.recv();
        }
    }
}

impl std::fmt::Debug for DistributionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionEngine")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("targets", &self.count())
            .finish()
    }
}

impl EngineShared {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn start(&self) {
        if self
            .state
            .compare_exchange(
                EngineState::Created as u8,
                EngineState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::info!("Distribution engine '{}' started", self.name);
        }
    }

    /// Move to Stopping. False when already stopping or stopped.
    fn begin_stop(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !EngineState::from_u8(current).accepts_requests() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                EngineState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn push_stop(self: &Arc<Self>, reply: Option<Reply>) {
        tracing::debug!("Distribution engine '{}' stopping", self.name);
        // The receiver lives in `self`, so this cannot fail
        let _ = self.tx.send(EngineRequest::Stop { reply });
        self.schedule_drain();
    }

    fn enqueue(self: &Arc<Self>, request: EngineRequest) -> PipelineResult<()> {
        if !self.state().accepts_requests() {
            return Err(PipelineError::EngineStopped);
        }
        self.tx
            .send(request)
            .map_err(|_| PipelineError::ChannelSend)?;
        self.schedule_drain();
        Ok(())
    }

    /// Enqueue a blocking request and wait for its reply.
    fn call<F>(self: &Arc<Self>, make: F) -> PipelineResult<()>
    where
        F: FnOnce(Reply) -> EngineRequest,
    {
        let on_owner = self.gpu.is_current();
        // The core is only held on the owning thread while a request or draw runs
        if on_owner && self.core.is_locked() {
            return Err(PipelineError::InvalidArgument(format!(
                "blocking call on engine '{}' made from inside its own draw",
                self.name
            )));
        }
        let (reply, result) = crossbeam_channel::bounded(1);
        self.enqueue(make(reply))?;
        if on_owner {
            // Drained inline by `enqueue`
            return result.try_recv().map_err(|_| PipelineError::ChannelRecv)?;
        }
        result.recv().map_err(|_| PipelineError::EngineStopped)?
    }

    fn schedule_drain(self: &Arc<Self>) {
        if self.gpu.is_current() {
            self.drain();
            return;
        }
        let this = self.clone();
        if self.gpu.post(move || this.drain()).is_err() {
            // Owning thread is gone; handle here so waiters get an answer
            self.drain();
        }
    }

    /// Handle queued requests in order.
    ///
    /// Re-entered from inside a request or draw, this leaves the queue
    /// untouched; whoever holds the core picks new requests up in order.
    fn drain(self: &Arc<Self>) {
        let Some(mut core) = self.core.try_lock() else {
            return;
        };
        while let Ok(request) = self.rx.try_recv() {
            self.handle(&mut core, request);
        }
    }

    fn handle(&self, core: &mut EngineCore, request: EngineRequest) {
        if self.state() == EngineState::Stopped {
            tracing::trace!(
                "Engine '{}' rejected {}: stopped",
                self.name,
                request.label()
            );
            if let Some(reply) = request.into_reply() {
                let _ = reply.send(Err(PipelineError::EngineStopped));
            }
            return;
        }

        let ctx = self.gpu.context().clone();
        match request {
            EngineRequest::AddTarget {
                id,
                sink,
                recordable,
                max_fps,
                reply,
            } => {
                let result = RenderTarget::new(id, sink, recordable, max_fps).map(|target| {
                    let info = target.info();
                    if let Some(mut old) = core.targets.insert(id, target) {
                        old.release(ctx.as_ref());
                        tracing::debug!("Engine '{}' replaced target {}", self.name, id);
                    }
                    tracing::debug!(
                        "Engine '{}' added target {} ({} surface {})",
                        self.name,
                        id,
                        info.kind.display_name(),
                        info.sink_id
                    );
                    self.snapshot.write().insert(id, info);
                });
                let _ = reply.send(result);
            }
            EngineRequest::RemoveTarget { id, reply } => {
                let result = match core.targets.remove(&id) {
                    Some(mut target) => {
                        target.release(ctx.as_ref());
                        self.snapshot.write().remove(&id);
                        tracing::debug!("Engine '{}' removed target {}", self.name, id);
                        Ok(())
                    }
                    None => Err(PipelineError::TargetNotFound(id)),
                };
                let _ = reply.send(result);
            }
            EngineRequest::RemoveAll { reply } => {
                self.release_targets(core, ctx.as_ref());
                let _ = reply.send(Ok(()));
            }
            EngineRequest::SetEnabled { id, enabled } => {
                self.with_target(core, id, |t| t.set_enabled(enabled));
            }
            EngineRequest::SetMirror { id: Some(id), mode } => {
                self.with_target(core, id, |t| t.set_mirror(mode));
            }
            EngineRequest::SetMirror { id: None, mode } => {
                for target in core.targets.values_mut() {
                    target.set_mirror(mode);
                }
                self.publish(core);
            }
            EngineRequest::SetModelView { id, matrix } => {
                self.with_target(core, id, |t| t.set_model_view(matrix));
            }
            EngineRequest::SetMaxFps { id, max_fps } => {
                self.with_target(core, id, |t| t.set_max_fps(max_fps));
            }
            EngineRequest::Clear { id, color } => {
                for (target_id, target) in core.targets.iter_mut() {
                    if id.is_some_and(|wanted| wanted != *target_id) {
                        continue;
                    }
                    if let Err(e) = target.clear(ctx.as_ref(), color) {
                        tracing::warn!("Engine '{}' failed to clear {}: {}", self.name, target_id, e);
                    }
                }
            }
            EngineRequest::Frame(frame) => self.draw_frame(core, &frame),
            EngineRequest::Resize { width, height } => {
                core.frame_size = (width, height);
                tracing::debug!("Engine '{}' resized to {}x{}", self.name, width, height);
            }
            EngineRequest::Refresh => {
                for target in core.targets.values_mut() {
                    target.reset_drawers();
                }
            }
            EngineRequest::Sync { reply } => {
                let _ = reply.send(Ok(()));
            }
            EngineRequest::Stop { reply } => {
                self.stop(core, ctx.as_ref());
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    fn with_target<F>(&self, core: &mut EngineCore, id: TargetId, apply: F)
    where
        F: FnOnce(&mut RenderTarget),
    {
        match core.targets.get_mut(&id) {
            Some(target) => {
                apply(target);
                self.snapshot.write().insert(id, target.info());
            }
            None => tracing::debug!("Engine '{}' has no target {}", self.name, id),
        }
    }

    fn publish(&self, core: &EngineCore) {
        let mut snapshot = self.snapshot.write();
        snapshot.clear();
        snapshot.extend(core.targets.iter().map(|(id, t)| (*id, t.info())));
    }

    fn draw_frame(&self, core: &mut EngineCore, frame: &Frame) {
        if self.state() == EngineState::Stopped {
            return;
        }
        let ctx = self.gpu.context().clone();
        if !ctx.is_valid() {
            tracing::trace!("Engine '{}' skipped frame: context invalid", self.name);
            return;
        }

        let counters = &self.counters;
        counters.frames_processed.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let factory = core.factory.clone();
        let frame_size = core.frame_size;

        for (id, target) in core.targets.iter_mut() {
            match target.draw(ctx.as_ref(), factory.as_ref(), frame, frame_size, now) {
                Ok(DrawOutcome::Drawn) => {
                    counters.draws.fetch_add(1, Ordering::Relaxed);
                }
                Ok(DrawOutcome::Throttled) => {
                    counters.throttled.fetch_add(1, Ordering::Relaxed);
                }
                Ok(DrawOutcome::NotReady) => {
                    counters.not_ready.fetch_add(1, Ordering::Relaxed);
                }
                Ok(DrawOutcome::Disabled) => {}
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Engine '{}' target {} draw failed: {}", self.name, id, e);
                }
            }
        }

        {
            let mut snapshot = self.snapshot.write();
            for (id, target) in core.targets.iter() {
                if let Some(info) = snapshot.get_mut(id) {
                    (info.draws, info.throttled) = target.counters();
                }
            }
        }
        self.first_frame_done.store(true, Ordering::Release);
    }

    fn release_targets(&self, core: &mut EngineCore, ctx: &dyn GpuContext) {
        for (_, mut target) in std::mem::take(&mut core.targets) {
            target.release(ctx);
        }
        self.snapshot.write().clear();
    }

    fn stop(&self, core: &mut EngineCore, ctx: &dyn GpuContext) {
        let count = core.targets.len();
        self.release_targets(core, ctx);
        if self.owns_context {
            ctx.release();
        }
        self.state
            .store(EngineState::Stopped as u8, Ordering::Release);

        // On the owning thread this only asks the loop to exit
        drop(self.owned_thread.lock().take());
        tracing::info!(
            "Distribution engine '{}' stopped ({} target(s) released)",
            self.name,
            count
        );
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        if self.state() == EngineState::Stopped {
            return;
        }
        tracing::debug!("Distribution engine '{}' dropped without release", self.name);
        let targets = std::mem::take(&mut self.core.get_mut().targets);
        let owns_context = self.owns_context;
        if self.gpu.is_current() {
            release_detached(targets, self.gpu.context().as_ref(), owns_context);
            return;
        }

        // Queued ahead of the Stop the owned thread gets when it drops after this
        let pending = Arc::new(Mutex::new(Some(targets)));
        let job = pending.clone();
        let ctx = self.gpu.context().clone();
        let posted = self.gpu.post(move || {
            if let Some(targets) = job.lock().take() {
                release_detached(targets, ctx.as_ref(), owns_context);
            }
        });
        if posted.is_err() {
            tracing::warn!(
                "GPU thread of engine '{}' is gone; releasing targets here",
                self.name
            );
            if let Some(targets) = pending.lock().take() {
                release_detached(targets, self.gpu.context().as_ref(), owns_context);
            }
        }
    }
}

/// Teardown for an engine dropped without `release`.
fn release_detached(
    targets: BTreeMap<TargetId, RenderTarget>,
    ctx: &dyn GpuContext,
    owns_context: bool,
) {
    for (_, mut target) in targets {
        target.release(ctx);
    }
    if owns_context {
        ctx.release();
    }
}
