//! GPU execution thread
//!
//! A `GpuThread` is a named OS thread draining a crossbeam channel of tasks.
//! Whatever context it was spawned with is the context its tasks use; the
//! thread itself never touches it beyond handing it out.

use crate::gpu::GpuContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

type GpuTask = Box<dyn FnOnce() + Send>;

enum GpuMessage {
    Run(GpuTask),
    Stop,
}

/// Cloneable handle for posting work to a GPU thread.
#[derive(Clone)]
pub struct GpuHandle {
    tx: Sender<GpuMessage>,
    thread_id: ThreadId,
    name: Arc<str>,
    context: Arc<dyn GpuContext>,
    stopped: Arc<AtomicBool>,
}

impl GpuHandle {
    /// Queue `task` behind everything already posted.
    pub fn post<F>(&self, task: F) -> PipelineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(GpuMessage::Run(Box::new(task)))
            .map_err(|_| PipelineError::ChannelSend)
    }

    /// Run `task` on the GPU thread and wait for its result.
    ///
    /// Runs inline when already on the GPU thread.
    pub fn run_sync<F, R>(&self, task: F) -> PipelineResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(task());
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.post(move || {
            let _ = reply_tx.send(task());
        })?;
        reply_rx.recv().map_err(|_| PipelineError::ChannelRecv)
    }

    /// Whether the calling thread is this GPU thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn context(&self) -> &Arc<dyn GpuContext> {
        &self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the thread to exit after the tasks already queued.
    pub fn request_stop(&self) {
        let _ = self.tx.send(GpuMessage::Stop);
    }

    /// Whether the thread's loop has exited
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Tasks posted but not yet picked up
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl std::fmt::Debug for GpuHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuHandle")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// Owner of a GPU execution thread. Stops and joins on drop.
pub struct GpuThread {
    handle: GpuHandle,
    join: Option<JoinHandle<()>>,
}

impl GpuThread {
    pub fn spawn(name: &str, context: Arc<dyn GpuContext>) -> PipelineResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread_name = name.to_string();
        let stopped = Arc::new(AtomicBool::new(false));
        let exit_flag = StoppedFlag(stopped.clone());
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_loop(&thread_name, rx, exit_flag))
            .map_err(|e| PipelineError::ThreadSpawn(format!("GPU thread '{}': {}", name, e)))?;

        let handle = GpuHandle {
            tx,
            thread_id: join.thread().id(),
            name: Arc::from(name),
            context,
            stopped,
        };

        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> GpuHandle {
        self.handle.clone()
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.handle.request_stop();
        if let Some(join) = self.join.take() {
            // A thread cannot join itself; it exits once it sees Stop
            if self.handle.is_current() {
                return;
            }
            if join.join().is_err() {
                tracing::error!("GPU thread '{}' panicked", self.handle.name());
            }
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Marks the thread stopped when the loop exits, panics included.
struct StoppedFlag(Arc<AtomicBool>);

impl Drop for StoppedFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn run_loop(name: &str, rx: Receiver<GpuMessage>, _exit_flag: StoppedFlag) {
    tracing::debug!("GPU thread '{}' started", name);
    for message in rx.iter() {
        match message {
            GpuMessage::Run(task) => task(),
            GpuMessage::Stop => break,
        }
    }
    tracing::debug!("GPU thread '{}' stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessContext;
    use std::sync::atomic::AtomicUsize;

    fn spawn() -> GpuThread {
        GpuThread::spawn("test-gpu", Arc::new(HeadlessContext::new())).unwrap()
    }

    #[test]
    fn test_tasks_run_in_order() {
        let thread = spawn();
        let handle = thread.handle();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            handle.post(move || log.lock().push(i)).unwrap();
        }
        handle.run_sync(|| ()).unwrap();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_sync_on_own_thread_is_inline() {
        let thread = spawn();
        let handle = thread.handle();
        let inner = handle.clone();
        let value = handle
            .run_sync(move || {
                assert!(inner.is_current());
                inner.run_sync(|| 5).unwrap()
            })
            .unwrap();
        assert_eq!(value, 5);
        assert!(!handle.is_current());
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let thread = spawn();
        let handle = thread.handle();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        handle.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(handle.is_stopped());
        assert_eq!(handle.post(|| {}), Err(PipelineError::ChannelSend));
    }

    #[test]
    fn test_is_stopped_leaves_queue_alone() {
        let thread = spawn();
        let handle = thread.handle();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        handle
            .post(move || {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
            })
            .unwrap();
        started_rx.recv().unwrap();

        for _ in 0..3 {
            assert!(!handle.is_stopped());
        }
        assert_eq!(handle.pending(), 0);

        drop(gate_tx);
        thread.shutdown();
        assert!(handle.is_stopped());
    }
}
