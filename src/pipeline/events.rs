//! Callback worker thread.
//!
//! Per-frame failures and captured stills are reported off the frame path:
//! the GPU thread only pushes a closure onto a crossbeam channel, and a
//! dedicated worker runs it. A slow or panicking callback therefore never
//! stalls frame delivery.

use crate::pipeline::error::{PipelineError, PipelineResult, StageError};
use crate::pipeline::id::NodeId;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// One stage failing to handle one frame.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub node: NodeId,
    pub stage: String,
    pub error: StageError,
    pub at: DateTime<Utc>,
}

pub type ErrorCallback = Arc<dyn Fn(&StageFailure) + Send + Sync>;

type CallbackTask = Box<dyn FnOnce() + Send>;

enum WorkerMessage {
    Run(CallbackTask),
    Stop,
}

/// Cloneable handle for posting callbacks to the worker.
#[derive(Clone)]
pub struct CallbackSender {
    tx: Sender<WorkerMessage>,
    worker: ThreadId,
}

impl CallbackSender {
    /// Queue `task` on the worker. Returns false once the worker has stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(WorkerMessage::Run(Box::new(task))).is_ok()
    }

    /// Block until every callback posted so far has run.
    pub fn flush(&self) {
        if thread::current().id() == self.worker {
            return;
        }
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.post(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}

/// Owner of the worker thread. Stops and joins on drop.
pub(crate) struct CallbackWorker {
    sender: CallbackSender,
    join: Option<JoinHandle<()>>,
}

impl CallbackWorker {
    pub(crate) fn spawn(name: &str) -> PipelineResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(rx))
            .map_err(|e| PipelineError::ThreadSpawn(format!("callback worker: {}", e)))?;
        let sender = CallbackSender {
            tx,
            worker: join.thread().id(),
        };
        Ok(Self {
            sender,
            join: Some(join),
        })
    }

    pub(crate) fn sender(&self) -> &CallbackSender {
        &self.sender
    }
}

impl Drop for CallbackWorker {
    fn drop(&mut self) {
        let _ = self.sender.tx.send(WorkerMessage::Stop);
        if let Some(join) = self.join.take() {
            if thread::current().id() != self.sender.worker && join.join().is_err() {
                tracing::error!("Callback worker panicked");
            }
        }
    }
}

fn run_worker(rx: Receiver<WorkerMessage>) {
    for message in rx.iter() {
        match message {
            WorkerMessage::Run(task) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                    tracing::error!("Pipeline callback panicked");
                }
            }
            WorkerMessage::Stop => break,
        }
    }
}
