//! CaptureStage: periodic still capture from the frame stream.
//!
//! Capture is armed with a count and a minimum interval:
//!
//! - `num_captures == -1` captures indefinitely
//! - `num_captures == 0` disables capture
//! - `num_captures == N` captures N stills, then disarms
//!
//! Stills are read back by a [`StillCapturer`] on the GPU thread and handed
//! to the registered callback on the graph's callback worker. Frames are
//! always forwarded untouched.

use crate::pipeline::error::{PipelineError, PipelineResult, StageError};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{FrameAction, StageContext};
use crate::types::Frame;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Captures indefinitely.
pub const UNLIMITED_CAPTURES: i32 = -1;

/// Reads a frame's pixels back from the GPU.
pub trait StillCapturer: Send {
    /// RGBA8 pixels of `frame`, row-major.
    fn capture(&mut self, frame: &Frame) -> Result<Vec<u8>, StageError>;
}

/// One captured image.
#[derive(Debug, Clone)]
pub struct CapturedStill {
    pub node: NodeId,
    /// 0-based index since the stage was last armed.
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

pub type StillCallback = Arc<dyn Fn(CapturedStill) + Send + Sync>;

pub struct CaptureStage {
    capturer: Box<dyn StillCapturer>,
    remaining: i32,
    interval: Duration,
    last_capture: Option<Instant>,
    taken: u32,
    on_still: Option<StillCallback>,
}

impl CaptureStage {
    /// Disarmed capture stage.
    pub fn new(capturer: Box<dyn StillCapturer>) -> Self {
        Self {
            capturer,
            remaining: 0,
            interval: Duration::ZERO,
            last_capture: None,
            taken: 0,
            on_still: None,
        }
    }

    pub fn name(&self) -> &str {
        "Capture"
    }

    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(CapturedStill) + Send + Sync + 'static,
    {
        self.on_still = Some(Arc::new(callback));
    }

    /// Re-arm capture with a new count and minimum spacing.
    pub fn request_capture(&mut self, num_captures: i32, interval_ms: u64) -> PipelineResult<()> {
        if num_captures < UNLIMITED_CAPTURES {
            return Err(PipelineError::InvalidArgument(format!(
                "num_captures must be -1, 0 or positive, got {}",
                num_captures
            )));
        }
        self.remaining = num_captures;
        self.interval = Duration::from_millis(interval_ms);
        self.last_capture = None;
        self.taken = 0;
        tracing::debug!(
            "Capture armed: {} still(s) every {}ms",
            num_captures,
            interval_ms
        );
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.remaining = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining != 0
    }

    /// Captures left; -1 when unlimited.
    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    /// Stills taken since last armed.
    pub fn taken(&self) -> u32 {
        self.taken
    }

    fn due(&self, now: Instant) -> bool {
        match self.last_capture {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn on_frame(
        &mut self,
        ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        let now = Instant::now();
        if !self.is_armed() || !self.due(now) {
            return Ok(FrameAction::Forward);
        }

        // Stamp before reading back so a failing capturer is not retried every frame
        self.last_capture = Some(now);
        let pixels = self.capturer.capture(frame)?;

        let still = CapturedStill {
            node: ctx.node,
            index: self.taken,
            width: frame.width,
            height: frame.height,
            pixels,
            taken_at: Utc::now(),
        };
        self.taken += 1;
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        tracing::trace!("Captured still {} on {}", still.index, ctx.node);

        if let Some(callback) = &self.on_still {
            let callback = callback.clone();
            if !ctx.callbacks.post(move || callback(still)) {
                tracing::warn!("Callback worker gone; dropped captured still");
            }
        }
        Ok(FrameAction::Forward)
    }

    pub fn on_release(&mut self) {
        self.remaining = 0;
        self.on_still = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::SyntheticCapturer;
    use crate::pipeline::events::CallbackWorker;
    use crate::types::TextureId;
    use parking_lot::Mutex;

    fn deliver(stage: &mut CaptureStage, worker: &CallbackWorker, frames: usize) {
        let frame = Frame::new(TextureId(1), 4, 4).unwrap();
        let mut ctx = StageContext {
            node: NodeId(3),
            width: 4,
            height: 4,
            callbacks: worker.sender(),
        };
        for _ in 0..frames {
            assert_eq!(stage.on_frame(&mut ctx, &frame).unwrap(), FrameAction::Forward);
        }
        worker.sender().flush();
    }

    #[test]
    fn test_disarmed_by_default() {
        let worker = CallbackWorker::spawn("test-capture").unwrap();
        let mut stage = CaptureStage::new(Box::new(SyntheticCapturer));
        deliver(&mut stage, &worker, 3);
        assert_eq!(stage.taken(), 0);
    }

    #[test]
    fn test_fixed_count_then_disarms() {
        let worker = CallbackWorker::spawn("test-capture").unwrap();
        let stills = Arc::new(Mutex::new(Vec::new()));
        let sink = stills.clone();

        let mut stage = CaptureStage::new(Box::new(SyntheticCapturer));
        stage.set_callback(move |still| sink.lock().push(still));
        stage.request_capture(2, 0).unwrap();
        deliver(&mut stage, &worker, 5);

        assert!(!stage.is_armed());
        let stills = stills.lock();
        assert_eq!(stills.len(), 2);
        assert_eq!(stills[0].index, 0);
        assert_eq!(stills[1].index, 1);
        assert_eq!(stills[1].node, NodeId(3));
        assert_eq!(stills[0].pixels.len(), 64);
    }

    #[test]
    fn test_unlimited_respects_interval() {
        let worker = CallbackWorker::spawn("test-capture").unwrap();
        let mut stage = CaptureStage::new(Box::new(SyntheticCapturer));
        stage.request_capture(UNLIMITED_CAPTURES, 60_000).unwrap();
        deliver(&mut stage, &worker, 10);

        // Only the first frame is due within a one-minute interval
        assert_eq!(stage.taken(), 1);
        assert_eq!(stage.remaining(), UNLIMITED_CAPTURES);
    }

    #[test]
    fn test_invalid_count_rejected() {
        let mut stage = CaptureStage::new(Box::new(SyntheticCapturer));
        assert!(stage.request_capture(-2, 0).is_err());
        assert!(!stage.is_armed());
    }
}
