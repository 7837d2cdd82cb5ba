//! Frame rate limiting.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::time::{Duration, Instant};

/// Check a max-fps value; 0 means unlimited.
pub fn validate_max_fps(max_fps: f32) -> PipelineResult<f32> {
    if !max_fps.is_finite() || max_fps < 0.0 {
        return Err(PipelineError::InvalidArgument(format!(
            "max_fps must be a non-negative number, got {}",
            max_fps
        )));
    }
    Ok(max_fps)
}

/// Drops draws that come sooner than `1 / max_fps` after the last one.
///
/// The first draw always goes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameThrottle {
    max_fps: f32,
    last_draw: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(max_fps: f32) -> Self {
        Self {
            max_fps,
            last_draw: None,
        }
    }

    pub fn max_fps(&self) -> f32 {
        self.max_fps
    }

    pub fn set_max_fps(&mut self, max_fps: f32) {
        self.max_fps = max_fps;
    }

    /// `None` when unlimited.
    pub fn min_interval(&self) -> Option<Duration> {
        (self.max_fps > 0.0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.max_fps)))
    }

    pub fn should_draw(&self, now: Instant) -> bool {
        match (self.min_interval(), self.last_draw) {
            (Some(min), Some(last)) => now.saturating_duration_since(last) >= min,
            _ => true,
        }
    }

    pub fn mark_drawn(&mut self, now: Instant) {
        self.last_draw = Some(now);
    }

    pub fn last_draw(&self) -> Option<Instant> {
        self.last_draw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_draw_always_allowed() {
        let throttle = FrameThrottle::new(1.0);
        assert!(throttle.should_draw(Instant::now()));
    }

    #[test]
    fn test_throttles_within_interval() {
        let mut throttle = FrameThrottle::new(10.0);
        let start = Instant::now();
        throttle.mark_drawn(start);

        assert!(!throttle.should_draw(start + Duration::from_millis(50)));
        assert!(throttle.should_draw(start + Duration::from_millis(101)));
        assert!(throttle.should_draw(start + Duration::from_millis(250)));
    }

    #[test]
    fn test_unlimited() {
        let mut throttle = FrameThrottle::new(0.0);
        let now = Instant::now();
        throttle.mark_drawn(now);
        assert!(throttle.should_draw(now));
        assert_eq!(throttle.min_interval(), None);
    }

    #[test]
    fn test_validate_max_fps() {
        assert_eq!(validate_max_fps(30.0), Ok(30.0));
        assert_eq!(validate_max_fps(0.0), Ok(0.0));
        assert!(validate_max_fps(-1.0).is_err());
        assert!(validate_max_fps(f32::NAN).is_err());
        assert!(validate_max_fps(f32::INFINITY).is_err());
    }
}
