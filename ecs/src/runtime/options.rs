use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::{ConfigError, RuntimeError};

/// Options of a [`Runtime`](super::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Name of the runtime thread and of the runtime inside a service.
    pub name: String,
    /// Bound of the task queue.
    pub process_queue_capacity: usize,
    /// How long a push waits for queue capacity.
    pub process_queue_timeout: Duration,
    /// Interval between GC sweeps; in blink mode, converted to frames.
    pub gc_interval: Duration,
    /// Recover panics in calls, hooks and subscribers.
    pub auto_recover: bool,
    /// Receives recovered panics.
    pub report_error: Option<Sender<RuntimeError>>,
    /// Runs a frame loop when set.
    pub frame: Option<FrameOptions>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            name: "runtime".to_string(),
            process_queue_capacity: 128,
            process_queue_timeout: Duration::from_secs(5),
            gc_interval: Duration::from_secs(10),
            auto_recover: false,
            report_error: None,
            frame: None,
        }
    }
}

impl RuntimeOptions {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn process_queue_capacity(mut self, capacity: usize) -> Self {
        self.process_queue_capacity = capacity;
        self
    }

    pub fn process_queue_timeout(mut self, timeout: Duration) -> Self {
        self.process_queue_timeout = timeout;
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    pub fn report_error(mut self, channel: Sender<RuntimeError>) -> Self {
        self.report_error = Some(channel);
        self
    }

    pub fn frame(mut self, frame: FrameOptions) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.process_queue_timeout.is_zero() {
            return Err(ConfigError::ZeroQueueTimeout);
        }
        if self.gc_interval.is_zero() {
            return Err(ConfigError::ZeroGcInterval);
        }
        if let Some(frame) = &self.frame {
            frame.validate()?;
        }
        Ok(())
    }
}

/// Frame loop settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOptions {
    pub target_fps: f64,
    /// Frames to run before stopping; 0 runs until stopped.
    pub total_frames: u64,
    /// Run frames back to back instead of pacing them in real time.
    pub blink: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            total_frames: 0,
            blink: false,
        }
    }
}

impl FrameOptions {
    pub fn new(target_fps: f64) -> Self {
        Self {
            target_fps,
            ..Self::default()
        }
    }

    pub fn total_frames(mut self, total_frames: u64) -> Self {
        self.total_frames = total_frames;
        self
    }

    pub fn blink(mut self, blink: bool) -> Self {
        self.blink = blink;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(ConfigError::InvalidTargetFps(self.target_fps));
        }
        if Duration::try_from_secs_f64(1.0 / self.target_fps).is_err() {
            return Err(ConfigError::FrameIntervalOutOfRange(self.target_fps));
        }
        Ok(())
    }

    /// `1 / target_fps`, saturating to [`Duration::MAX`] for options that
    /// fail [`validate`](Self::validate).
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.target_fps).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = RuntimeOptions::default();
        assert_eq!(options.process_queue_capacity, 128);
        assert_eq!(options.process_queue_timeout, Duration::from_secs(5));
        assert_eq!(options.gc_interval, Duration::from_secs(10));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let base = RuntimeOptions::default();
        assert_eq!(
            base.clone().process_queue_capacity(0).validate(),
            Err(ConfigError::ZeroQueueCapacity)
        );
        assert_eq!(
            base.clone().process_queue_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroQueueTimeout)
        );
        assert_eq!(
            base.clone().gc_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroGcInterval)
        );
        assert_eq!(
            base.frame(FrameOptions::new(0.0)).validate(),
            Err(ConfigError::InvalidTargetFps(0.0))
        );
        assert!(FrameOptions::new(f64::NAN).validate().is_err());
    }

    #[test]
    fn frame_interval_follows_fps() {
        assert_eq!(FrameOptions::new(10.0).frame_interval(), Duration::from_millis(100));
    }

    #[test]
    fn unrepresentable_frame_interval_is_rejected() {
        let tiny = FrameOptions::new(1e-20);
        assert_eq!(tiny.validate(), Err(ConfigError::FrameIntervalOutOfRange(1e-20)));
        assert_eq!(tiny.frame_interval(), Duration::MAX);
        assert!(matches!(
            crate::runtime::Runtime::new(RuntimeOptions::default().frame(tiny)),
            Err(ConfigError::FrameIntervalOutOfRange(_))
        ));
        assert!(FrameOptions::new(1e-3).validate().is_ok());
    }
}
