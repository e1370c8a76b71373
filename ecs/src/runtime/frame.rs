//! Frame clock of a framed runtime.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::options::FrameOptions;

/// Counters published by the runtime thread for other threads to read.
#[derive(Debug, Default)]
pub(crate) struct SharedFrameStats {
    frames: AtomicU64,
    fps_bits: AtomicU64,
    run_elapsed_us: AtomicU64,
    update_elapsed_us: AtomicU64,
}

impl SharedFrameStats {
    pub(crate) fn snapshot(&self) -> FrameStats {
        FrameStats {
            frames: self.frames.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            run_elapsed: Duration::from_micros(self.run_elapsed_us.load(Ordering::Relaxed)),
            update_elapsed: Duration::from_micros(self.update_elapsed_us.load(Ordering::Relaxed)),
        }
    }
}

/// Snapshot of frame counters, see [`RuntimeHandle::stats`](super::RuntimeHandle::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Completed frames.
    pub frames: u64,
    /// Frames per second over the last full one-second window.
    pub fps: f64,
    /// Time since the frame loop began.
    pub run_elapsed: Duration,
    /// Duration of the last update stage.
    pub update_elapsed: Duration,
}

/// Frame timing, owned by the runtime thread.
///
/// `cur_frames` counts completed frames, so inside the update of the first
/// frame it reads 0.
pub struct Frame {
    options: FrameOptions,
    budget: Duration,
    cur_frames: Cell<u64>,
    cur_fps: Cell<f64>,
    run_start: Cell<Instant>,
    frame_start: Cell<Instant>,
    update_start: Cell<Instant>,
    loop_elapsed: Cell<Duration>,
    update_elapsed: Cell<Duration>,
    window_start: Cell<Instant>,
    window_frames: Cell<u64>,
    shared: Arc<SharedFrameStats>,
}

impl Frame {
    pub(crate) fn new(options: FrameOptions, shared: Arc<SharedFrameStats>) -> Self {
        let now = Instant::now();
        Self {
            budget: options.frame_interval(),
            options,
            cur_frames: Cell::new(0),
            cur_fps: Cell::new(0.0),
            run_start: Cell::new(now),
            frame_start: Cell::new(now),
            update_start: Cell::new(now),
            loop_elapsed: Cell::new(Duration::ZERO),
            update_elapsed: Cell::new(Duration::ZERO),
            window_start: Cell::new(now),
            window_frames: Cell::new(0),
            shared,
        }
    }

    pub fn options(&self) -> &FrameOptions {
        &self.options
    }

    pub fn target_fps(&self) -> f64 {
        self.options.target_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.options.total_frames
    }

    pub fn is_blink(&self) -> bool {
        self.options.blink
    }

    pub fn cur_frames(&self) -> u64 {
        self.cur_frames.get()
    }

    /// Measured frame rate, recomputed once per second.
    pub fn cur_fps(&self) -> f64 {
        self.cur_fps.get()
    }

    /// Time step for the current frame: the nominal `1 / target_fps` in
    /// blink mode, otherwise the measured length of the previous frame.
    pub fn frame_delta(&self) -> Duration {
        if self.options.blink || self.cur_frames.get() == 0 {
            self.budget
        } else {
            self.loop_elapsed.get()
        }
    }

    pub fn run_elapsed(&self) -> Duration {
        self.run_start.get().elapsed()
    }

    /// Length of the last completed frame.
    pub fn loop_elapsed(&self) -> Duration {
        self.loop_elapsed.get()
    }

    pub fn update_elapsed(&self) -> Duration {
        self.update_elapsed.get()
    }

    /// `true` once `total_frames` (if non-zero) frames have completed.
    pub fn reached_total(&self) -> bool {
        self.options.total_frames > 0 && self.cur_frames.get() >= self.options.total_frames
    }

    pub(crate) fn run_begin(&self) {
        let now = Instant::now();
        self.run_start.set(now);
        self.window_start.set(now);
        self.window_frames.set(0);
    }

    pub(crate) fn frame_begin(&self) {
        self.frame_start.set(Instant::now());
    }

    pub(crate) fn update_begin(&self) {
        self.update_start.set(Instant::now());
    }

    pub(crate) fn update_end(&self) {
        let elapsed = self.update_start.get().elapsed();
        self.update_elapsed.set(elapsed);
        self.shared
            .update_elapsed_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame_end(&self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.frame_start.get());
        self.loop_elapsed.set(elapsed);
        if !self.options.blink && elapsed > self.budget {
            log::warn!(
                "frame {} took {:?}, over the {:?} budget",
                self.cur_frames.get(),
                elapsed,
                self.budget
            );
        }

        let frames = self.cur_frames.get() + 1;
        self.cur_frames.set(frames);
        self.window_frames.set(self.window_frames.get() + 1);
        let window = now.duration_since(self.window_start.get());
        if window >= Duration::from_secs(1) {
            self.cur_fps.set(self.window_frames.get() as f64 / window.as_secs_f64());
            self.window_start.set(now);
            self.window_frames.set(0);
            self.shared
                .fps_bits
                .store(self.cur_fps.get().to_bits(), Ordering::Relaxed);
        }

        self.shared.frames.store(frames, Ordering::Relaxed);
        self.shared.run_elapsed_us.store(
            now.duration_since(self.run_start.get()).as_micros() as u64,
            Ordering::Relaxed,
        );
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("options", &self.options)
            .field("cur_frames", &self.cur_frames.get())
            .field("cur_fps", &self.cur_fps.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blink(total_frames: u64) -> Frame {
        Frame::new(
            FrameOptions {
                target_fps: 50.0,
                total_frames,
                blink: true,
            },
            Arc::default(),
        )
    }

    fn step(frame: &Frame) {
        frame.frame_begin();
        frame.update_begin();
        frame.update_end();
        frame.frame_end();
    }

    #[test]
    fn counts_frames_until_total() {
        let frame = blink(3);
        frame.run_begin();
        for expected in 0..3 {
            assert_eq!(frame.cur_frames(), expected);
            assert!(!frame.reached_total());
            step(&frame);
        }
        assert!(frame.reached_total());
        assert_eq!(frame.shared.snapshot().frames, 3);
    }

    #[test]
    fn unbounded_never_reaches_total() {
        let frame = blink(0);
        for _ in 0..10 {
            step(&frame);
        }
        assert!(!frame.reached_total());
    }

    #[test]
    fn blink_delta_is_nominal() {
        let frame = blink(0);
        step(&frame);
        assert_eq!(frame.frame_delta(), Duration::from_millis(20));
    }

    #[test]
    fn fps_window_closes_after_one_second() {
        let frame = blink(0);
        frame.run_begin();
        frame.window_start.set(Instant::now() - Duration::from_secs(2));
        step(&frame);
        assert!(frame.cur_fps() > 0.0);
        assert_eq!(frame.window_frames.get(), 0);
        assert!(frame.shared.snapshot().fps > 0.0);
    }
}
