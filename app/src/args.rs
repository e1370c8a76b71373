//! Command line arguments of `strand-sim`.
//!
//! Values given on the command line override the matching keys of the config
//! file; everything else comes from the file or its defaults.
//!
//! ```bash
//! # Run 600 frames at 60 FPS with 1000 walkers
//! strand-sim --fps 60 --frames 600 --entities 1000
//!
//! # Same run, as fast as possible
//! strand-sim --fps 60 --frames 600 --blink
//!
//! # Load runtime settings from a file, log entity churn
//! RUST_LOG=strand_ecs=debug strand-sim --config sim.toml
//! ```

use std::path::PathBuf;

use clap::Parser;
use strand_ecs::{FrameSection, RuntimeConfig};

/// Frames run when neither the command line nor the config file bounds the
/// simulation.
pub const DEFAULT_FRAMES: u64 = 300;

/// Strand simulation runner.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "strand-sim",
    about = "Runs a demo world on a Strand runtime and prints frame statistics",
    version
)]
pub struct SimArgs {
    /// TOML file with `[runtime]` and `[frame]` sections.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after N frames.
    #[arg(long)]
    pub frames: Option<u64>,

    /// Target frames per second.
    #[arg(long)]
    pub fps: Option<f64>,

    /// Run frames back to back instead of in real time.
    #[arg(long)]
    pub blink: bool,

    /// Number of walker entities to spawn.
    #[arg(long, default_value = "100")]
    pub entities: usize,

    /// Depth of the entity chain destroyed in the cascade demo (0 disables it).
    #[arg(long, default_value = "3")]
    pub depth: usize,
}

impl SimArgs {
    /// Applies the frame overrides to `config`. The simulation always runs a
    /// bounded frame loop.
    pub fn apply(&self, mut config: RuntimeConfig) -> RuntimeConfig {
        let frame = config.frame.get_or_insert_with(FrameSection::default);
        if let Some(fps) = self.fps {
            frame.target_fps = fps;
        }
        if let Some(frames) = self.frames {
            frame.total_frames = frames;
        }
        if self.blink {
            frame.blink = true;
        }
        if frame.total_frames == 0 {
            log::info!("no frame limit given, stopping after {} frames", DEFAULT_FRAMES);
            frame.total_frames = DEFAULT_FRAMES;
        }
        config
    }
}
