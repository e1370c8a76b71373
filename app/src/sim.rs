//! One simulation run: config, service, runtime, report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use strand_ecs::{ConfigError, EcError, FrameStats, RuntimeConfig, RuntimeError, ServiceContext};
use thiserror::Error;

use crate::args::SimArgs;
use crate::config::{LoadError, load_config, to_options};
use crate::demo::{self, DemoStats};

/// Frames before the demo chain's root expires.
const CHAIN_TTL: u32 = 20;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("demo setup failed: {0}")]
    Setup(#[from] EcError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub runtime: String,
    pub frames: FrameStats,
    pub spawned: usize,
    pub removed: usize,
    pub detached: usize,
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "runtime:        {}", self.runtime)?;
        writeln!(f, "frames:         {}", self.frames.frames)?;
        writeln!(f, "fps:            {:.2}", self.frames.fps)?;
        writeln!(f, "run elapsed:    {:?}", self.frames.run_elapsed)?;
        writeln!(f, "last update:    {:?}", self.frames.update_elapsed)?;
        writeln!(f, "spawned:        {}", self.spawned)?;
        writeln!(f, "removed:        {}", self.removed)?;
        write!(f, "detached:       {}", self.detached)
    }
}

/// Runs the demo world to completion.
pub fn run(args: &SimArgs) -> Result<SimReport, SimError> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    let options = to_options(&args.apply(config))?;

    let service = ServiceContext::new(Arc::new(demo::registry()?));
    let runtime = service.create_runtime(options)?;
    let handle = runtime.handle();
    let name = runtime.name().to_string();

    let stats = Arc::new(DemoStats::default());
    let (walkers, depth, shared) = (args.entities, args.depth, stats.clone());
    // Queued before the thread starts, so it runs ahead of the first frame.
    let setup = handle.try_safe_call(move |ctx| demo::populate(ctx, walkers, depth, CHAIN_TTL, &shared))?;

    let stopped = runtime.run()?;
    let populated = setup
        .recv()
        .unwrap_or(Err(RuntimeError::Stopped))
        .map_err(SimError::from)
        .and_then(|ret| ret.map_err(SimError::from));
    if let Err(err) = populated {
        service.stop();
        service.wait();
        return Err(err);
    }

    // Progress goes to the log while the frame loop runs.
    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(Duration::from_secs(1)) {
        let frames = handle.stats();
        log::info!("[{}] frame {} at {:.1} fps", name, frames.frames, frames.fps);
    }
    service.stop();
    service.wait();

    Ok(SimReport {
        runtime: name,
        frames: handle.stats(),
        spawned: stats.spawned(),
        removed: stats.removed(),
        detached: stats.detached(),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn blink_run_reports_churn() {
        let args = SimArgs::parse_from([
            "strand-sim",
            "--fps",
            "30",
            "--frames",
            "40",
            "--blink",
            "--entities",
            "5",
            "--depth",
            "3",
        ]);
        let report = run(&args).unwrap();
        assert_eq!(report.frames.frames, 40);
        assert_eq!(report.spawned, 8);
        // The chain expires at frame 20; walkers at the latest by shutdown.
        assert_eq!(report.removed, 8);
        assert_eq!(report.detached, 2);
        assert!(report.to_string().contains("frames:         40"));
    }

    #[test]
    fn invalid_fps_is_rejected() {
        let args = SimArgs::parse_from(["strand-sim", "--fps", "0"]);
        assert!(matches!(
            run(&args),
            Err(SimError::Load(LoadError::Invalid(ConfigError::InvalidTargetFps(_))))
        ));
    }
}
