//! Serde model of the runtime section of a config file.
//!
//! ```toml
//! [runtime]
//! name = "world"
//! process_queue_capacity = 256
//! process_queue_timeout_ms = 2000
//! gc_interval_ms = 5000
//! auto_recover = true
//!
//! [frame]
//! target_fps = 60.0
//! total_frames = 600
//! blink = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::options::{FrameOptions, RuntimeOptions};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub runtime: RuntimeSection,
    /// Absent for a runtime without a frame loop.
    pub frame: Option<FrameSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub name: String,
    pub process_queue_capacity: usize,
    pub process_queue_timeout_ms: u64,
    pub gc_interval_ms: u64,
    pub auto_recover: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        let defaults = RuntimeOptions::default();
        Self {
            name: defaults.name,
            process_queue_capacity: defaults.process_queue_capacity,
            process_queue_timeout_ms: defaults.process_queue_timeout.as_millis() as u64,
            gc_interval_ms: defaults.gc_interval.as_millis() as u64,
            auto_recover: defaults.auto_recover,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSection {
    pub target_fps: f64,
    pub total_frames: u64,
    pub blink: bool,
}

impl Default for FrameSection {
    fn default() -> Self {
        let defaults = FrameOptions::default();
        Self {
            target_fps: defaults.target_fps,
            total_frames: defaults.total_frames,
            blink: defaults.blink,
        }
    }
}

impl RuntimeConfig {
    /// Converts into validated [`RuntimeOptions`].
    pub fn validate(&self) -> Result<RuntimeOptions, ConfigError> {
        let section = &self.runtime;
        let options = RuntimeOptions {
            name: section.name.clone(),
            process_queue_capacity: section.process_queue_capacity,
            process_queue_timeout: Duration::from_millis(section.process_queue_timeout_ms),
            gc_interval: Duration::from_millis(section.gc_interval_ms),
            auto_recover: section.auto_recover,
            report_error: None,
            frame: self.frame.as_ref().map(|frame| FrameOptions {
                target_fps: frame.target_fps,
                total_frames: frame.total_frames,
                blink: frame.blink,
            }),
        };
        options.validate()?;
        Ok(options)
    }
}
