//! # Strand App
//!
//! Pieces of the `strand-sim` launcher, kept in a library so they can be
//! tested and reused:
//!
//! - [`SimArgs`] - command line arguments (clap)
//! - [`load_config`] - TOML runtime settings, missing file means defaults
//! - [`demo`] - demo components, prototypes and world setup
//! - [`run`] - one complete simulation run and its [`SimReport`]

mod args;
mod config;
pub mod demo;
mod sim;

pub use args::{DEFAULT_FRAMES, SimArgs};
pub use config::{LoadError, load_config, to_options};
pub use sim::{SimError, SimReport, run};

/// Launcher version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
