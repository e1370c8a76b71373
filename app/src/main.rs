use std::process::ExitCode;

use clap::Parser;
use strand_app::{SimArgs, VERSION, run};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = SimArgs::parse();
    log::info!("strand-sim {}", VERSION);
    match run(&args) {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
