use chrono::Local;
use clap::Parser;
use simsweep_runner::{
    cancel::CancelToken,
    config::{ConfigErrors, SweepConfig},
    harness::{Harness, HarnessError},
    logging::init_logging,
};
use std::{env, path::PathBuf, process::ExitCode};
use tracing::{error, warn};

/// Run sweeps of simulator experiments in parallel
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// sweep definition
    #[arg(short, long, default_value = "sweep.yaml")]
    config: PathBuf,

    /// number of simulators running at the same time, overrides executor.threads
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// suffix for the run directory, overrides output.tag
    #[arg(short, long)]
    tag: Option<String>,

    /// use the existing simulator binaries instead of building them
    #[arg(long)]
    skip_build: bool,

    /// only print the commands that would be executed
    #[arg(long)]
    dry_run: bool,

    /// log filter, e.g., `debug` or `simsweep_runner=trace`
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = init_logging(cli.log_level.as_deref()) {
        eprintln!("{error}");

        return ExitCode::from(2);
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            error!("{error}");

            ExitCode::from(2)
        }
    }
}

/// returns whether every job succeeded
fn run(cli: Cli) -> Result<bool, HarnessError> {
    let mut config = SweepConfig::load(&cli.config)?;
    config.apply_overrides(cli.threads, cli.tag, cli.skip_build);

    if config.preflight_checks() {
        return Err(ConfigErrors::PreflightFailed.into());
    }

    let cwd = env::current_dir().map_err(HarnessError::WorkingDirectory)?;
    let cancel = CancelToken::new();
    let harness = Harness::new(config, cwd, cancel.clone());

    if cli.dry_run {
        for command in harness.plan(Local::now())? {
            println!("{command}");
        }

        return Ok(true);
    }

    if let Err(error) = cancel.install_signal_handler() {
        warn!("Failed to install signal handler, interrupting will orphan running jobs: {error}");
    }

    Ok(harness.run()?.all_succeeded())
}
