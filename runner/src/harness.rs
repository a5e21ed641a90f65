use crate::{
    build::{BuildReport, BuildStep},
    cancel::CancelToken,
    command::SimulatorCommand,
    config::{ConfigErrors, SweepConfig},
    executors::{ExecutorError, Executors},
    experiment::groups_in_order,
    job::{JobOutcome, JobResult},
    output::{OutputDirectory, OutputError, RunContext},
    summary::RunSummary,
};
use chrono::{DateTime, Local};
use itertools::Itertools;
use std::{io, path::PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Failed to determine the working directory: {0}")]
    WorkingDirectory(io::Error),
}

/// Ties the components together: build, create the run directory, run every job, summarize
#[derive(Debug)]
pub struct Harness {
    config: SweepConfig,
    cwd: PathBuf,
    cancel: CancelToken,
}

impl Harness {
    pub fn new(config: SweepConfig, cwd: PathBuf, cancel: CancelToken) -> Self {
        Self {
            config,
            cwd,
            cancel,
        }
    }

    fn output_directory(&self) -> OutputDirectory {
        // absolute paths replace the working directory on join
        OutputDirectory::new(self.cwd.join(&self.config.output.root))
    }

    /// Commands a run started at `timestamp` would execute, nothing is touched on disk
    pub fn plan(
        &self,
        timestamp: DateTime<Local>,
    ) -> Result<Vec<SimulatorCommand>, ConfigErrors> {
        let context = RunContext {
            cwd: self.cwd.clone(),
            run_dir: self
                .output_directory()
                .run_path(&timestamp, self.config.output.tag.as_deref()),
        };

        Ok(self
            .config
            .experiments()?
            .iter()
            .map(|spec| SimulatorCommand::build(spec, &context))
            .collect())
    }

    #[instrument(skip_all, level = "info")]
    pub fn run(&self) -> Result<RunSummary, HarnessError> {
        let specs = self.config.experiments()?;

        let builds = self.build(&groups_in_order(&specs));

        // the run directory has to exist before the first job opens its log file
        let run_directory = self
            .output_directory()
            .ensure(Local::now(), self.config.output.tag.as_deref())?;
        let context = RunContext::new(self.cwd.clone(), &run_directory);

        let (runnable, skipped): (Vec<_>, Vec<_>) = specs
            .iter()
            .map(|spec| SimulatorCommand::build(spec, &context))
            .partition(|command| !builds.is_failed(command.spec.group()));

        let skipped = skipped
            .iter()
            .map(|command| {
                JobResult::not_started(
                    command,
                    JobOutcome::Skipped(format!(
                        "build failed for group {}",
                        command.spec.group()
                    )),
                )
            })
            .collect_vec();
        if !skipped.is_empty() {
            warn!("Skipping {} jobs of groups that failed to build", skipped.len());
        }

        let mut executor =
            Executors::load(&self.config.executor, self.cwd.clone(), self.cancel.clone())?;
        let report = executor.execute(runnable)?;

        let results = report.results.into_iter().chain(skipped).collect_vec();
        let summary = RunSummary::new(
            &run_directory,
            self.config.executor.threads(),
            report.peak_running,
            &results,
        );

        match summary.write(&run_directory.path) {
            Ok(path) => info!("Wrote summary to {}", path.display()),
            Err(error) => warn!(error = %error, "Failed to write run summary"),
        }
        summary.log();

        Ok(summary)
    }

    fn build(&self, groups: &[&str]) -> BuildReport {
        if !self.config.build.enabled {
            info!("Build step is disabled, using the existing simulators");

            return BuildReport {
                built: groups.iter().map(ToString::to_string).collect(),
                failed: Vec::new(),
            };
        }

        match BuildStep::new(&self.config.build.command) {
            Some(step) => step.run(groups, &self.cwd, &self.cancel),
            None => BuildReport {
                built: Vec::new(),
                failed: groups.iter().map(ToString::to_string).collect(),
            },
        }
    }
}
