mod local;

pub use local::LocalExecutor;

use crate::{
    cancel::CancelToken,
    command::SimulatorCommand,
    config::{ConfigErrors, ExecutorConfig},
    job::JobResult,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Results of one batch, one entry per submitted job in no particular order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
    /// highest number of simulators that were running at the same time
    pub peak_running: usize,
}

pub trait Executor: Sized {
    fn load(
        config: &ExecutorConfig,
        cwd: PathBuf,
        cancel: CancelToken,
    ) -> Result<Self, ExecutorError>;

    /// Run every command exactly once and return when all of them reached a terminal state
    fn execute(&mut self, commands: Vec<SimulatorCommand>) -> Result<BatchReport, ExecutorError>;
}

#[derive(Debug)]
pub enum Executors {
    Local(LocalExecutor),
}

impl Executors {
    pub fn load(
        config: &ExecutorConfig,
        cwd: PathBuf,
        cancel: CancelToken,
    ) -> Result<Self, ConfigErrors> {
        match config.name.as_str() {
            "local" => Ok(Self::Local(LocalExecutor::load(config, cwd, cancel)?)),
            _ => Err(ConfigErrors::UnsupportedExecutor(config.name.clone())),
        }
    }

    pub fn execute(
        &mut self,
        commands: Vec<SimulatorCommand>,
    ) -> Result<BatchReport, ExecutorError> {
        match self {
            Self::Local(executor) => executor.execute(commands),
        }
    }
}
