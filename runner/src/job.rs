use crate::{cancel::CancelToken, command::SimulatorCommand, experiment::ExperimentSpec};
use chrono::{DateTime, Local};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use serde::Serialize;
use std::{
    fmt,
    fs::File,
    io::{self, Write},
    os::unix::process::{CommandExt, ExitStatusExt},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to prepare log file {path:?}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("Failed to spawn {exec:?}: {source}")]
    Spawn { exec: PathBuf, source: io::Error },
    #[error("Failed to wait for the simulator: {0}")]
    Wait(#[from] io::Error),
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    FailedExit(i32),
    /// terminated by a signal the harness did not send
    Signaled(i32),
    FailedToStart(String),
    TimedOut,
    Cancelled,
    /// never attempted, e.g., because the group failed to build
    Skipped(String),
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Succeeded => Some(0),
            Self::FailedExit(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<ExitStatus> for JobOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => Self::Succeeded,
            (Some(code), _) => Self::FailedExit(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::FailedExit(-1),
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedExit(code) => write!(f, "failed with exit code {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            Self::FailedToStart(reason) => write!(f, "failed to start: {reason}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub spec: ExperimentSpec,
    pub outcome: JobOutcome,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    /// always `end_time - start_time`, measured on a monotonic clock
    pub elapsed: Duration,
    pub log_file: PathBuf,
    pub metric_file: PathBuf,
}

impl JobResult {
    /// result for a job that never reached the point of spawning a process
    pub fn not_started(command: &SimulatorCommand, outcome: JobOutcome) -> Self {
        let now = Local::now();

        Self {
            spec: command.spec.clone(),
            outcome,
            start_time: now,
            end_time: now,
            elapsed: Duration::ZERO,
            log_file: command.names.log_file.clone(),
            metric_file: command.names.metric_file.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.exit_code()
    }
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    /// per job limit, unlimited if unset
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
    /// how often a running job checks for cancellation and its timeout
    pub poll_interval: Duration,
    /// time between SIGTERM and SIGKILL when a job gets terminated
    pub grace_period: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: CancelToken::new(),
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Run a single simulator invocation to completion.
///
/// Standard output and standard error of the simulator are merged into the job's log file,
/// framed by the executed command, the start time, the end time and the elapsed time.
/// Nothing in here panics or returns an error: every problem ends up in the outcome.
pub fn run_job(command: &SimulatorCommand, cwd: &Path, options: &JobOptions) -> JobResult {
    let log_path = &command.names.log_file;

    let mut log = match open_log(command) {
        Ok(log) => log,
        Err(error) => {
            warn!(experiment = %command.spec, error = %error, "Job failed to start");

            return JobResult::not_started(command, JobOutcome::FailedToStart(error.to_string()));
        }
    };

    let start_time = Local::now();
    let started = Instant::now();

    let outcome = match write_start(&mut log, log_path, &start_time)
        .and_then(|_| spawn(command, cwd, &log))
    {
        Ok(mut child) => match wait(&mut child, options) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(experiment = %command.spec, error = %error, "Lost track of simulator");
                // the child might still be around, make sure it does not outlive the job
                terminate(&mut child, Duration::ZERO);

                JobOutcome::FailedExit(-1)
            }
        },
        Err(error) => {
            warn!(experiment = %command.spec, error = %error, "Job failed to start");
            // best effort, the log might be the reason we failed
            let _ = writeln!(log, "Failed to start: {error}");

            JobOutcome::FailedToStart(error.to_string())
        }
    };

    let elapsed = started.elapsed();
    let end_time =
        start_time + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());

    if let Err(error) = write!(
        log,
        "End time: {end_time}\nElapsed time: {}\n",
        format_elapsed(elapsed)
    )
    .and_then(|_| log.flush())
    {
        warn!(path = ?log_path, error = %error, "Failed to finish log file");
    }

    JobResult {
        spec: command.spec.clone(),
        outcome,
        start_time,
        end_time,
        elapsed,
        log_file: log_path.clone(),
        metric_file: command.names.metric_file.clone(),
    }
}

/// `1.234s` style rendering used in logs and log files
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3?}", elapsed)
}

fn open_log(command: &SimulatorCommand) -> Result<File, JobError> {
    let path = &command.names.log_file;
    let mut log = File::create(path).map_err(|source| JobError::LogFile {
        path: path.clone(),
        source,
    })?;

    writeln!(log, "Executing {}", command.render()).map_err(|source| JobError::LogFile {
        path: path.clone(),
        source,
    })?;

    Ok(log)
}

fn write_start(log: &mut File, path: &Path, start_time: &DateTime<Local>) -> Result<(), JobError> {
    // flush so the header is on disk while a long simulation runs
    writeln!(log, "Start time: {start_time}")
        .and_then(|_| log.flush())
        .map_err(|source| JobError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn spawn(command: &SimulatorCommand, cwd: &Path, log: &File) -> Result<Child, JobError> {
    let log_error = |source| JobError::LogFile {
        path: command.names.log_file.clone(),
        source,
    };
    let stdout = log.try_clone().map_err(log_error)?;
    let stderr = log.try_clone().map_err(log_error)?;

    let child = Command::new(&command.exec)
        .args(command.args.iter())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        // own process group, so terminating a job also reaches anything the simulator spawned
        .process_group(0)
        .spawn()
        .map_err(|source| JobError::Spawn {
            exec: command.exec.clone(),
            source,
        })?;

    debug!(pid = child.id(), experiment = %command.spec, "Spawned simulator");

    Ok(child)
}

fn wait(child: &mut Child, options: &JobOptions) -> Result<JobOutcome, JobError> {
    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);

    loop {
        if let Some(status) = child.wait_timeout(options.poll_interval)? {
            return Ok(status.into());
        }

        if options.cancel.is_cancelled() {
            terminate(child, options.grace_period);

            return Ok(JobOutcome::Cancelled);
        }

        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            debug!(pid = child.id(), "Simulator ran into timeout");
            terminate(child, options.grace_period);

            return Ok(JobOutcome::TimedOut);
        }
    }
}

/// SIGTERM the process group of `child`, SIGKILL it after `grace_period` and reap it
fn terminate(child: &mut Child, grace_period: Duration) {
    let group = Pid::from_raw(child.id() as i32);

    if let Err(errno) = killpg(group, Signal::SIGTERM) {
        debug!(pid = child.id(), errno = %errno, "Failed to send SIGTERM");
    }

    match child.wait_timeout(grace_period) {
        Ok(Some(_)) => return,
        Ok(None) => debug!(pid = child.id(), "Simulator ignored SIGTERM, killing it"),
        Err(error) => debug!(pid = child.id(), error = %error, "Failed to wait for SIGTERM"),
    }

    if killpg(group, Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
    if let Err(error) = child.wait() {
        warn!(pid = child.id(), error = %error, "Failed to reap terminated simulator");
    }
}
