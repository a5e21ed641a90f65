use super::{BatchReport, Executor, ExecutorError};
use crate::{
    cancel::CancelToken,
    command::SimulatorCommand,
    config::ExecutorConfig,
    job::{format_elapsed, run_job, JobOptions, JobOutcome, JobResult},
};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Executor that works on a local thread pool, every worker runs one simulator at a time
#[derive(Debug)]
pub struct LocalExecutor {
    pool: ThreadPool,
    threads: usize,
    cwd: PathBuf,
    options: JobOptions,
}

impl LocalExecutor {
    /// change how often running jobs are polled and how long they get between SIGTERM and
    /// SIGKILL, the timeout and the cancel token given to `load` stay in place
    pub fn with_intervals(mut self, poll_interval: Duration, grace_period: Duration) -> Self {
        self.options.poll_interval = poll_interval;
        self.options.grace_period = grace_period;
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }
}

impl Executor for LocalExecutor {
    /// create a new LocalExecutor instance
    fn load(
        config: &ExecutorConfig,
        cwd: PathBuf,
        cancel: CancelToken,
    ) -> Result<Self, ExecutorError> {
        let threads = config.threads();

        debug!("Starting thread pool with {threads} threads");

        // NOTE: a dedicated pool instead of the global one, the global pool can only be set up once
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("simsweep-worker-{index}"))
            .build()?;

        Ok(Self {
            pool,
            threads,
            cwd,
            options: JobOptions {
                timeout: config.timeout(),
                cancel,
                ..JobOptions::default()
            },
        })
    }

    /// execute jobs concurrently with a thread pool
    #[instrument(skip_all, level = "info", fields(threads = self.threads))]
    fn execute(&mut self, commands: Vec<SimulatorCommand>) -> Result<BatchReport, ExecutorError> {
        let total = commands.len();

        // general counters to provide progress and the peak concurrency
        let processed = AtomicUsize::new(0);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let cwd = &self.cwd;
        let options = &self.options;

        info!("Scheduling {total} jobs on {} workers", self.threads);

        let results = self.pool.install(|| {
            commands
                .par_iter()
                // one job per task, simulations are long and uneven
                .with_max_len(1)
                .map(|command| {
                    let result = if options.cancel.is_cancelled() {
                        JobResult::not_started(command, JobOutcome::Cancelled)
                    } else {
                        let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now_running, Ordering::SeqCst);

                        debug!("Executing {command}");
                        let result = run_job(command, cwd, options);

                        running.fetch_sub(1, Ordering::SeqCst);
                        result
                    };

                    log_result(&result);
                    info!(
                        "Done with {}/{}",
                        processed.fetch_add(1, Ordering::SeqCst) + 1,
                        total
                    );

                    result
                })
                .collect::<Vec<_>>()
        });

        info!("Done with processing");

        Ok(BatchReport {
            results,
            peak_running: peak.into_inner(),
        })
    }
}

fn log_result(result: &JobResult) {
    let elapsed = format_elapsed(result.elapsed);

    match result.outcome {
        JobOutcome::Succeeded => {
            info!(experiment = %result.spec, elapsed = %elapsed, "Executed")
        }
        JobOutcome::Cancelled => {
            debug!(experiment = %result.spec, elapsed = %elapsed, "Cancelled")
        }
        ref outcome => warn!(
            experiment = %result.spec,
            exit_code = ?outcome.exit_code(),
            elapsed = %elapsed,
            log = ?result.log_file,
            "Error executing: {outcome}"
        ),
    }
}
