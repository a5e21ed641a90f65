use crate::{
    job::{format_elapsed, JobOutcome, JobResult},
    output::RunDirectory,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, warn};

pub const SUMMARY_FILE: &str = "summary.yaml";

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Failed to create summary file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Machine readable record of a whole run, stored next to the job artifacts
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub created_at: DateTime<Local>,
    pub threads: usize,
    pub peak_running: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub group: String,
    pub benchmark: String,
    pub args: Vec<String>,
    pub outcome: JobOutcome,
    pub exit_code: Option<i32>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub elapsed_secs: f64,
    pub log_file: PathBuf,
    pub metric_file: PathBuf,
}

impl From<&JobResult> for JobRecord {
    fn from(result: &JobResult) -> Self {
        Self {
            group: result.spec.group().to_string(),
            benchmark: result.spec.benchmark().to_string(),
            args: result.spec.args().to_vec(),
            outcome: result.outcome.clone(),
            exit_code: result.exit_code(),
            start_time: result.start_time,
            end_time: result.end_time,
            elapsed_secs: result.elapsed.as_secs_f64(),
            log_file: result.log_file.clone(),
            metric_file: result.metric_file.clone(),
        }
    }
}

impl RunSummary {
    pub fn new(
        run_directory: &RunDirectory,
        threads: usize,
        peak_running: usize,
        results: &[JobResult],
    ) -> Self {
        let succeeded = results.iter().filter(|result| result.succeeded()).count();

        Self {
            run_dir: run_directory.path.clone(),
            created_at: run_directory.created_at,
            threads,
            peak_running,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            jobs: results.iter().map(JobRecord::from).collect(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// write `summary.yaml` into `dir`
    pub fn write(&self, dir: &Path) -> Result<PathBuf, SummaryError> {
        let path = dir.join(SUMMARY_FILE);
        let writer = BufWriter::new(File::create(&path)?);
        serde_yaml::to_writer(writer, self)?;

        Ok(path)
    }

    /// aggregate report for the operator
    pub fn log(&self) {
        for job in self.jobs.iter().filter(|job| job.outcome != JobOutcome::Succeeded) {
            warn!(
                group = %job.group,
                benchmark = %job.benchmark,
                args = ?job.args,
                "{}",
                job.outcome
            );
        }

        let elapsed = self
            .jobs
            .iter()
            .map(|job| job.end_time)
            .max()
            .and_then(|end| (end - self.created_at).to_std().ok())
            .map(format_elapsed)
            .unwrap_or_default();

        if self.all_succeeded() {
            info!(
                "All {} jobs succeeded after {elapsed}, results in {}",
                self.total,
                self.run_dir.display()
            );
        } else {
            error!(
                "{} of {} jobs did not succeed, results in {}",
                self.failed,
                self.total,
                self.run_dir.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{experiment::ExperimentSpec, job::JobResult};
    use std::time::Duration;
    use tempfile::TempDir;

    fn result(benchmark: &str, outcome: JobOutcome) -> JobResult {
        let start_time = Local::now();

        JobResult {
            spec: ExperimentSpec::new("model1", benchmark, ["-num-memory-banks=4"]).unwrap(),
            outcome,
            start_time,
            end_time: start_time + chrono::Duration::milliseconds(1500),
            elapsed: Duration::from_millis(1500),
            log_file: PathBuf::from(format!("{benchmark}_out.stdout")),
            metric_file: PathBuf::from(format!("{benchmark}_metrics")),
        }
    }

    #[test]
    fn counts_and_writes_outcomes() {
        let scratch = TempDir::new().unwrap();
        let run_directory = RunDirectory {
            path: scratch.path().to_path_buf(),
            created_at: Local::now(),
        };
        let results = [
            result("fir", JobOutcome::Succeeded),
            result("aes", JobOutcome::FailedExit(1)),
            result("nbody", JobOutcome::Skipped("build failed for group model1".into())),
        ];

        let summary = RunSummary::new(&run_directory, 4, 2, &results);
        assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 1, 2));
        assert!(!summary.all_succeeded());
        summary.log();

        let path = summary.write(scratch.path()).unwrap();
        let written: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(written["threads"].as_u64(), Some(4));
        assert_eq!(written["jobs"][0]["outcome"]["state"].as_str(), Some("succeeded"));
        assert_eq!(written["jobs"][1]["outcome"]["state"].as_str(), Some("failed_exit"));
        assert_eq!(written["jobs"][1]["exit_code"].as_i64(), Some(1));
        assert_eq!(written["jobs"][2]["exit_code"], serde_yaml::Value::Null);
        assert_eq!(written["jobs"][0]["elapsed_secs"].as_f64(), Some(1.5));
        assert_eq!(
            written["jobs"][0]["args"][0].as_str(),
            Some("-num-memory-banks=4")
        );
    }
}
