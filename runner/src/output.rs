use chrono::{DateTime, Local};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// format of the timestamp a run directory is named after
pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create run directory {path:?}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },
    #[error("Run directory {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),
}

/// Directory holding every artifact of one harness invocation. It is never removed by the
/// harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
}

/// Everything a job needs to know about where it runs and where it writes to.
/// Passed explicitly to all components instead of living in global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// working directory of the harness, group directories are resolved against it
    pub cwd: PathBuf,
    /// run directory all job artifacts are placed in
    pub run_dir: PathBuf,
}

impl RunContext {
    pub fn new(cwd: impl Into<PathBuf>, run_directory: &RunDirectory) -> Self {
        Self {
            cwd: cwd.into(),
            run_dir: run_directory.path.clone(),
        }
    }
}

/// Manages the results root, one timestamped sub directory per run
#[derive(Debug, Clone)]
pub struct OutputDirectory {
    root: PathBuf,
}

impl OutputDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// path of the run directory for the given timestamp, without touching the file system
    pub fn run_path(&self, timestamp: &DateTime<Local>, tag: Option<&str>) -> PathBuf {
        self.root.join(run_name(timestamp, tag))
    }

    /// Create (if neccessary) the run directory for `timestamp`.
    /// Calling this repeatedly with the same input yields the same directory.
    pub fn ensure(
        &self,
        timestamp: DateTime<Local>,
        tag: Option<&str>,
    ) -> Result<RunDirectory, OutputError> {
        let path = self.run_path(&timestamp, tag);

        if path.exists() && !path.is_dir() {
            return Err(OutputError::NotADirectory(path));
        }

        // create_dir_all is a no-op for existing directories
        fs::create_dir_all(&path).map_err(|source| OutputError::CreateDirectory {
            path: path.clone(),
            source,
        })?;

        debug!(path = ?path, "Run directory is ready");
        info!("Writing results to {}", path.display());

        Ok(RunDirectory {
            path,
            created_at: timestamp,
        })
    }
}

fn run_name(timestamp: &DateTime<Local>, tag: Option<&str>) -> String {
    let stamp = timestamp.format(RUN_DIR_FORMAT).to_string();

    match tag.map(str::trim).filter(|tag| !tag.is_empty()) {
        Some(tag) => format!("{stamp}_{}", tag.replace(['/', '\\'], "-")),
        None => stamp,
    }
}
