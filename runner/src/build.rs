use crate::cancel::CancelToken;
use std::{
    io,
    path::Path,
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to spawn build command: {0}")]
    Spawn(#[from] io::Error),
    #[error("Build command exited with {0}")]
    Failed(ExitStatus),
    #[error("Build was cancelled")]
    Cancelled,
}

/// Which groups could be built. Jobs of failed groups must not be run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub failed: Vec<String>,
}

impl BuildReport {
    pub fn is_failed(&self, group: &str) -> bool {
        self.failed.iter().any(|failed| failed == group)
    }
}

/// Builds the simulator of every group with an external command, one group after another.
/// Builds are never run concurrently since they share the toolchain's caches.
#[derive(Debug, Clone)]
pub struct BuildStep {
    program: String,
    args: Vec<String>,
}

impl BuildStep {
    /// `None` if `command` is empty
    pub fn new(command: &[String]) -> Option<Self> {
        command.split_first().map(|(program, args)| Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// build all `groups` in the given order inside `<cwd>/<group>`
    #[instrument(skip_all, level = "info")]
    pub fn run(&self, groups: &[&str], cwd: &Path, cancel: &CancelToken) -> BuildReport {
        let mut report = BuildReport::default();

        for (index, &group) in groups.iter().enumerate() {
            info!("Building {group} ({}/{})", index + 1, groups.len());

            let result = if cancel.is_cancelled() {
                Err(BuildError::Cancelled)
            } else {
                self.build_group(group, cwd)
            };

            match result {
                Ok(()) => report.built.push(group.to_string()),
                Err(error) => {
                    error!(group = group, "Failed to build, its jobs will be skipped: {error}");
                    report.failed.push(group.to_string());
                }
            }
        }

        report
    }

    fn build_group(&self, group: &str, cwd: &Path) -> Result<(), BuildError> {
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(self.args.iter())
            .current_dir(cwd.join(group))
            .stdin(Stdio::null())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            debug!(
                group = group,
                stdout = %stdout.trim(),
                stderr = %stderr.trim(),
                "Built in {:?}",
                start.elapsed()
            );

            Ok(())
        } else {
            warn!(group = group, stderr = %stderr.trim(), "Build output");

            Err(BuildError::Failed(output.status))
        }
    }
}
