use crate::{
    executors::ExecutorError,
    experiment::{apply_duplicate_policy, DuplicatePolicy, ExperimentSpec, SpecError},
};
use itertools::{iproduct, Itertools};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}: {source}")]
    Read { path: PathBuf, source: Error },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Executor not supported: {0}")]
    UnsupportedExecutor(String),
    #[error("Executor failed to load: {0}")]
    FailedLoadExecutor(#[from] ExecutorError),
    #[error("Invalid experiment: {0}")]
    InvalidExperiment(#[from] SpecError),
    #[error("Config failed the preflight checks")]
    PreflightFailed,
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // how and how many jobs run at the same time
    #[serde(default)]
    pub executor: ExecutorConfig,
    // build command run in every group directory before anything is scheduled
    #[serde(default)]
    pub build: BuildConfig,
    // where run directories are created
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    // explicitly listed simulator invocations
    #[serde(default)]
    pub experiments: Vec<ExperimentConfig>,
    // cartesian sweeps, expanded after `experiments`
    #[serde(default)]
    pub matrix: Vec<MatrixConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection process
    #[serde(default = "default_executor")]
    pub name: String,
    // size of the worker pool, defaults to the number of CPUs
    pub threads: Option<usize>,
    // per job limit in seconds
    pub timeout: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
    pub tag: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub group: String,
    pub benchmark: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    pub groups: Vec<String>,
    pub benchmarks: Vec<String>,
    // every entry is one set of extra arguments, an empty list runs without extra arguments
    #[serde(default = "default_arg_sets")]
    pub args: Vec<Vec<String>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor(),
            threads: None,
            timeout: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_build_command(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            tag: None,
        }
    }
}

impl ExecutorConfig {
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fold command line options into the config, unset options keep the file's values
    pub fn apply_overrides(
        &mut self,
        threads: Option<usize>,
        tag: Option<String>,
        skip_build: bool,
    ) {
        if threads.is_some() {
            self.executor.threads = threads;
        }
        if tag.is_some() {
            self.output.tag = tag;
        }
        if skip_build {
            self.build.enabled = false;
        }
    }

    /// All experiments of the batch in declaration order, with the duplicate policy applied
    pub fn experiments(&self) -> Result<Vec<ExperimentSpec>, ConfigErrors> {
        let explicit = self.experiments.iter().map(|experiment| {
            ExperimentSpec::new(
                experiment.group.as_str(),
                experiment.benchmark.as_str(),
                experiment.args.iter().cloned(),
            )
        });
        let swept = self.matrix.iter().flat_map(|matrix| {
            iproduct!(
                matrix.groups.iter(),
                matrix.benchmarks.iter(),
                matrix.args.iter()
            )
            .map(|(group, benchmark, args)| {
                ExperimentSpec::new(group.as_str(), benchmark.as_str(), args.iter().cloned())
            })
        });

        let specs = explicit.chain(swept).collect::<Result<Vec<_>, _>>()?;
        debug!("Expanded config into {} experiments", specs.len());

        Ok(apply_duplicate_policy(specs, self.duplicates)?)
    }

    /// Report every problem of the config at once instead of piece-by-piece to make debugging
    /// easier for users. Returns whether an error was found.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.experiments.is_empty() && self.matrix.is_empty() {
            error!("Neither experiments nor matrix were defined, unable to build a batch of jobs");
            contains_error = true;
        }

        if self.executor.name != "local" {
            error!(
                "executor.name ({}) is not supported, please use `local` for now",
                self.executor.name
            );
            contains_error = true;
        }

        if self.executor.threads == Some(0) {
            error!("executor.threads cannot be 0, leave it out to use all CPUs");
            contains_error = true;
        }

        if self.executor.timeout == Some(0) {
            error!("executor.timeout cannot be 0, leave it out to disable timeouts");
            contains_error = true;
        }

        if self.build.enabled && self.build.command.is_empty() {
            error!("build.command cannot be empty while the build is enabled");
            contains_error = true;
        }

        for (index, experiment) in self.experiments.iter().enumerate() {
            if experiment.group.trim().is_empty() || experiment.benchmark.trim().is_empty() {
                error!("experiments[{index}] needs both a group and a benchmark");
                contains_error = true;
            }
        }

        for (index, matrix) in self.matrix.iter().enumerate() {
            if matrix.groups.is_empty() || matrix.benchmarks.is_empty() || matrix.args.is_empty()
            {
                warn!("matrix[{index}] is empty along one axis and won't produce any experiment");
            }
            if matrix
                .groups
                .iter()
                .chain(matrix.benchmarks.iter())
                .any(|name| name.trim().is_empty())
            {
                error!("matrix[{index}] contains an empty group or benchmark name");
                contains_error = true;
            }
        }

        let args = self
            .experiments
            .iter()
            .flat_map(|experiment| experiment.args.iter())
            .chain(
                self.matrix
                    .iter()
                    .flat_map(|matrix| matrix.args.iter().flatten()),
            );
        for arg in args.filter(|arg| arg.contains(char::is_whitespace)).unique() {
            warn!("Argument '{arg}' contains whitespace, it is passed to the simulator as a single argument");
        }

        if !self.build.enabled {
            self.check_prebuilt();
        }

        contains_error
    }

    /// without a build step the simulators have to exist already, only warn since the jobs
    /// of a missing simulator fail on their own
    fn check_prebuilt(&self) {
        let groups = self
            .experiments
            .iter()
            .map(|experiment| &experiment.group)
            .chain(self.matrix.iter().flat_map(|matrix| matrix.groups.iter()))
            .unique();

        for group in groups {
            let exec = Path::new(group).join(group);

            match check_executable(&exec) {
                Ok(true) => {}
                Ok(false) => warn!("Simulator {} is not executable", exec.display()),
                Err(e) => warn!("Simulator {} can't be used: {e}", exec.display()),
            }
        }
    }
}

fn default_executor() -> String {
    String::from("local")
}

fn default_true() -> bool {
    true
}

fn default_build_command() -> Vec<String> {
    vec![String::from("go"), String::from("build")]
}

fn default_output_root() -> PathBuf {
    PathBuf::from("results")
}

fn default_arg_sets() -> Vec<Vec<String>> {
    vec![Vec::new()]
}
