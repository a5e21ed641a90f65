use crate::{experiment::ExperimentSpec, output::RunContext};
use itertools::Itertools;
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// flags passed to every simulator run, after `-benchmark` and before `-metric-file-name`
pub const SIMULATOR_FLAGS: [&str; 3] = ["-timing", "-magic-memory-copy", "-report-all"];

const METRIC_SUFFIX: &str = "_metrics";
const LOG_SUFFIX: &str = "_out.stdout";
const ARG_SEPARATOR: char = '_';

/// Percent-encode path separators, `%` itself and `separator`. Artifacts stay inside the
/// run directory and the encoding can be reversed, so distinct values never collide.
fn escape(value: &str, separator: Option<char>) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        if matches!(c, '%' | '/' | '\\') || Some(c) == separator {
            escaped.push_str(&format!("%{:02X}", u32::from(c)));
        } else {
            escaped.push(c);
        }
    }

    escaped
}

/// Artifact paths derived from an experiment. Identical experiments derive identical names.
/// Distinct arg lists of the same group and benchmark get distinct names. The remaining
/// clashes (`a_b`/`c` against `a`/`b_c`, no args against one empty arg) are caught by the
/// duplicate policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedNames {
    pub metric_file: PathBuf,
    pub log_file: PathBuf,
}

impl DerivedNames {
    pub fn new(spec: &ExperimentSpec, run_dir: &Path) -> Self {
        let stem = format!(
            "{}_{}_{}",
            escape(spec.group(), None),
            escape(spec.benchmark(), None),
            spec.args()
                .iter()
                .map(|arg| escape(arg, Some(ARG_SEPARATOR)))
                .join(&ARG_SEPARATOR.to_string())
        );

        Self {
            metric_file: run_dir.join(format!("{stem}{METRIC_SUFFIX}")),
            log_file: run_dir.join(format!("{stem}{LOG_SUFFIX}")),
        }
    }
}

/// Fully resolved simulator invocation for one experiment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorCommand {
    pub spec: ExperimentSpec,
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub names: DerivedNames,
}

impl SimulatorCommand {
    /// Build the invocation for `spec`. The executable is expected at `<cwd>/<group>/<group>`,
    /// whether it exists is only found out once it is spawned.
    pub fn build(spec: &ExperimentSpec, context: &RunContext) -> Self {
        let names = DerivedNames::new(spec, &context.run_dir);
        let exec = context.cwd.join(spec.group()).join(spec.group());

        let mut args = Vec::with_capacity(SIMULATOR_FLAGS.len() + 2 + spec.args().len());
        args.push(format!("-benchmark={}", spec.benchmark()));
        args.extend(SIMULATOR_FLAGS.iter().map(ToString::to_string));
        args.push(format!(
            "-metric-file-name={}",
            names.metric_file.to_string_lossy()
        ));
        args.extend(spec.args().iter().cloned());

        Self {
            spec: spec.clone(),
            exec,
            args,
            names,
        }
    }

    /// single line, human readable rendering of the command (not meant for a shell)
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SimulatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.exec.display())?;

        for arg in self.args.iter() {
            write!(f, " {arg}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        RunContext {
            cwd: PathBuf::from("/work"),
            run_dir: PathBuf::from("/work/results/2024-01-01-00-00-00"),
        }
    }

    fn spec(args: &[&str]) -> ExperimentSpec {
        ExperimentSpec::new("16CUPerGPU_withoutCache", "nbody", args.iter().copied()).unwrap()
    }

    #[test]
    fn builds_simulator_invocation() {
        let command = SimulatorCommand::build(&spec(&[]), &context());

        assert_eq!(
            command.exec,
            PathBuf::from("/work/16CUPerGPU_withoutCache/16CUPerGPU_withoutCache")
        );
        assert_eq!(
            command.args,
            vec![
                "-benchmark=nbody",
                "-timing",
                "-magic-memory-copy",
                "-report-all",
                "-metric-file-name=/work/results/2024-01-01-00-00-00/16CUPerGPU_withoutCache_nbody__metrics",
            ]
        );
        assert_eq!(
            command.names.log_file,
            PathBuf::from(
                "/work/results/2024-01-01-00-00-00/16CUPerGPU_withoutCache_nbody__out.stdout"
            )
        );
    }

    #[test]
    fn build_is_deterministic() {
        let spec = spec(&["-num-memory-banks=16", "-bandwidth=96"]);

        assert_eq!(
            SimulatorCommand::build(&spec, &context()),
            SimulatorCommand::build(&spec, &context())
        );
    }

    #[test]
    fn extra_args_are_appended_once_in_order() {
        let command = SimulatorCommand::build(
            &spec(&["-num-memory-banks=16", "-bandwidth=96"]),
            &context(),
        );

        assert_eq!(
            &command.args[5..],
            ["-num-memory-banks=16", "-bandwidth=96"]
        );
        assert_eq!(
            command
                .args
                .iter()
                .filter(|arg| arg.as_str() == "-bandwidth=96")
                .count(),
            1
        );
        assert!(command.render().ends_with(" -num-memory-banks=16 -bandwidth=96"));
    }

    #[test]
    fn extra_args_produce_distinct_names() {
        let plain = SimulatorCommand::build(&spec(&[]), &context());
        let banks = SimulatorCommand::build(&spec(&["-num-memory-banks=4"]), &context());

        assert_ne!(plain.names.log_file, banks.names.log_file);
        assert_ne!(plain.names.metric_file, banks.names.metric_file);
        assert!(banks
            .names
            .metric_file
            .ends_with("16CUPerGPU_withoutCache_nbody_-num-memory-banks=4_metrics"));
    }

    #[test]
    fn separators_in_args_stay_in_the_run_directory() {
        let command = SimulatorCommand::build(&spec(&["-trace=../out/trace.db"]), &context());

        assert_eq!(
            command.names.log_file.parent(),
            Some(context().run_dir.as_path())
        );
        assert!(command
            .names
            .log_file
            .ends_with("16CUPerGPU_withoutCache_nbody_-trace=..%2Fout%2Ftrace.db_out.stdout"));
        assert_eq!(command.args.last().unwrap(), "-trace=../out/trace.db");
    }

    #[test]
    fn similar_args_never_share_artifacts() {
        let names = |args: &[&str]| SimulatorCommand::build(&spec(args), &context()).names;

        // a separator must not look like the character it would be replaced with
        assert_ne!(names(&["-trace=a/b"]), names(&["-trace=a-b"]));
        assert_ne!(names(&["-trace=a/b"]), names(&["-trace=a%2Fb"]));
        assert_ne!(names(&["-trace=a\\b"]), names(&["-trace=a/b"]));
        // nor may the join of two args look like a single one
        assert_ne!(names(&["-x", "y"]), names(&["-x_y"]));
        assert!(names(&["-x_y"])
            .metric_file
            .ends_with("16CUPerGPU_withoutCache_nbody_-x%5Fy_metrics"));
        assert!(names(&["-x", "y"])
            .metric_file
            .ends_with("16CUPerGPU_withoutCache_nbody_-x_y_metrics"));
    }

    #[test]
    fn renders_a_single_line() {
        let command = SimulatorCommand::build(&spec(&[]), &context());

        assert_eq!(
            command.render(),
            "/work/16CUPerGPU_withoutCache/16CUPerGPU_withoutCache -benchmark=nbody -timing \
             -magic-memory-copy -report-all \
             -metric-file-name=/work/results/2024-01-01-00-00-00/16CUPerGPU_withoutCache_nbody__metrics"
        );
    }
}
