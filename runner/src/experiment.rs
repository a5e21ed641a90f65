use crate::command::DerivedNames;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt,
    path::Path,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Experiment group must not be empty (benchmark: '{0}')")]
    EmptyGroup(String),
    #[error("Experiment benchmark must not be empty (group: '{0}')")]
    EmptyBenchmark(String),
    #[error("Duplicate experiment {0}")]
    Duplicate(String),
}

/// A single simulator invocation: which binary variant, which kernel and which extra flags.
///
/// Instances are validated on construction and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ExperimentSpec {
    group: String,
    benchmark: String,
    args: Vec<String>,
}

impl ExperimentSpec {
    pub fn new<G, B, I, S>(group: G, benchmark: B, args: I) -> Result<Self, SpecError>
    where
        G: Into<String>,
        B: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group = group.into();
        let benchmark = benchmark.into();

        if group.trim().is_empty() {
            return Err(SpecError::EmptyGroup(benchmark));
        }
        if benchmark.trim().is_empty() {
            return Err(SpecError::EmptyBenchmark(group));
        }

        Ok(Self {
            group,
            benchmark,
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn benchmark(&self) -> &str {
        &self.benchmark
    }

    /// extra simulator flags, in the order they were declared
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ExperimentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.benchmark)?;

        if !self.args.is_empty() {
            write!(f, " [{}]", self.args.join(" "))?;
        }

        Ok(())
    }
}

/// What to do with experiments that derive the same artifact names as an earlier one in
/// the batch, either because they are declared twice or because their names clash.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// keep all of them, last writer wins on disk
    #[default]
    Allow,
    /// keep the first occurrence only
    Skip,
    /// refuse to build the batch
    Reject,
}

/// Apply `policy` to a list of specs, keeping declaration order.
pub fn apply_duplicate_policy(
    specs: Vec<ExperimentSpec>,
    policy: DuplicatePolicy,
) -> Result<Vec<ExperimentSpec>, SpecError> {
    // every job of a batch shares the run directory, relative names are enough to compare
    let mut first_seen = HashMap::new();
    let clashes = specs
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| {
            match first_seen.entry(DerivedNames::new(spec, Path::new(""))) {
                Entry::Occupied(first) => Some((*first.get(), index)),
                Entry::Vacant(slot) => {
                    slot.insert(index);
                    None
                }
            }
        })
        .collect_vec();

    if clashes.is_empty() {
        return Ok(specs);
    }

    match policy {
        DuplicatePolicy::Allow => {
            for &(first, index) in clashes.iter() {
                warn!(
                    experiment = %specs[index],
                    first = %specs[first],
                    "Experiment writes the same artifacts as an earlier one, they will be overwritten"
                );
            }

            Ok(specs)
        }
        DuplicatePolicy::Skip => {
            let skipped: HashSet<usize> = clashes.iter().map(|&(_, index)| index).collect();

            debug!("Skipped {} duplicate experiments", skipped.len());

            Ok(specs
                .into_iter()
                .enumerate()
                .filter(|(index, _)| !skipped.contains(index))
                .map(|(_, spec)| spec)
                .collect())
        }
        DuplicatePolicy::Reject => {
            let (first, index) = clashes[0];

            Err(SpecError::Duplicate(if specs[first] == specs[index] {
                specs[index].to_string()
            } else {
                format!("{} (same artifacts as {})", specs[index], specs[first])
            }))
        }
    }
}

/// distinct groups of a batch in first-seen order
pub fn groups_in_order(specs: &[ExperimentSpec]) -> Vec<&str> {
    specs.iter().map(ExperimentSpec::group).unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(group: &str, benchmark: &str, args: &[&str]) -> ExperimentSpec {
        ExperimentSpec::new(group, benchmark, args.iter().copied()).unwrap()
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(
            ExperimentSpec::new("", "nbody", Vec::<String>::new()),
            Err(SpecError::EmptyGroup("nbody".into()))
        );
        assert_eq!(
            ExperimentSpec::new("model1", "  ", Vec::<String>::new()),
            Err(SpecError::EmptyBenchmark("model1".into()))
        );
    }

    #[test]
    fn keeps_argument_order() {
        let spec = spec("model1", "fir", &["-bandwidth=6", "-num-memory-banks=1"]);

        assert_eq!(spec.args(), ["-bandwidth=6", "-num-memory-banks=1"]);
        assert_eq!(spec.to_string(), "model1/fir [-bandwidth=6 -num-memory-banks=1]");
    }

    #[test]
    fn duplicates_are_allowed_by_default() {
        let specs = vec![spec("a", "fir", &[]), spec("a", "fir", &[])];

        let kept = apply_duplicate_policy(specs, DuplicatePolicy::default()).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn duplicates_can_be_skipped() {
        let specs = vec![
            spec("a", "fir", &[]),
            spec("a", "aes", &[]),
            spec("a", "fir", &[]),
            spec("a", "fir", &["-num-memory-banks=4"]),
        ];

        let kept = apply_duplicate_policy(specs, DuplicatePolicy::Skip).unwrap();
        assert_eq!(
            kept,
            vec![
                spec("a", "fir", &[]),
                spec("a", "aes", &[]),
                spec("a", "fir", &["-num-memory-banks=4"]),
            ]
        );
    }

    #[test]
    fn duplicates_can_be_rejected() {
        let specs = vec![spec("a", "fir", &[]), spec("a", "fir", &[])];

        assert_eq!(
            apply_duplicate_policy(specs, DuplicatePolicy::Reject),
            Err(SpecError::Duplicate("a/fir".into()))
        );
    }

    #[test]
    fn clashing_artifact_names_count_as_duplicates() {
        // distinct experiments, but `<group>_<benchmark>_` is `a_b_c_` for both
        let specs = vec![spec("a_b", "c", &[]), spec("a", "b_c", &[]), spec("a", "fir", &[])];

        assert_eq!(
            apply_duplicate_policy(specs.clone(), DuplicatePolicy::Reject),
            Err(SpecError::Duplicate(
                "a/b_c (same artifacts as a_b/c)".into()
            ))
        );
        assert_eq!(
            apply_duplicate_policy(specs.clone(), DuplicatePolicy::Skip).unwrap(),
            vec![spec("a_b", "c", &[]), spec("a", "fir", &[])]
        );
        assert_eq!(
            apply_duplicate_policy(specs, DuplicatePolicy::Allow)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn similar_args_are_not_duplicates() {
        let specs = vec![
            spec("m", "fir", &["-trace=a/b"]),
            spec("m", "fir", &["-trace=a-b"]),
            spec("m", "fir", &["-x", "y"]),
            spec("m", "fir", &["-x_y"]),
        ];

        assert_eq!(
            apply_duplicate_policy(specs.clone(), DuplicatePolicy::Reject),
            Ok(specs)
        );
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let specs = vec![
            spec("model2", "fir", &[]),
            spec("model1", "fir", &[]),
            spec("model2", "aes", &[]),
        ];

        assert_eq!(groups_in_order(&specs), vec!["model2", "model1"]);
    }
}
