//! Replay determinism checks.
//!
//! A seed is deterministic when every rerun reproduces the first run's
//! mutation classes, mutated payload, status, error, error class and failed
//! phase. Durations are deliberately not compared.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mutation::MutationRegistry;
use crate::runner::{Collaborators, PipelineRunner, RunnerConfig, Telemetry};

/// One field that differed between run 0 and a later run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterminismMismatch {
    pub run: usize,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of rerunning one seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterminismReport {
    pub seed: u32,
    pub runs: usize,
    pub deterministic: bool,
    pub mismatches: Vec<DeterminismMismatch>,
}

fn comparable_fields(t: &Telemetry) -> [(&'static str, String); 6] {
    let classes: Vec<&str> = t.mutation_classes.iter().map(|c| c.as_str()).collect();
    [
        ("mutationClasses", classes.join(",")),
        ("payloadSha256", t.payload_sha256.clone().unwrap_or_default()),
        ("status", t.status.to_string()),
        ("error", t.error.clone().unwrap_or_default()),
        (
            "errorClass",
            t.error_class.map(|c| c.to_string()).unwrap_or_default(),
        ),
        (
            "failedPhase",
            t.failed_phase.map(|p| p.to_string()).unwrap_or_default(),
        ),
    ]
}

/// Run `seed` `runs` times (at least once) through `runner` and compare
/// each run against the first.
#[must_use]
pub fn check_determinism_with(runner: &PipelineRunner<'_>, seed: u32, runs: usize) -> DeterminismReport {
    let runs = runs.max(1);
    let baseline = comparable_fields(&runner.run_seed(seed));
    let mut mismatches = Vec::new();
    for run in 1..runs {
        let fields = comparable_fields(&runner.run_seed(seed));
        for ((field, expected), (_, actual)) in baseline.iter().zip(fields.iter()) {
            if expected != actual {
                mismatches.push(DeterminismMismatch {
                    run,
                    field: (*field).to_owned(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
    if !mismatches.is_empty() {
        warn!(seed, mismatches = mismatches.len(), "seed is not deterministic");
    }
    DeterminismReport {
        seed,
        runs,
        deterministic: mismatches.is_empty(),
        mismatches,
    }
}

/// [`check_determinism_with`] using a default-configured runner.
#[must_use]
pub fn check_determinism(
    seed: u32,
    runs: usize,
    collaborators: &Collaborators,
    registry: &MutationRegistry,
) -> DeterminismReport {
    let runner = PipelineRunner::new(collaborators, registry, RunnerConfig::default());
    check_determinism_with(&runner, seed, runs)
}
