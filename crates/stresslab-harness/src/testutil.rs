//! Synthetic telemetry for unit tests.

use crate::classify::ErrorClass;
use crate::mutation::MutationClass;
use crate::runner::{PhaseOutcome, PipelinePhase, Telemetry};
use crate::scenario::scenario_for_seed;

/// A record that fails in `phase` with `message`, after passing every
/// earlier phase.
pub(crate) fn failed(seed: u32, phase: PipelinePhase, message: &str, duration_ms: f64) -> Telemetry {
    let mut record = Telemetry::new(
        seed,
        scenario_for_seed(seed),
        vec![MutationClass::LongText, MutationClass::EmptyNull],
    );
    for earlier in PipelinePhase::ALL.into_iter().take_while(|p| *p != phase) {
        record.record(earlier, &PhaseOutcome::Ok { duration_ms: 1.0 });
    }
    record.record(
        phase,
        &PhaseOutcome::Err {
            duration_ms: 1.0,
            message: message.to_owned(),
            stack: None,
        },
    );
    record.duration_ms = duration_ms;
    record
}

/// A passing record, or a failing one whose message classifies as `class`.
pub(crate) fn telemetry(
    seed: u32,
    failure: Option<(ErrorClass, PipelinePhase)>,
    duration_ms: f64,
) -> Telemetry {
    match failure {
        Some((ErrorClass::DataGate, phase)) => failed(
            seed,
            phase,
            "[PPT] Data gate failed: synthesis.competitors is missing",
            duration_ms,
        ),
        Some((ErrorClass::RuntimeCrash, phase)) => failed(
            seed,
            phase,
            "panicked: index out of bounds: the len is 3 but the index is 9",
            duration_ms,
        ),
        None => {
            let mut record = Telemetry::new(
                seed,
                scenario_for_seed(seed),
                vec![MutationClass::LongText, MutationClass::EmptyNull],
            );
            for phase in PipelinePhase::ALL {
                record.record(phase, &PhaseOutcome::Ok { duration_ms: 1.0 });
            }
            record.duration_ms = duration_ms;
            record
        }
    }
}
