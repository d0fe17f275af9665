//! Aggregate statistics over a telemetry collection.
//!
//! Statistics are always recomputed from the complete slice; nothing here
//! is updated incrementally, so percentiles stay exact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classify::ErrorClass;
use crate::mutation::MutationClass;
use crate::runner::{PipelinePhase, Telemetry};

/// Nearest-rank percentile of an ascending slice: the element at
/// `ceil(p/100 * n) - 1`, clamped to the slice. Returns 0 for an empty
/// slice.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let index = usize::try_from(rank.max(0)).unwrap_or(0).min(sorted.len() - 1);
    sorted[index]
}

/// Distribution summary of a duration sample, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationSummary {
    pub count: usize,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
}

impl DurationSummary {
    /// Summarize `samples` (any order).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let sum: f64 = sorted.iter().sum();
        Self {
            count: sorted.len(),
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            max: sorted[sorted.len() - 1],
            mean: sum / sorted.len() as f64,
        }
    }
}

/// How often a mutation class was applied and how often its seed failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCounts {
    pub applied: usize,
    pub failed: usize,
}

/// Counts, rates and duration percentiles for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub runtime_crashes: usize,
    pub data_gate: usize,
    /// Failures per phase; every phase is present.
    pub phase_failures: BTreeMap<PipelinePhase, usize>,
    pub mutation_classes: BTreeMap<MutationClass, ClassCounts>,
    pub duration: DurationSummary,
    pub phase_durations: BTreeMap<PipelinePhase, DurationSummary>,
}

impl AggregateStats {
    /// Fraction of seeds that passed; 0 for an empty run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// Recompute statistics from the full telemetry set.
#[must_use]
pub fn compute_aggregate_stats(results: &[Telemetry]) -> AggregateStats {
    let mut stats = AggregateStats {
        total: results.len(),
        phase_failures: PipelinePhase::ALL.iter().map(|&p| (p, 0)).collect(),
        ..AggregateStats::default()
    };
    let mut durations = Vec::with_capacity(results.len());
    let mut phase_samples: BTreeMap<PipelinePhase, Vec<f64>> = BTreeMap::new();

    for record in results {
        durations.push(record.duration_ms);
        for (phase, entry) in &record.phases {
            phase_samples.entry(*phase).or_default().push(entry.duration_ms);
        }

        let failed = !record.passed();
        if failed {
            stats.failed += 1;
            match record.error_class {
                Some(ErrorClass::DataGate) => stats.data_gate += 1,
                Some(ErrorClass::RuntimeCrash) | None => stats.runtime_crashes += 1,
            }
            if let Some(phase) = record.failed_phase {
                *stats.phase_failures.entry(phase).or_default() += 1;
            }
        } else {
            stats.passed += 1;
        }

        for class in &record.mutation_classes {
            let counts = stats.mutation_classes.entry(*class).or_default();
            counts.applied += 1;
            if failed {
                counts.failed += 1;
            }
        }
    }

    stats.duration = DurationSummary::from_samples(&durations);
    stats.phase_durations = phase_samples
        .into_iter()
        .map(|(phase, samples)| (phase, DurationSummary::from_samples(&samples)))
        .collect();
    stats
}
