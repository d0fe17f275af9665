//! Failure clustering, risk scoring and replay artifacts.
//!
//! Failures are grouped by a normalized error signature: the raw message with
//! paths, line/column suffixes and other high-entropy substrings replaced by
//! placeholders, so that the same defect reached from different inputs lands
//! in one cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::ErrorClass;
use crate::mutation::MutationClass;
use crate::runner::{PipelinePhase, Telemetry};

/// Signature for a missing or blank message.
pub const UNKNOWN_SIGNATURE: &str = "unknown-error";

/// Longest signature kept, in chars.
pub const MAX_SIGNATURE_CHARS: usize = 200;

// ── Signature normalization ─────────────────────────────────────────────

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("signature pattern is valid")
}

/// `(pattern, replacement)` in application order. Timestamps go before
/// line:column stripping (their `hh:mm:ss` would otherwise be eaten), and
/// long opaque tokens go before digit runs.
static NORMALIZERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            compile(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?"),
            "<ts>",
        ),
        (
            compile(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b"),
            "<uuid>",
        ),
        (compile(r":\d+:\d+"), ""),
        // Absolute or dot-relative paths only; `a/b/c` is left alone.
        (
            compile(r"(^|[^\w.@~>-])((?:[A-Za-z]:|\.{1,2})?(?:[/\\][\w.@~-]+){2,})"),
            "${1}<path>",
        ),
        (compile(r"\b0x[0-9a-fA-F]+\b"), "<hex>"),
        (compile(r"\b[A-Za-z0-9_+=-]{32,}\b"), "<blob>"),
        (compile(r"\d+"), "<n>"),
        (compile(r"\s+"), " "),
    ]
});

/// Normalize an error message into a stable grouping key.
#[must_use]
pub fn extract_error_signature(message: Option<&str>) -> String {
    let Some(message) = message.filter(|m| !m.trim().is_empty()) else {
        return UNKNOWN_SIGNATURE.to_owned();
    };
    let mut signature = message.to_owned();
    for (pattern, replacement) in NORMALIZERS.iter() {
        signature = pattern.replace_all(&signature, *replacement).into_owned();
    }
    let trimmed = signature.trim();
    if trimmed.is_empty() {
        return UNKNOWN_SIGNATURE.to_owned();
    }
    let truncated: String = trimmed.chars().take(MAX_SIGNATURE_CHARS).collect();
    truncated.trim_end().to_owned()
}

// ── Clusters ────────────────────────────────────────────────────────────

/// Failed seeds sharing one signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCluster {
    pub signature: String,
    pub count: usize,
    /// Seeds in insertion order.
    pub seeds: Vec<u32>,
    /// Distinct error classes, first-seen order.
    pub error_classes: Vec<ErrorClass>,
    /// Distinct mutation classes across member seeds, first-seen order.
    pub mutation_classes: Vec<MutationClass>,
    /// Failed phase of each member that recorded one, insertion order.
    /// Shorter than `seeds` when a member failed outside any phase.
    pub phases: Vec<PipelinePhase>,
    /// The first member's raw error.
    pub sample_error: String,
}

/// The `stress-lab` invocation that reruns `seed`. Seeds from a quick run
/// only reproduce under the quick registry, so the flag is carried along.
#[must_use]
pub fn replay_command(seed: u32, quick: bool) -> String {
    if quick {
        format!("stress-lab --seed={seed} --quick")
    } else {
        format!("stress-lab --seed={seed}")
    }
}

/// Replay instructions for a cluster's first seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayArtifact {
    pub seed: u32,
    pub mutation_classes: Vec<MutationClass>,
    pub command: String,
    pub expected_error: String,
}

const fn phase_multiplier(phase: PipelinePhase) -> f64 {
    match phase {
        PipelinePhase::BuildPpt => 1.4,
        PipelinePhase::ValidatePptx => 1.2,
        PipelinePhase::ContentSizeCheck => 1.0,
        PipelinePhase::BuildPayload => 0.9,
    }
}

fn push_unique<T: PartialEq + Copy>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

impl FailureCluster {
    /// Distinct failed phases, first-seen order.
    #[must_use]
    pub fn distinct_phases(&self) -> Vec<PipelinePhase> {
        let mut out = Vec::new();
        for &phase in &self.phases {
            push_unique(&mut out, phase);
        }
        out
    }

    /// Whether any member failed as a runtime crash.
    #[must_use]
    pub fn has_runtime_crash(&self) -> bool {
        self.error_classes.contains(&ErrorClass::RuntimeCrash)
    }

    /// Operational risk in `[0, 100]`, rounded to one decimal.
    ///
    /// `(10 + 60·frequency) × class × phase × breadth`, where the class
    /// multiplier is 1.5 for runtime crashes and 0.6 for data gates, the
    /// phase multiplier is the highest among member phases (build-ppt
    /// weighs most), and breadth adds 8% per distinct mutation class.
    /// Zero for an empty cluster or a run with no seeds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn risk_score(&self, total_seeds: usize) -> f64 {
        if self.count == 0 || total_seeds == 0 {
            return 0.0;
        }
        let frequency = (self.count as f64 / total_seeds as f64).min(1.0);
        let class = if self.has_runtime_crash() {
            1.5
        } else if self.error_classes.contains(&ErrorClass::DataGate) {
            0.6
        } else {
            1.0
        };
        let phase = self
            .phases
            .iter()
            .map(|p| phase_multiplier(*p))
            .reduce(f64::max)
            .unwrap_or(1.0);
        let breadth = 1.0 + 0.08 * self.mutation_classes.len() as f64;
        let score = (10.0 + frequency * 60.0) * class * phase * breadth;
        (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
    }

    /// Probability of each phase among member failures. Every phase is
    /// present; all zero for an empty cluster.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn phase_confidence(&self) -> BTreeMap<PipelinePhase, f64> {
        let mut confidence: BTreeMap<PipelinePhase, f64> =
            PipelinePhase::ALL.iter().map(|&p| (p, 0.0)).collect();
        if self.phases.is_empty() {
            return confidence;
        }
        let total = self.phases.len() as f64;
        for phase in &self.phases {
            *confidence.entry(*phase).or_default() += 1.0 / total;
        }
        confidence
    }

    /// Replay instructions for the first member seed, or `None` for an
    /// empty cluster. `quick` names the registry the cluster was found with.
    #[must_use]
    pub fn replay_artifact(&self, quick: bool) -> Option<ReplayArtifact> {
        let seed = *self.seeds.first()?;
        Some(ReplayArtifact {
            seed,
            mutation_classes: self.mutation_classes.clone(),
            command: replay_command(seed, quick),
            expected_error: self.sample_error.clone(),
        })
    }
}

/// Clusters plus failure counts by phase and mutation class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
    /// Ordered by first occurrence.
    pub clusters: Vec<FailureCluster>,
    pub by_phase: BTreeMap<PipelinePhase, usize>,
    pub by_mutation_class: BTreeMap<MutationClass, usize>,
}

/// Group failed records by signature. Stable: identical input yields
/// identical output.
#[must_use]
pub fn cluster_failures(results: &[Telemetry]) -> ClusterReport {
    let mut report = ClusterReport::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in results.iter().filter(|r| !r.passed()) {
        let signature = extract_error_signature(record.error.as_deref());
        let slot = *index.entry(signature.clone()).or_insert_with(|| {
            report.clusters.push(FailureCluster {
                signature,
                sample_error: record.error.clone().unwrap_or_default(),
                ..FailureCluster::default()
            });
            report.clusters.len() - 1
        });
        let cluster = &mut report.clusters[slot];
        cluster.count += 1;
        cluster.seeds.push(record.seed);
        push_unique(
            &mut cluster.error_classes,
            record.error_class.unwrap_or(ErrorClass::RuntimeCrash),
        );
        for &class in &record.mutation_classes {
            push_unique(&mut cluster.mutation_classes, class);
            *report.by_mutation_class.entry(class).or_default() += 1;
        }
        if let Some(phase) = record.failed_phase {
            cluster.phases.push(phase);
            *report.by_phase.entry(phase).or_default() += 1;
        }
    }
    report
}
