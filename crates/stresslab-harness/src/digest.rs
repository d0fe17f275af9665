//! Reliability digest: headline KPIs for one stress run, markdown
//! rendering and run-over-run comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use stresslab_error::Result;

use crate::classify::ErrorClass;
use crate::cluster::{ReplayArtifact, cluster_failures};
use crate::export::{read_json_file, write_json_file};
use crate::lab::StressRun;
use crate::mutation::MutationClass;
use crate::runner::PipelinePhase;
use crate::stats::{DurationSummary, compute_aggregate_stats};

/// Crash-rate movement inside this band is reported as stable.
pub const TREND_BAND: f64 = 0.02;

/// Rejection counts from an external preflight gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub checked: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSummary {
    pub total_seeds: usize,
    pub passed: usize,
    pub failed: usize,
    pub runtime_crashes: usize,
    pub data_gate_rejections: usize,
    /// `passed / total`.
    pub crash_free_rate: f64,
    /// Share of failures the pipeline rejected cleanly (data gates) rather
    /// than crashing on; 1 when nothing failed.
    pub recovery_rate: f64,
    pub gate_rejection_rate: f64,
    /// Share of sampled seeds that replayed identically; 1 when none were
    /// sampled.
    pub determinism_score: f64,
    pub determinism_checked: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassFailureRate {
    pub applied: usize,
    pub failed: usize,
    pub rate: f64,
}

/// A high-risk failure cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopBlocker {
    pub signature: String,
    pub count: usize,
    pub risk_score: f64,
    pub error_classes: Vec<ErrorClass>,
    pub phases: Vec<PipelinePhase>,
    pub sample_error: String,
    pub replay: Option<ReplayArtifact>,
}

impl TopBlocker {
    #[must_use]
    pub fn is_runtime_crash(&self) -> bool {
        self.error_classes.contains(&ErrorClass::RuntimeCrash)
    }
}

/// Direction of the crash rate between two digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

impl Trend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Worsening => "worsening",
        }
    }

    /// Classify a crash-rate delta (current minus previous).
    #[must_use]
    pub fn from_crash_rate_delta(delta: f64) -> Self {
        if delta > TREND_BAND {
            Self::Worsening
        } else if delta < -TREND_BAND {
            Self::Improving
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed current-minus-previous deltas and blocker churn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestComparison {
    pub crash_free_rate_delta: f64,
    pub recovery_rate_delta: f64,
    pub gate_rejection_rate_delta: f64,
    pub determinism_score_delta: f64,
    pub crash_rate_trend: Trend,
    /// Blocker signatures absent from the previous digest.
    pub new_failures: Vec<String>,
    /// Previous blocker signatures absent now.
    pub fixed_failures: Vec<String>,
    /// New blockers that are runtime crashes.
    pub new_runtime_crashes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub generated_at: String,
    pub summary: DigestSummary,
    pub mutation_class_failure_rates: BTreeMap<MutationClass, ClassFailureRate>,
    pub phase_failure_rates: BTreeMap<PipelinePhase, f64>,
    pub top_blockers: Vec<TopBlocker>,
    pub duration_stats: DurationSummary,
    #[serde(default)]
    pub cancelled: bool,
    /// Comparison against a previous digest, when one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<DigestComparison>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize, empty: f64) -> f64 {
    if denominator == 0 {
        empty
    } else {
        numerator as f64 / denominator as f64
    }
}

impl Digest {
    #[must_use]
    pub fn attach_comparison(mut self, comparison: DigestComparison) -> Self {
        self.baseline = Some(comparison);
        self
    }

    /// `1 - crash_free_rate`.
    #[must_use]
    pub fn crash_rate(&self) -> f64 {
        1.0 - self.summary.crash_free_rate
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_file(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json_file(path)
    }
}

// ── Generation ──────────────────────────────────────────────────────────

/// Summarize one stress run.
///
/// `gate` replaces the data-gate share with an externally measured
/// rejection count; `top_n` bounds the blocker list.
#[must_use]
pub fn generate_digest(run: &StressRun, gate: Option<&GateResult>, top_n: usize) -> Digest {
    let stats = compute_aggregate_stats(&run.results);
    let total = stats.total;

    let checked = run.determinism.len();
    let deterministic = run.determinism.iter().filter(|r| r.deterministic).count();

    let summary = DigestSummary {
        total_seeds: total,
        passed: stats.passed,
        failed: stats.failed,
        runtime_crashes: stats.runtime_crashes,
        data_gate_rejections: stats.data_gate,
        crash_free_rate: ratio(stats.passed, total, 0.0),
        recovery_rate: ratio(stats.data_gate, stats.failed, 1.0),
        gate_rejection_rate: gate.map_or_else(
            || ratio(stats.data_gate, total, 0.0),
            |g| ratio(g.rejected, total, 0.0),
        ),
        determinism_score: ratio(deterministic, checked, 1.0),
        determinism_checked: checked,
    };

    let mutation_class_failure_rates = stats
        .mutation_classes
        .iter()
        .map(|(class, counts)| {
            (
                *class,
                ClassFailureRate {
                    applied: counts.applied,
                    failed: counts.failed,
                    rate: ratio(counts.failed, counts.applied, 0.0),
                },
            )
        })
        .collect();

    let phase_failure_rates = stats
        .phase_failures
        .iter()
        .map(|(phase, failures)| (*phase, ratio(*failures, total, 0.0)))
        .collect();

    let report = cluster_failures(&run.results);
    let mut ranked: Vec<(f64, usize)> = report
        .clusters
        .iter()
        .enumerate()
        .map(|(i, c)| (c.risk_score(total), i))
        .collect();
    // Stable sort keeps first-occurrence order among equal scores.
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    let top_blockers = ranked
        .into_iter()
        .take(top_n)
        .map(|(risk_score, i)| {
            let cluster = &report.clusters[i];
            TopBlocker {
                signature: cluster.signature.clone(),
                count: cluster.count,
                risk_score,
                error_classes: cluster.error_classes.clone(),
                phases: cluster.distinct_phases(),
                sample_error: cluster.sample_error.clone(),
                replay: cluster.replay_artifact(run.quick),
            }
        })
        .collect();

    Digest {
        generated_at: Utc::now().to_rfc3339(),
        summary,
        mutation_class_failure_rates,
        phase_failure_rates,
        top_blockers,
        duration_stats: stats.duration,
        cancelled: run.cancelled,
        baseline: None,
    }
}

// ── Comparison ──────────────────────────────────────────────────────────

/// Compare `current` against `previous`. A missing previous digest is an
/// empty baseline: zero deltas, stable trend, every current blocker new.
#[must_use]
pub fn compare_digests(previous: Option<&Digest>, current: &Digest) -> DigestComparison {
    let previous_signatures: BTreeSet<&str> = previous
        .map(|p| p.top_blockers.iter().map(|b| b.signature.as_str()).collect())
        .unwrap_or_default();
    let current_signatures: BTreeSet<&str> = current
        .top_blockers
        .iter()
        .map(|b| b.signature.as_str())
        .collect();

    let new_blockers: Vec<&TopBlocker> = current
        .top_blockers
        .iter()
        .filter(|b| !previous_signatures.contains(b.signature.as_str()))
        .collect();
    let fixed_failures = previous
        .map(|p| {
            p.top_blockers
                .iter()
                .filter(|b| !current_signatures.contains(b.signature.as_str()))
                .map(|b| b.signature.clone())
                .collect()
        })
        .unwrap_or_default();

    let (crash_free, recovery, gate, determinism, trend) = match previous {
        Some(prev) => {
            let (p, c) = (&prev.summary, &current.summary);
            (
                c.crash_free_rate - p.crash_free_rate,
                c.recovery_rate - p.recovery_rate,
                c.gate_rejection_rate - p.gate_rejection_rate,
                c.determinism_score - p.determinism_score,
                Trend::from_crash_rate_delta(current.crash_rate() - prev.crash_rate()),
            )
        }
        None => (0.0, 0.0, 0.0, 0.0, Trend::Stable),
    };

    DigestComparison {
        crash_free_rate_delta: crash_free,
        recovery_rate_delta: recovery,
        gate_rejection_rate_delta: gate,
        determinism_score_delta: determinism,
        crash_rate_trend: trend,
        new_runtime_crashes: new_blockers.iter().filter(|b| b.is_runtime_crash()).count(),
        new_failures: new_blockers.iter().map(|b| b.signature.clone()).collect(),
        fixed_failures,
    }
}

// ── Markdown ────────────────────────────────────────────────────────────

fn pct(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn signed_pct(delta: f64) -> String {
    format!("{:+.1} pp", delta * 100.0)
}

/// Table cells must not break the row.
pub(crate) fn cell(text: &str, max_chars: usize) -> String {
    let flat = text.replace('|', "\\|").replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

/// Render the digest's fixed sections.
#[must_use]
pub fn format_digest_markdown(digest: &Digest) -> String {
    let s = &digest.summary;
    let mut out = String::with_capacity(2048);

    let _ = writeln!(out, "## Reliability Digest\n");
    let _ = writeln!(out, "_Generated {}_\n", digest.generated_at);
    if digest.cancelled {
        let _ = writeln!(out, "> Run stopped early; figures cover completed seeds only.\n");
    }
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|--------|-------|");
    let _ = writeln!(out, "| Seeds | {} |", s.total_seeds);
    let _ = writeln!(out, "| Passed | {} |", s.passed);
    let _ = writeln!(out, "| Failed | {} |", s.failed);
    let _ = writeln!(out, "| Runtime crashes | {} |", s.runtime_crashes);
    let _ = writeln!(out, "| Data-gate rejections | {} |\n", s.data_gate_rejections);

    let _ = writeln!(out, "### Crash-Free Rate\n");
    let _ = writeln!(out, "**{}** ({} of {} seeds)\n", pct(s.crash_free_rate), s.passed, s.total_seeds);
    let _ = writeln!(out, "### Recovery Rate\n");
    let _ = writeln!(
        out,
        "**{}** of failures were clean data-gate rejections\n",
        pct(s.recovery_rate)
    );
    let _ = writeln!(out, "### Gate Rejection Rate\n");
    let _ = writeln!(out, "**{}**\n", pct(s.gate_rejection_rate));
    let _ = writeln!(out, "### Determinism Score\n");
    let _ = writeln!(
        out,
        "**{}** ({} seeds replayed)\n",
        pct(s.determinism_score),
        s.determinism_checked
    );

    let _ = writeln!(out, "### Failure Rate by Mutation Class\n");
    if digest.mutation_class_failure_rates.is_empty() {
        let _ = writeln!(out, "_No mutations applied._\n");
    } else {
        let _ = writeln!(out, "| Class | Applied | Failed | Rate |");
        let _ = writeln!(out, "|-------|---------|--------|------|");
        for (class, rate) in &digest.mutation_class_failure_rates {
            let _ = writeln!(
                out,
                "| {class} | {} | {} | {} |",
                rate.applied,
                rate.failed,
                pct(rate.rate)
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "### Failure Rate by Phase\n");
    let _ = writeln!(out, "| Phase | Rate |");
    let _ = writeln!(out, "|-------|------|");
    for (phase, rate) in &digest.phase_failure_rates {
        let _ = writeln!(out, "| {phase} | {} |", pct(*rate));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "### Top Blockers\n");
    if digest.top_blockers.is_empty() {
        let _ = writeln!(out, "_No failures._\n");
    } else {
        let _ = writeln!(out, "| Risk | Count | Class | Phases | Signature | Replay |");
        let _ = writeln!(out, "|------|-------|-------|--------|-----------|--------|");
        for blocker in &digest.top_blockers {
            let classes: Vec<&str> = blocker.error_classes.iter().map(|c| c.as_str()).collect();
            let phases: Vec<&str> = blocker.phases.iter().map(|p| p.as_str()).collect();
            let replay = blocker
                .replay
                .as_ref()
                .map_or_else(|| "-".to_owned(), |r| format!("`{}`", r.command));
            let _ = writeln!(
                out,
                "| {:.1} | {} | {} | {} | {} | {} |",
                blocker.risk_score,
                blocker.count,
                classes.join(", "),
                phases.join(", "),
                cell(&blocker.signature, 80),
                replay
            );
        }
        let _ = writeln!(out);
    }

    let d = &digest.duration_stats;
    let _ = writeln!(out, "### Durations\n");
    let _ = writeln!(
        out,
        "p50 {:.1} ms, p95 {:.1} ms, max {:.1} ms, mean {:.1} ms\n",
        d.p50, d.p95, d.max, d.mean
    );

    if let Some(cmp) = &digest.baseline {
        let _ = writeln!(out, "### Baseline Comparison\n");
        let _ = writeln!(out, "- **Crash rate trend:** {}", cmp.crash_rate_trend);
        let _ = writeln!(out, "- **Crash-free rate:** {}", signed_pct(cmp.crash_free_rate_delta));
        let _ = writeln!(out, "- **Recovery rate:** {}", signed_pct(cmp.recovery_rate_delta));
        let _ = writeln!(
            out,
            "- **Gate rejection rate:** {}",
            signed_pct(cmp.gate_rejection_rate_delta)
        );
        let _ = writeln!(
            out,
            "- **Determinism score:** {}",
            signed_pct(cmp.determinism_score_delta)
        );
        let _ = writeln!(
            out,
            "- **New failures:** {} ({} runtime crashes)",
            cmp.new_failures.len(),
            cmp.new_runtime_crashes
        );
        let _ = writeln!(out, "- **Fixed failures:** {}\n", cmp.fixed_failures.len());
        for signature in &cmp.new_failures {
            let _ = writeln!(out, "  - new: `{}`", cell(signature, 120));
        }
        for signature in &cmp.fixed_failures {
            let _ = writeln!(out, "  - fixed: `{}`", cell(signature, 120));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::determinism::DeterminismReport;
    use crate::testutil::{failed, telemetry};

    fn run_of(results: Vec<crate::runner::Telemetry>) -> StressRun {
        StressRun {
            requested_seeds: results.len(),
            results,
            ..StressRun::default()
        }
    }

    fn mixed_run() -> StressRun {
        run_of(vec![
            telemetry(1, None, 10.0),
            telemetry(2, None, 10.0),
            telemetry(3, Some((ErrorClass::DataGate, PipelinePhase::BuildPpt)), 10.0),
            telemetry(4, Some((ErrorClass::RuntimeCrash, PipelinePhase::ValidatePptx)), 10.0),
        ])
    }

    fn with_crash_free(rate: f64) -> Digest {
        let mut digest = generate_digest(&StressRun::default(), None, 5);
        digest.summary.crash_free_rate = rate;
        digest
    }

    #[test]
    fn summary_rates() {
        let digest = generate_digest(&mixed_run(), None, 5);
        let s = &digest.summary;
        assert_eq!((s.total_seeds, s.passed, s.failed), (4, 2, 2));
        assert!((s.crash_free_rate - 0.5).abs() < 1e-9);
        assert!((s.recovery_rate - 0.5).abs() < 1e-9);
        assert!((s.gate_rejection_rate - 0.25).abs() < 1e-9);
        assert!((s.determinism_score - 1.0).abs() < 1e-9);
        assert!((digest.phase_failure_rates[&PipelinePhase::BuildPpt] - 0.25).abs() < 1e-9);
        let long_text = digest.mutation_class_failure_rates[&MutationClass::LongText];
        assert_eq!((long_text.applied, long_text.failed), (4, 2));
    }

    #[test]
    fn empty_run_uses_neutral_rates() {
        let digest = generate_digest(&StressRun::default(), None, 5);
        assert!(digest.summary.crash_free_rate.abs() < f64::EPSILON);
        assert!((digest.summary.recovery_rate - 1.0).abs() < f64::EPSILON);
        assert!((digest.summary.determinism_score - 1.0).abs() < f64::EPSILON);
        assert!(digest.top_blockers.is_empty());
    }

    #[test]
    fn external_gate_result_overrides_rejection_rate() {
        let gate = GateResult {
            checked: 4,
            rejected: 3,
        };
        let digest = generate_digest(&mixed_run(), Some(&gate), 5);
        assert!((digest.summary.gate_rejection_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn determinism_score_counts_sampled_seeds() {
        let mut run = mixed_run();
        run.determinism = vec![
            DeterminismReport {
                seed: 1,
                runs: 2,
                deterministic: true,
                mismatches: Vec::new(),
            },
            DeterminismReport {
                seed: 3,
                runs: 2,
                deterministic: false,
                mismatches: Vec::new(),
            },
        ];
        let digest = generate_digest(&run, None, 5);
        assert!((digest.summary.determinism_score - 0.5).abs() < 1e-9);
        assert_eq!(digest.summary.determinism_checked, 2);
    }

    #[test]
    fn blockers_are_ranked_by_risk_then_first_occurrence() {
        let run = run_of(vec![
            failed(1, PipelinePhase::BuildPayload, "[PPT] Data gate failed: scope is missing", 1.0),
            failed(2, PipelinePhase::BuildPpt, "panicked: chart axis overflow", 1.0),
            failed(3, PipelinePhase::BuildPayload, "[PPT] Data gate failed: policy is missing", 1.0),
        ]);
        let digest = generate_digest(&run, None, 5);
        let sigs: Vec<&str> = digest.top_blockers.iter().map(|b| b.signature.as_str()).collect();
        assert_eq!(
            sigs,
            vec![
                "panicked: chart axis overflow",
                "[PPT] Data gate failed: scope is missing",
                "[PPT] Data gate failed: policy is missing",
            ]
        );
        assert_eq!(
            digest.top_blockers[0].replay.as_ref().unwrap().command,
            "stress-lab --seed=2"
        );
        assert_eq!(generate_digest(&run, None, 1).top_blockers.len(), 1);
    }

    #[test]
    fn quick_run_blockers_replay_with_the_quick_flag() {
        let mut run = run_of(vec![failed(
            4,
            PipelinePhase::BuildPpt,
            "panicked: chart axis overflow",
            1.0,
        )]);
        run.quick = true;
        let digest = generate_digest(&run, None, 5);
        assert_eq!(
            digest.top_blockers[0].replay.as_ref().unwrap().command,
            "stress-lab --seed=4 --quick"
        );
    }

    #[test]
    fn trend_is_banded() {
        assert_eq!(Trend::from_crash_rate_delta(0.02), Trend::Stable);
        assert_eq!(Trend::from_crash_rate_delta(-0.02), Trend::Stable);
        assert_eq!(Trend::from_crash_rate_delta(0.021), Trend::Worsening);
        assert_eq!(Trend::from_crash_rate_delta(-0.05), Trend::Improving);
    }

    #[test]
    fn comparison_detects_worsening() {
        let cmp = compare_digests(Some(&with_crash_free(0.98)), &with_crash_free(0.7));
        assert_eq!(cmp.crash_rate_trend, Trend::Worsening);
        assert!((cmp.crash_free_rate_delta + 0.28).abs() < 1e-9);
        let back = compare_digests(Some(&with_crash_free(0.7)), &with_crash_free(0.98));
        assert_eq!(back.crash_rate_trend, Trend::Improving);
    }

    #[test]
    fn comparison_without_previous_is_an_empty_baseline() {
        let current = generate_digest(&mixed_run(), None, 5);
        let cmp = compare_digests(None, &current);
        assert_eq!(cmp.crash_rate_trend, Trend::Stable);
        assert!(cmp.crash_free_rate_delta.abs() < f64::EPSILON);
        assert_eq!(cmp.new_failures.len(), 2);
        assert_eq!(cmp.new_runtime_crashes, 1);
        assert!(cmp.fixed_failures.is_empty());
    }

    #[test]
    fn comparison_diffs_blocker_signatures() {
        let previous = generate_digest(
            &run_of(vec![failed(1, PipelinePhase::BuildPpt, "panicked: old bug", 1.0)]),
            None,
            5,
        );
        let current = generate_digest(
            &run_of(vec![failed(1, PipelinePhase::BuildPpt, "panicked: new bug", 1.0)]),
            None,
            5,
        );
        let cmp = compare_digests(Some(&previous), &current);
        assert_eq!(cmp.new_failures, vec!["panicked: new bug".to_owned()]);
        assert_eq!(cmp.fixed_failures, vec!["panicked: old bug".to_owned()]);
        assert_eq!(cmp.new_runtime_crashes, 1);
    }

    #[test]
    fn markdown_has_fixed_sections() {
        let digest = generate_digest(&mixed_run(), None, 5);
        let cmp = compare_digests(None, &digest);
        let md = format_digest_markdown(&digest.attach_comparison(cmp));
        for header in [
            "Crash-Free Rate",
            "Recovery Rate",
            "Gate Rejection Rate",
            "Determinism Score",
            "Top Blockers",
            "Baseline Comparison",
        ] {
            assert!(md.contains(header), "missing {header}");
        }
        assert!(md.contains("`stress-lab --seed=4`"));
    }

    #[test]
    fn cell_escapes_and_truncates() {
        assert_eq!(cell("a|b\nc", 20), "a\\|b c");
        assert_eq!(cell(&"x".repeat(30), 10), "xxxxxxx...");
    }

    #[test]
    fn digest_file_round_trip() {
        let digest = generate_digest(&mixed_run(), None, 5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.json");
        digest.write(&path).unwrap();
        let loaded = Digest::load(&path).unwrap();
        assert_eq!(loaded.summary, digest.summary);
        assert_eq!(loaded.top_blockers, digest.top_blockers);
    }
}
