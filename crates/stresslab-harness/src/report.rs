//! Markdown stress report: stress run -> self-contained summary file.
//!
//! ```text
//! let digest = generate_digest(&run, None, config.top_n);
//! let alerts = check_alerts(&digest, &AlertThresholds::default());
//! let markdown = render_stress_report(&run, &stats, &clusters, &digest, &alerts);
//! std::fs::write("stress-lab-report.md", markdown)?;
//! ```

use std::fmt::Write;
use std::path::Path;

use stresslab_error::{Result, StressLabError};

use crate::alerts::Alert;
use crate::cluster::ClusterReport;
use crate::digest::{Digest, cell, format_digest_markdown};
use crate::lab::StressRun;
use crate::stats::AggregateStats;

/// Crash signatures listed with replay commands.
const MAX_CRASH_SIGNATURES: usize = 10;

/// Render the full stress report.
#[must_use]
pub fn render_stress_report(
    run: &StressRun,
    stats: &AggregateStats,
    clusters: &ClusterReport,
    digest: &Digest,
    alerts: &[Alert],
) -> String {
    let mut out = String::with_capacity(8192);

    let _ = writeln!(out, "# Stress Lab Report\n");
    let _ = writeln!(
        out,
        "- **Seeds:** {} of {} requested{}",
        run.results.len(),
        run.requested_seeds,
        if run.cancelled { " (stopped early)" } else { "" }
    );
    let _ = writeln!(out, "- **Pass rate:** {:.1}%", stats.pass_rate() * 100.0);
    let _ = writeln!(
        out,
        "- **Runtime crashes:** {}\n- **Data-gate rejections:** {}\n",
        stats.runtime_crashes, stats.data_gate
    );

    // ── Alerts ──
    let _ = writeln!(out, "## Alerts\n");
    if alerts.is_empty() {
        let _ = writeln!(out, "_No alerts._\n");
    } else {
        for alert in alerts {
            let _ = writeln!(
                out,
                "- **{}** `{}`: {}",
                alert.level.as_str().to_uppercase(),
                alert.metric,
                alert.message
            );
        }
        let _ = writeln!(out);
    }

    out.push_str(&format_digest_markdown(digest));

    // ── Per-phase ──
    let _ = writeln!(out, "## Phases\n");
    let _ = writeln!(out, "| Phase | Failures | p50 (ms) | p95 (ms) | Max (ms) |");
    let _ = writeln!(out, "|-------|----------|----------|----------|----------|");
    for (phase, failures) in &stats.phase_failures {
        let d = stats.phase_durations.get(phase).copied().unwrap_or_default();
        let _ = writeln!(
            out,
            "| {phase} | {failures} | {:.1} | {:.1} | {:.1} |",
            d.p50, d.p95, d.max
        );
    }
    let _ = writeln!(out);

    // ── Per-class ──
    let _ = writeln!(out, "## Mutation Classes\n");
    if stats.mutation_classes.is_empty() {
        let _ = writeln!(out, "_No mutations applied._\n");
    } else {
        let _ = writeln!(out, "| Class | Applied | Failed | Clustered failures |");
        let _ = writeln!(out, "|-------|---------|--------|--------------------|");
        for (class, counts) in &stats.mutation_classes {
            let clustered = clusters.by_mutation_class.get(class).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "| {class} | {} | {} | {clustered} |",
                counts.applied, counts.failed
            );
        }
        let _ = writeln!(out);
    }

    // ── Crash signatures ──
    let _ = writeln!(out, "## Crash Signatures\n");
    let crashes: Vec<_> = clusters
        .clusters
        .iter()
        .filter(|c| c.has_runtime_crash())
        .take(MAX_CRASH_SIGNATURES)
        .collect();
    if crashes.is_empty() {
        let _ = writeln!(out, "_No runtime crashes._\n");
    } else {
        for cluster in crashes {
            let _ = writeln!(out, "### `{}`\n", cell(&cluster.signature, 120));
            let phases: Vec<&str> = cluster.distinct_phases().iter().map(|p| p.as_str()).collect();
            let _ = writeln!(
                out,
                "- **Seeds ({}):** {}",
                cluster.count,
                cluster
                    .seeds
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let _ = writeln!(out, "- **Phases:** {}", phases.join(", "));
            let _ = writeln!(out, "- **Risk:** {:.1}", cluster.risk_score(stats.total));
            if let Some(replay) = cluster.replay_artifact(run.quick) {
                let _ = writeln!(out, "- **Replay:** `{}`", replay.command);
            }
            let _ = writeln!(out, "\n```text\n{}\n```\n", cluster.sample_error);
        }
    }

    // ── Determinism ──
    let _ = writeln!(out, "## Determinism\n");
    if run.determinism.is_empty() {
        let _ = writeln!(out, "_No seeds replayed._");
    } else {
        let _ = writeln!(out, "| Seed | Runs | Deterministic | Mismatched fields |");
        let _ = writeln!(out, "|------|------|---------------|-------------------|");
        for report in &run.determinism {
            let fields: Vec<&str> = report.mismatches.iter().map(|m| m.field.as_str()).collect();
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                report.seed,
                report.runs,
                if report.deterministic { "yes" } else { "NO" },
                if fields.is_empty() { "-".to_owned() } else { fields.join(", ") }
            );
        }
    }

    out
}

/// Write `markdown` to `path`.
pub fn write_report(path: &Path, markdown: &str) -> Result<()> {
    std::fs::write(path, markdown).map_err(|source| StressLabError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{DEFAULT_THRESHOLDS, check_alerts};
    use crate::classify::ErrorClass;
    use crate::cluster::cluster_failures;
    use crate::digest::generate_digest;
    use crate::runner::PipelinePhase;
    use crate::stats::compute_aggregate_stats;
    use crate::testutil::telemetry;

    fn render(run: &StressRun) -> String {
        let stats = compute_aggregate_stats(&run.results);
        let clusters = cluster_failures(&run.results);
        let digest = generate_digest(run, None, 5);
        let alerts = check_alerts(&digest, &DEFAULT_THRESHOLDS);
        render_stress_report(run, &stats, &clusters, &digest, &alerts)
    }

    #[test]
    fn report_lists_crashes_with_replay_commands() {
        let run = StressRun {
            results: vec![
                telemetry(1, None, 3.0),
                telemetry(2, Some((ErrorClass::RuntimeCrash, PipelinePhase::BuildPpt)), 3.0),
                telemetry(3, Some((ErrorClass::DataGate, PipelinePhase::BuildPpt)), 3.0),
            ],
            requested_seeds: 3,
            ..StressRun::default()
        };
        let md = render(&run);
        assert!(md.starts_with("# Stress Lab Report"));
        assert!(md.contains("## Crash Signatures"));
        assert!(md.contains("- **Replay:** `stress-lab --seed=2`"));
        assert!(md.contains("**CRITICAL** `crash-rate`"));
        assert!(md.contains("| build-ppt | 2 |"));
        assert!(md.contains("Crash-Free Rate"));
    }

    #[test]
    fn quick_run_crashes_replay_with_the_quick_flag() {
        let run = StressRun {
            results: vec![telemetry(2, Some((ErrorClass::RuntimeCrash, PipelinePhase::BuildPpt)), 3.0)],
            requested_seeds: 1,
            quick: true,
            ..StressRun::default()
        };
        let md = render(&run);
        assert!(md.contains("- **Replay:** `stress-lab --seed=2 --quick`"));
    }

    #[test]
    fn clean_run_has_no_crash_section_entries() {
        let run = StressRun {
            results: vec![telemetry(1, None, 3.0), telemetry(2, None, 3.0)],
            requested_seeds: 4,
            cancelled: true,
            ..StressRun::default()
        };
        let md = render(&run);
        assert!(md.contains("_No runtime crashes._"));
        assert!(md.contains("2 of 4 requested (stopped early)"));
        assert!(md.contains("_No seeds replayed._"));
    }

    #[test]
    fn write_report_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        write_report(&path, "# hi\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hi\n");
    }
}
