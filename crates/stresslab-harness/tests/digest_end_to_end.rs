//! Digest pipeline over synthetic telemetry: stats, clusters, digest,
//! comparison, alerts and markdown, without running any collaborator.

use stresslab_harness::{
    AlertLevel, AlertMetric, DEFAULT_THRESHOLDS, MutationClass, PhaseOutcome, PipelinePhase,
    StressRun, Telemetry, Trend, check_alerts, cluster_failures, compare_digests,
    compute_aggregate_stats, format_digest_markdown, generate_digest, scenario_for_seed,
};

// ─── Helpers ─────────────────────────────────────────────────────────────

const RUNTIME_MESSAGES: [&str; 2] = [
    "panicked: called `Option::unwrap()` on a `None` value at src/deck/chart.rs:88:21",
    "Cannot read properties of undefined (reading 'series')",
];

fn record(seed: u32, failure: Option<(PipelinePhase, &str)>) -> Telemetry {
    let classes = if seed % 2 == 0 {
        vec![MutationClass::LongText]
    } else {
        vec![MutationClass::ChartAnomalies, MutationClass::EmptyNull]
    };
    let mut telemetry = Telemetry::new(seed, scenario_for_seed(seed), classes);
    for phase in PipelinePhase::ALL {
        match failure {
            Some((failing, message)) if failing == phase => {
                telemetry.record(
                    phase,
                    &PhaseOutcome::Err {
                        duration_ms: 4.0,
                        message: message.to_owned(),
                        stack: None,
                    },
                );
                break;
            }
            _ => telemetry.record(phase, &PhaseOutcome::Ok { duration_ms: 2.0 }),
        }
    }
    telemetry.duration_ms = f64::from(seed);
    telemetry
}

/// 100 seeds, every fifth failing: alternating runtime crashes and data
/// gates, so 10 of each.
fn synthetic_run() -> StressRun {
    let results: Vec<Telemetry> = (1..=100u32)
        .map(|seed| {
            if seed % 5 != 0 {
                return record(seed, None);
            }
            if (seed / 5) % 2 == 0 {
                let message = RUNTIME_MESSAGES[(seed / 10 % 2) as usize];
                record(seed, Some((PipelinePhase::BuildPpt, message)))
            } else {
                let message = format!("[PPT] Data gate failed: synthesis.section{seed} is missing");
                record(seed, Some((PipelinePhase::BuildPayload, &message)))
            }
        })
        .collect();
    StressRun {
        requested_seeds: results.len(),
        results,
        ..StressRun::default()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────

#[test]
fn synthetic_run_produces_a_complete_digest() {
    let run = synthetic_run();
    let digest = generate_digest(&run, None, 5);

    assert_eq!(digest.summary.total_seeds, 100);
    assert_eq!(digest.summary.failed, 20);
    assert_eq!(digest.summary.runtime_crashes, 10);
    assert_eq!(digest.summary.data_gate_rejections, 10);
    assert!(digest.summary.crash_free_rate > 0.0 && digest.summary.crash_free_rate < 1.0);
    assert!((digest.summary.recovery_rate - 0.5).abs() < 1e-9);
    assert!(!digest.top_blockers.is_empty());
    assert!(digest.top_blockers.len() <= 5);

    let md = format_digest_markdown(&digest);
    for header in [
        "Crash-Free Rate",
        "Recovery Rate",
        "Gate Rejection Rate",
        "Determinism Score",
    ] {
        assert!(md.contains(header), "markdown is missing {header}");
    }
}

#[test]
fn data_gate_messages_share_one_signature() {
    let run = synthetic_run();
    let clusters = cluster_failures(&run.results);
    // Two runtime signatures plus one data-gate signature with the section
    // number masked.
    assert_eq!(clusters.clusters.len(), 3);
    let gate = clusters
        .clusters
        .iter()
        .find(|c| c.signature.starts_with("[PPT]"))
        .unwrap();
    assert_eq!(gate.count, 10);
    assert_eq!(gate.signature, "[PPT] Data gate failed: synthesis.section<n> is missing");
}

#[test]
fn runtime_crashes_outrank_data_gates() {
    let digest = generate_digest(&synthetic_run(), None, 5);
    let first = &digest.top_blockers[0];
    assert!(first.is_runtime_crash());
    assert!(first.replay.is_some());
    let last = digest.top_blockers.last().unwrap();
    assert!(!last.is_runtime_crash());
}

#[test]
fn stats_and_digest_agree() {
    let run = synthetic_run();
    let stats = compute_aggregate_stats(&run.results);
    let digest = generate_digest(&run, None, 5);
    assert_eq!(stats.failed, digest.summary.failed);
    assert_eq!(stats.duration, digest.duration_stats);
    assert!((digest.phase_failure_rates[&PipelinePhase::BuildPpt] - 0.10).abs() < 1e-9);
}

#[test]
fn crash_free_drop_is_worsening() {
    let mut previous = generate_digest(&synthetic_run(), None, 5);
    previous.summary.crash_free_rate = 0.98;
    let mut current = previous.clone();
    current.summary.crash_free_rate = 0.7;
    let comparison = compare_digests(Some(&previous), &current);
    assert_eq!(comparison.crash_rate_trend, Trend::Worsening);
    assert!(comparison.new_failures.is_empty());
    assert!(comparison.fixed_failures.is_empty());
}

#[test]
fn first_run_alerts_on_its_own_crashes() {
    let digest = generate_digest(&synthetic_run(), None, 5);
    let comparison = compare_digests(None, &digest);
    let digest = digest.attach_comparison(comparison);
    let alerts = check_alerts(&digest, &DEFAULT_THRESHOLDS);

    let crash_rate = alerts.iter().find(|a| a.metric == AlertMetric::CrashRate).unwrap();
    assert_eq!(crash_rate.level, AlertLevel::Critical);
    let new_crashes = alerts
        .iter()
        .find(|a| a.metric == AlertMetric::NewRuntimeCrashes)
        .unwrap();
    assert_eq!(new_crashes.level, AlertLevel::Warning);
    let recovery = alerts.iter().find(|a| a.metric == AlertMetric::RecoveryRate).unwrap();
    assert_eq!(recovery.level, AlertLevel::Warning);
    assert!(alerts.iter().all(|a| a.metric != AlertMetric::DeterminismScore));
}
