//! Deterministic mutation-fuzzing harness for the document pipeline.
//!
//! This crate provides the infrastructure for:
//! - **Seeded generation**: a seed-pure PRNG, seed→scenario mapping and a
//!   fully-populated base payload per seed
//! - **Mutation**: a registry of named corruption classes applied to an owned
//!   clone of the payload
//! - **Pipeline runs**: four fail-fast phases per seed against pluggable
//!   collaborators, recorded as structured telemetry
//! - **Analysis**: aggregate statistics, failure clustering, risk scoring,
//!   reliability digests, trend comparison and threshold alerts
//!
//! ```text
//!   seed ─► scenario ─► base payload ─► mutation engine ─► pipeline runner
//!                                                               │
//!                                                          telemetry
//!                                                               │
//!                           stats ◄──────────┬──────────► clusters
//!                                            ▼
//!                                  digest ─► alerts / reports
//! ```

pub mod alerts;
pub mod classify;
pub mod cluster;
pub mod determinism;
pub mod digest;
pub mod export;
pub mod lab;
pub mod mutation;
pub mod payload;
pub mod report;
pub mod rng;
pub mod runner;
pub mod scenario;
pub mod stats;

#[cfg(test)]
mod testutil;

pub use alerts::{Alert, AlertLevel, AlertMetric, AlertThresholds, DEFAULT_THRESHOLDS, check_alerts};
pub use classify::{ErrorClass, classify_error};
pub use cluster::{
    ClusterReport, FailureCluster, ReplayArtifact, cluster_failures, extract_error_signature,
    replay_command,
};
pub use determinism::{DeterminismReport, check_determinism};
pub use digest::{Digest, DigestComparison, GateResult, Trend, compare_digests, format_digest_markdown, generate_digest};
pub use export::TelemetryExport;
pub use lab::{Progress, StressConfig, StressLab, StressRun};
pub use mutation::{MutatedPayload, MutationClass, MutationRegistry};
pub use payload::build_base_payload;
pub use report::{render_stress_report, write_report};
pub use rng::{RngPurpose, SeededRng};
pub use runner::{Collaborators, PhaseOutcome, PipelinePhase, PipelineRunner, RunStatus, RunnerConfig, Telemetry};
pub use scenario::{Scenario, scenario_for_seed};
pub use stats::{AggregateStats, compute_aggregate_stats};

/// Schema version stamped on every telemetry record.
pub const TELEMETRY_VERSION: u32 = 1;
