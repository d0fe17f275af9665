//! Run orchestration: seeds, workers, cancellation and progress.
//!
//! ```text
//!   StressConfig ─► StressLab::run
//!                      │
//!          ┌───────────┼───────────┐     jobs > 1: scoped workers pull
//!          ▼           ▼           ▼     the next seed index atomically
//!       run_seed    run_seed    run_seed
//!          └───────────┼───────────┘
//!                      ▼
//!          results (sorted by seed) ─► determinism sample ─► StressRun
//! ```
//!
//! Every seed owns its RNG streams and payload clone, so seeds can run in
//! any order on any thread and still produce identical telemetry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stresslab_error::{Result, StressLabError};
use tracing::{debug, info, warn};

use crate::classify::ErrorClass;
use crate::determinism::{DeterminismReport, check_determinism_with};
use crate::mutation::MutationRegistry;
use crate::runner::{Collaborators, PipelinePhase, PipelineRunner, RunStatus, RunnerConfig, Telemetry};

/// Seeds in a default run.
pub const DEFAULT_SEEDS: u32 = 30;
/// Minimum seeds for a deep (nightly) run.
pub const DEEP_MIN_SEEDS: u32 = 300;
/// Seeds in a quick smoke run.
pub const QUICK_SEEDS: u32 = 10;

// ── Configuration ───────────────────────────────────────────────────────

/// Settings for one stress run.
#[derive(Debug, Clone, PartialEq)]
pub struct StressConfig {
    /// Run seeds `1..=seeds` unless `explicit_seeds` is set.
    pub seeds: u32,
    pub explicit_seeds: Option<Vec<u32>>,
    /// Worker threads; 1 runs sequentially on the caller's thread.
    pub jobs: usize,
    /// Seeds rerun by the determinism checker after the run.
    pub determinism_sample: usize,
    /// Runs per sampled seed, including the first.
    pub determinism_runs: usize,
    /// Blockers listed in the digest.
    pub top_n: usize,
    pub runner: RunnerConfig,
    /// Stop starting new seeds after this long.
    pub time_budget: Option<Duration>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seeds: DEFAULT_SEEDS,
            explicit_seeds: None,
            jobs: 1,
            determinism_sample: 5,
            determinism_runs: 2,
            top_n: 5,
            runner: RunnerConfig::default(),
            time_budget: None,
        }
    }
}

impl StressConfig {
    /// The seeds this configuration runs, in order.
    #[must_use]
    pub fn seed_list(&self) -> Vec<u32> {
        self.explicit_seeds
            .clone()
            .unwrap_or_else(|| (1..=self.seeds).collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.explicit_seeds.is_none() && self.seeds == 0 {
            return Err(StressLabError::invalid_config("seed count must be at least 1"));
        }
        if let Some(seeds) = &self.explicit_seeds {
            if seeds.is_empty() {
                return Err(StressLabError::invalid_config("explicit seed list is empty"));
            }
            if seeds.contains(&0) {
                return Err(StressLabError::invalid_config("seeds must be positive"));
            }
        }
        if self.jobs == 0 {
            return Err(StressLabError::invalid_config("jobs must be at least 1"));
        }
        if self.top_n == 0 {
            return Err(StressLabError::invalid_config("top must be at least 1"));
        }
        if self.runner.slow_seed_ms.is_nan() || self.runner.slow_seed_ms <= 0.0 {
            return Err(StressLabError::invalid_config(
                "slow seed threshold must be positive",
            ));
        }
        Ok(())
    }
}

// ── Progress ────────────────────────────────────────────────────────────

/// One completed seed, reported to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub seed: u32,
    pub status: RunStatus,
    pub failed_phase: Option<PipelinePhase>,
    pub error_class: Option<ErrorClass>,
    pub duration_ms: f64,
}

fn duration_bucket(ms: f64) -> &'static str {
    if ms < 50.0 {
        "<50ms"
    } else if ms < 250.0 {
        "<250ms"
    } else if ms < 1_000.0 {
        "<1s"
    } else if ms < 5_000.0 {
        "<5s"
    } else {
        ">=5s"
    }
}

impl Progress {
    fn of(completed: usize, total: usize, telemetry: &Telemetry) -> Self {
        Self {
            completed,
            total,
            seed: telemetry.seed,
            status: telemetry.status,
            failed_phase: telemetry.failed_phase,
            error_class: telemetry.error_class,
            duration_ms: telemetry.duration_ms,
        }
    }

    /// e.g. `[ 12/30] seed 12 fail build-ppt data-gate (<50ms)`.
    #[must_use]
    pub fn line(&self) -> String {
        let width = self.total.to_string().len();
        let mut line = format!(
            "[{:>width$}/{}] seed {} {}",
            self.completed, self.total, self.seed, self.status
        );
        if let Some(phase) = self.failed_phase {
            line.push(' ');
            line.push_str(phase.as_str());
        }
        if let Some(class) = self.error_class {
            line.push(' ');
            line.push_str(class.as_str());
        }
        line.push_str(" (");
        line.push_str(duration_bucket(self.duration_ms));
        line.push(')');
        line
    }
}

type ProgressFn = dyn Fn(&Progress) + Send + Sync;

// ── Run ─────────────────────────────────────────────────────────────────

/// Telemetry and determinism evidence from one stress run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressRun {
    /// One record per completed seed, ordered by seed.
    pub results: Vec<Telemetry>,
    pub determinism: Vec<DeterminismReport>,
    pub requested_seeds: usize,
    /// Set when cancellation or the time budget stopped the run early.
    pub cancelled: bool,
    /// Set when seeds ran under the quick registry; replay commands must
    /// ask for it too.
    #[serde(default)]
    pub quick: bool,
}

impl StressRun {
    /// Records that failed as runtime crashes.
    pub fn runtime_crashes(&self) -> impl Iterator<Item = &Telemetry> {
        self.results.iter().filter(|t| t.is_runtime_crash())
    }

    #[must_use]
    pub fn has_runtime_crash(&self) -> bool {
        self.runtime_crashes().next().is_some()
    }
}

/// Drives a configured set of seeds through the pipeline.
pub struct StressLab {
    config: StressConfig,
    registry: MutationRegistry,
    collaborators: Collaborators,
    cancel: Arc<AtomicBool>,
    progress: Option<Box<ProgressFn>>,
}

impl std::fmt::Debug for StressLab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StressLab")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl StressLab {
    pub fn new(
        config: StressConfig,
        registry: MutationRegistry,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            collaborators,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Setting the returned flag stops the run before its next seed.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub const fn config(&self) -> &StressConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &MutationRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn runner(&self) -> PipelineRunner<'_> {
        PipelineRunner::new(&self.collaborators, &self.registry, self.config.runner)
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        self.cancel.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn report(&self, completed: usize, total: usize, telemetry: &Telemetry) {
        if let Some(progress) = &self.progress {
            progress(&Progress::of(completed, total, telemetry));
        }
    }

    fn run_sequential(&self, seeds: &[u32], deadline: Option<Instant>) -> Vec<Telemetry> {
        let runner = self.runner();
        let mut results = Vec::with_capacity(seeds.len());
        for &seed in seeds {
            if self.should_stop(deadline) {
                break;
            }
            let telemetry = runner.run_seed(seed);
            self.report(results.len() + 1, seeds.len(), &telemetry);
            results.push(telemetry);
        }
        results
    }

    fn run_parallel(&self, seeds: &[u32], deadline: Option<Instant>) -> Result<Vec<Telemetry>> {
        let runner = self.runner();
        let next = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(seeds.len()));
        let workers = self.config.jobs.min(seeds.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.should_stop(deadline) {
                            break;
                        }
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        let Some(&seed) = seeds.get(i) else { break };
                        let telemetry = runner.run_seed(seed);
                        let Ok(mut guard) = results.lock() else { break };
                        guard.push(telemetry);
                        let completed = guard.len();
                        let last = guard.last().cloned();
                        drop(guard);
                        if let Some(t) = last {
                            self.report(completed, seeds.len(), &t);
                        }
                    }
                });
            }
        });

        let mut results = results
            .into_inner()
            .map_err(|_| StressLabError::internal("a worker panicked while holding results"))?;
        results.sort_by_key(|t| t.seed);
        Ok(results)
    }

    /// Failing seeds first, then passing ones, up to the sample size.
    fn determinism_candidates(&self, results: &[Telemetry]) -> Vec<u32> {
        results
            .iter()
            .filter(|t| !t.passed())
            .chain(results.iter().filter(|t| t.passed()))
            .map(|t| t.seed)
            .take(self.config.determinism_sample)
            .collect()
    }

    /// Run every configured seed.
    ///
    /// Cancellation (or the time budget) is honored between seeds. A run
    /// stopped after at least one seed returns its partial results with
    /// `cancelled` set; a run stopped before any seed is an error.
    pub fn run(&self) -> Result<StressRun> {
        let seeds = self.config.seed_list();
        let started = Instant::now();
        let deadline = self.config.time_budget.map(|budget| started + budget);
        info!(
            seeds = seeds.len(),
            jobs = self.config.jobs,
            mutation_classes = self.registry.len(),
            "stress run starting"
        );

        let results = if self.config.jobs > 1 && seeds.len() > 1 {
            self.run_parallel(&seeds, deadline)?
        } else {
            self.run_sequential(&seeds, deadline)
        };

        let cancelled = results.len() < seeds.len();
        if cancelled {
            if results.is_empty() {
                return Err(StressLabError::Cancelled {
                    completed: 0,
                    requested: seeds.len(),
                });
            }
            warn!(
                completed = results.len(),
                requested = seeds.len(),
                "stress run stopped early"
            );
        }

        let runner = self.runner();
        let determinism: Vec<DeterminismReport> = if cancelled {
            Vec::new()
        } else {
            self.determinism_candidates(&results)
                .into_iter()
                .map(|seed| check_determinism_with(&runner, seed, self.config.determinism_runs))
                .collect()
        };
        debug!(checked = determinism.len(), "determinism sample finished");

        info!(
            completed = results.len(),
            failed = results.iter().filter(|t| !t.passed()).count(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "stress run finished"
        );
        Ok(StressRun {
            results,
            determinism,
            requested_seeds: seeds.len(),
            cancelled,
            quick: self.registry.is_quick(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab(config: StressConfig) -> StressLab {
        StressLab::new(config, MutationRegistry::standard(), Collaborators::reference()).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let config = StressConfig::default();
        config.validate().unwrap();
        assert_eq!(config.seed_list().len(), 30);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero_seeds = StressConfig {
            seeds: 0,
            ..StressConfig::default()
        };
        assert!(zero_seeds.validate().is_err());
        let zero_jobs = StressConfig {
            jobs: 0,
            ..StressConfig::default()
        };
        assert!(zero_jobs.validate().is_err());
        let zero_seed_listed = StressConfig {
            explicit_seeds: Some(vec![0, 1]),
            ..StressConfig::default()
        };
        let err = zero_seed_listed.validate().unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn sequential_run_covers_every_seed_in_order() {
        let run = lab(StressConfig {
            seeds: 8,
            determinism_sample: 2,
            ..StressConfig::default()
        })
        .run()
        .unwrap();
        let seeds: Vec<u32> = run.results.iter().map(|t| t.seed).collect();
        assert_eq!(seeds, (1..=8).collect::<Vec<_>>());
        assert!(!run.cancelled);
        assert_eq!(run.requested_seeds, 8);
        assert_eq!(run.determinism.len(), 2);
        assert!(run.determinism.iter().all(|r| r.deterministic));
    }

    #[test]
    fn parallel_run_matches_sequential_run() {
        let config = StressConfig {
            seeds: 12,
            determinism_sample: 0,
            ..StressConfig::default()
        };
        let sequential = lab(config.clone()).run().unwrap();
        let parallel = lab(StressConfig { jobs: 4, ..config }).run().unwrap();
        assert_eq!(sequential.results.len(), parallel.results.len());
        for (a, b) in sequential.results.iter().zip(&parallel.results) {
            assert_eq!(a.seed, b.seed);
            assert_eq!(a.status, b.status);
            assert_eq!(a.error, b.error);
            assert_eq!(a.failed_phase, b.failed_phase);
            assert_eq!(a.payload_sha256, b.payload_sha256);
        }
    }

    #[test]
    fn cancelled_before_start_is_an_error() {
        let lab = lab(StressConfig {
            seeds: 5,
            ..StressConfig::default()
        });
        lab.cancel_token().store(true, Ordering::SeqCst);
        let err = lab.run().unwrap_err();
        assert!(matches!(
            err,
            StressLabError::Cancelled {
                completed: 0,
                requested: 5
            }
        ));
    }

    #[test]
    fn cancellation_mid_run_keeps_partial_results() {
        let lab = lab(StressConfig {
            seeds: 10,
            ..StressConfig::default()
        });
        let token = lab.cancel_token();
        let lab = lab.with_progress(move |p| {
            if p.completed == 3 {
                token.store(true, Ordering::SeqCst);
            }
        });
        let run = lab.run().unwrap();
        assert!(run.cancelled);
        assert_eq!(run.results.len(), 3);
        assert!(run.determinism.is_empty());
    }

    #[test]
    fn progress_reports_every_seed() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let run = lab(StressConfig {
            seeds: 6,
            jobs: 3,
            determinism_sample: 0,
            ..StressConfig::default()
        })
        .with_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .run()
        .unwrap();
        assert_eq!(run.results.len(), 6);
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn run_records_the_quick_registry() {
        let config = StressConfig {
            seeds: 2,
            determinism_sample: 0,
            ..StressConfig::default()
        };
        let quick = StressLab::new(config.clone(), MutationRegistry::quick(), Collaborators::reference())
            .unwrap()
            .run()
            .unwrap();
        assert!(quick.quick);
        assert!(!lab(config).run().unwrap().quick);
    }

    #[test]
    fn zero_time_budget_stops_immediately() {
        let lab = lab(StressConfig {
            seeds: 5,
            time_budget: Some(Duration::ZERO),
            ..StressConfig::default()
        });
        assert!(matches!(lab.run(), Err(StressLabError::Cancelled { .. })));
    }

    #[test]
    fn progress_line_format() {
        let progress = Progress {
            completed: 7,
            total: 30,
            seed: 7,
            status: RunStatus::Fail,
            failed_phase: Some(PipelinePhase::BuildPpt),
            error_class: Some(ErrorClass::DataGate),
            duration_ms: 12.0,
        };
        assert_eq!(progress.line(), "[ 7/30] seed 7 fail build-ppt data-gate (<50ms)");
        let slow = Progress {
            duration_ms: 6_000.0,
            status: RunStatus::Pass,
            failed_phase: None,
            error_class: None,
            ..progress
        };
        assert_eq!(slow.line(), "[ 7/30] seed 7 pass (>=5s)");
    }
}
