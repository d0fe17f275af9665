//! Per-seed pipeline runner.
//!
//! ```text
//!   build-payload ─► content-size-check ─► build-ppt ─► validate-pptx
//!        │                   │                 │              │
//!        └──── fail ─────────┴──── fail ───────┴──── fail ────┴─► stop
//! ```
//!
//! Each phase produces an explicit [`PhaseOutcome`]. The first failing phase
//! is recorded, classified and ends the seed; later phases never run. A
//! failure never escapes [`PipelineRunner::run_seed`]: collaborator errors
//! and collaborator panics alike become telemetry.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stresslab_docgen::{
    ArchiveInspector, CONTENT_TYPES_ENTRY, ContentSizeChecker, DocgenError, DocumentBuilder,
    FieldBudgetCompactor, PRESENTATION_ENTRY, ReferenceDeckBuilder, SizeCheckOptions,
    StoredZipInspector,
};
use tracing::{debug, warn};

use crate::TELEMETRY_VERSION;
use crate::classify::{ErrorClass, classify_error};
use crate::mutation::{MutatedPayload, MutationClass, MutationRegistry};
use crate::payload::{build_base_payload, payload_fingerprint};
use crate::scenario::{Scenario, scenario_for_seed};

// ── Phases ──────────────────────────────────────────────────────────────

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelinePhase {
    BuildPayload,
    ContentSizeCheck,
    BuildPpt,
    ValidatePptx,
}

impl PipelinePhase {
    pub const ALL: [Self; 4] = [
        Self::BuildPayload,
        Self::ContentSizeCheck,
        Self::BuildPpt,
        Self::ValidatePptx,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BuildPayload => "build-payload",
            Self::ContentSizeCheck => "content-size-check",
            Self::BuildPpt => "build-ppt",
            Self::ValidatePptx => "validate-pptx",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass/fail status of a phase or a whole seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged result of one phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Ok {
        duration_ms: f64,
    },
    Err {
        duration_ms: f64,
        message: String,
        stack: Option<String>,
    },
}

impl PhaseOutcome {
    #[must_use]
    pub const fn duration_ms(&self) -> f64 {
        match self {
            Self::Ok { duration_ms } | Self::Err { duration_ms, .. } => *duration_ms,
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// A phase failure before timing is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PhaseFailure {
    message: String,
    stack: Option<String>,
}

impl PhaseFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    fn from_panic(phase: PipelinePhase, payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self {
            message: format!("panicked: {detail}"),
            stack: Some(format!("panic during {phase}")),
        }
    }
}

impl From<DocgenError> for PhaseFailure {
    fn from(err: DocgenError) -> Self {
        Self {
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}

// ── Telemetry ───────────────────────────────────────────────────────────

/// Timing and status of one executed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub duration_ms: f64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured record of one seed's run. Immutable once the run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub version: u32,
    pub seed: u32,
    pub scenario: Scenario,
    pub mutation_classes: Vec<MutationClass>,
    /// Executed phases only; a phase after the failing one has no entry.
    pub phases: BTreeMap<PipelinePhase, PhaseRecord>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub failed_phase: Option<PipelinePhase>,
    pub stack: Option<String>,
    pub duration_ms: f64,
    /// SHA-256 of the mutated payload, when it was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_sha256: Option<String>,
}

impl Telemetry {
    /// A passing record with no phases executed yet.
    #[must_use]
    pub fn new(seed: u32, scenario: Scenario, mutation_classes: Vec<MutationClass>) -> Self {
        Self {
            version: TELEMETRY_VERSION,
            seed,
            scenario,
            mutation_classes,
            phases: BTreeMap::new(),
            status: RunStatus::Pass,
            error: None,
            error_class: None,
            failed_phase: None,
            stack: None,
            duration_ms: 0.0,
            payload_sha256: None,
        }
    }

    /// Record a phase outcome. A failure marks the seed failed and
    /// classifies the message.
    pub fn record(&mut self, phase: PipelinePhase, outcome: &PhaseOutcome) {
        match outcome {
            PhaseOutcome::Ok { duration_ms } => {
                self.phases.insert(
                    phase,
                    PhaseRecord {
                        duration_ms: *duration_ms,
                        status: RunStatus::Pass,
                        error: None,
                    },
                );
            }
            PhaseOutcome::Err {
                duration_ms,
                message,
                stack,
            } => {
                self.phases.insert(
                    phase,
                    PhaseRecord {
                        duration_ms: *duration_ms,
                        status: RunStatus::Fail,
                        error: Some(message.clone()),
                    },
                );
                self.status = RunStatus::Fail;
                self.error = Some(message.clone());
                self.error_class = Some(classify_error(message));
                self.failed_phase = Some(phase);
                self.stack.clone_from(stack);
            }
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    #[must_use]
    pub fn is_runtime_crash(&self) -> bool {
        self.error_class == Some(ErrorClass::RuntimeCrash)
    }
}

// ── Collaborators ───────────────────────────────────────────────────────

/// The external systems a seed is driven through.
pub struct Collaborators {
    pub builder: Box<dyn DocumentBuilder>,
    pub size_checker: Box<dyn ContentSizeChecker>,
    pub inspector: Box<dyn ArchiveInspector>,
}

impl Collaborators {
    pub fn new(
        builder: Box<dyn DocumentBuilder>,
        size_checker: Box<dyn ContentSizeChecker>,
        inspector: Box<dyn ArchiveInspector>,
    ) -> Self {
        Self {
            builder,
            size_checker,
            inspector,
        }
    }

    /// The reference deck builder, compactor and archive reader.
    #[must_use]
    pub fn reference() -> Self {
        Self::new(
            Box::new(ReferenceDeckBuilder::default()),
            Box::new(FieldBudgetCompactor::default()),
            Box::new(StoredZipInspector),
        )
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// ── Runner ──────────────────────────────────────────────────────────────

/// Runner settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    /// Smallest artifact `build-ppt` accepts, in bytes.
    pub min_document_bytes: usize,
    /// Seeds slower than this are logged at warn level.
    pub slow_seed_ms: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            min_document_bytes: 1024,
            slow_seed_ms: 5_000.0,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}

fn section<'a>(payload: &'a Value, key: &str) -> &'a Value {
    payload.get(key).unwrap_or(&Value::Null)
}

/// Drives seeds through the four phases.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRunner<'a> {
    collaborators: &'a Collaborators,
    registry: &'a MutationRegistry,
    config: RunnerConfig,
}

impl<'a> PipelineRunner<'a> {
    #[must_use]
    pub fn new(
        collaborators: &'a Collaborators,
        registry: &'a MutationRegistry,
        config: RunnerConfig,
    ) -> Self {
        Self {
            collaborators,
            registry,
            config,
        }
    }

    /// Run `body` as one phase, converting errors and panics into an
    /// [`PhaseOutcome::Err`].
    fn execute<T>(
        phase: PipelinePhase,
        body: impl FnOnce() -> Result<T, PhaseFailure>,
    ) -> (PhaseOutcome, Option<T>) {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(body))
            .unwrap_or_else(|payload| Err(PhaseFailure::from_panic(phase, payload.as_ref())));
        let duration_ms = elapsed_ms(start);
        match result {
            Ok(value) => (PhaseOutcome::Ok { duration_ms }, Some(value)),
            Err(failure) => (
                PhaseOutcome::Err {
                    duration_ms,
                    message: failure.message,
                    stack: failure.stack,
                },
                None,
            ),
        }
    }

    fn step<T>(
        telemetry: &mut Telemetry,
        phase: PipelinePhase,
        body: impl FnOnce() -> Result<T, PhaseFailure>,
    ) -> Option<T> {
        let (outcome, value) = Self::execute(phase, body);
        telemetry.record(phase, &outcome);
        if let PhaseOutcome::Err { message, .. } = &outcome {
            debug!(seed = telemetry.seed, %phase, error = %message, "phase failed");
        }
        value
    }

    fn build_payload(&self, seed: u32) -> Result<MutatedPayload, PhaseFailure> {
        let base = build_base_payload(seed);
        Ok(self.registry.mutate_payload(&base, seed))
    }

    fn check_content_size(&self, payload: &Value) -> Result<Value, PhaseFailure> {
        let outcome = self.collaborators.size_checker.check_content_size(
            section(payload, "countryAnalysis"),
            SizeCheckOptions { dry_run: false },
        )?;
        if !outcome.compaction_log.is_empty() {
            debug!(
                compacted = outcome.compaction_log.len(),
                "content size check compacted fields"
            );
        }
        Ok(outcome.payload)
    }

    fn build_document(&self, payload: &Value, country_analysis: &Value) -> Result<Vec<u8>, PhaseFailure> {
        let bytes = self.collaborators.builder.build_document(
            section(payload, "synthesis"),
            country_analysis,
            section(payload, "scope"),
        )?;
        if bytes.is_empty() {
            return Err(PhaseFailure::new("document builder returned an empty artifact"));
        }
        if bytes.len() < self.config.min_document_bytes {
            return Err(PhaseFailure::new(format!(
                "document artifact is {} bytes, below the {}-byte minimum",
                bytes.len(),
                self.config.min_document_bytes
            )));
        }
        Ok(bytes)
    }

    fn validate_archive(&self, bytes: &[u8]) -> Result<usize, PhaseFailure> {
        let listing = self.collaborators.inspector.parse_archive(bytes)?;
        for required in [CONTENT_TYPES_ENTRY, PRESENTATION_ENTRY] {
            if !listing.contains(required) {
                return Err(PhaseFailure::new(format!(
                    "archive is missing required entry {required}"
                )));
            }
        }
        Ok(listing.entries.len())
    }

    /// Run one seed end to end. Never panics and never returns an error:
    /// every failure is captured in the returned telemetry.
    #[must_use]
    pub fn run_seed(&self, seed: u32) -> Telemetry {
        let started = Instant::now();
        let mut telemetry = Telemetry::new(
            seed,
            scenario_for_seed(seed),
            self.registry.select_mutations_for_seed(seed),
        );

        if let Some(entries) = self.run_phases(&mut telemetry) {
            debug!(seed, entries, "artifact validated");
        }

        telemetry.duration_ms = elapsed_ms(started);
        if telemetry.duration_ms > self.config.slow_seed_ms {
            warn!(
                seed,
                duration_ms = telemetry.duration_ms,
                threshold_ms = self.config.slow_seed_ms,
                "slow seed"
            );
        }
        debug!(
            seed,
            status = %telemetry.status,
            failed_phase = ?telemetry.failed_phase,
            error_class = ?telemetry.error_class,
            "seed finished"
        );
        telemetry
    }

    /// Entry count of the validated archive, or `None` once a phase fails;
    /// the failure itself is already recorded on `telemetry`.
    fn run_phases(&self, telemetry: &mut Telemetry) -> Option<usize> {
        let seed = telemetry.seed;
        let mutated = Self::step(telemetry, PipelinePhase::BuildPayload, || {
            self.build_payload(seed)
        })?;
        telemetry.payload_sha256 = Some(payload_fingerprint(&mutated.payload));

        let country_analysis = Self::step(telemetry, PipelinePhase::ContentSizeCheck, || {
            self.check_content_size(&mutated.payload)
        })?;

        let bytes = Self::step(telemetry, PipelinePhase::BuildPpt, || {
            self.build_document(&mutated.payload, &country_analysis)
        })?;

        Self::step(telemetry, PipelinePhase::ValidatePptx, || {
            self.validate_archive(&bytes)
        })
    }
}
