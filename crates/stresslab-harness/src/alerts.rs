//! Threshold alerts over a digest.
//!
//! Five metrics are evaluated independently; each yields at most one alert.
//! Crash rate, new runtime crashes and gate rejection rate alert when they
//! reach a threshold. Determinism score and recovery rate alert when they
//! drop below one.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stresslab_error::{Result, StressLabError};

use crate::digest::Digest;
use crate::export::read_json_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertMetric {
    CrashRate,
    NewRuntimeCrashes,
    GateRejectionRate,
    DeterminismScore,
    RecoveryRate,
}

impl AlertMetric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CrashRate => "crash-rate",
            Self::NewRuntimeCrashes => "new-runtime-crashes",
            Self::GateRejectionRate => "gate-rejection-rate",
            Self::DeterminismScore => "determinism-score",
            Self::RecoveryRate => "recovery-rate",
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub metric: AlertMetric,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Warning and critical thresholds for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    /// `1 - crashFreeRate`; alerts at or above.
    pub crash_rate: Band,
    /// Alerts at or above.
    pub new_runtime_crashes: Band,
    /// Alerts at or above.
    pub gate_rejection_rate: Band,
    /// Alerts below.
    pub determinism_score: Band,
    /// Alerts below.
    pub recovery_rate: Band,
}

pub const DEFAULT_THRESHOLDS: AlertThresholds = AlertThresholds {
    crash_rate: Band {
        warning: 0.05,
        critical: 0.15,
    },
    new_runtime_crashes: Band {
        warning: 1.0,
        critical: 3.0,
    },
    gate_rejection_rate: Band {
        warning: 0.30,
        critical: 0.50,
    },
    determinism_score: Band {
        warning: 1.0,
        critical: 0.9,
    },
    recovery_rate: Band {
        warning: 0.8,
        critical: 0.5,
    },
};

impl Default for AlertThresholds {
    fn default() -> Self {
        DEFAULT_THRESHOLDS
    }
}

impl AlertThresholds {
    /// Load thresholds from JSON; omitted metrics keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let thresholds: Self = read_json_file(path)?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        let rising = [
            ("crashRate", self.crash_rate),
            ("newRuntimeCrashes", self.new_runtime_crashes),
            ("gateRejectionRate", self.gate_rejection_rate),
        ];
        for (name, band) in rising {
            if band.critical < band.warning {
                return Err(StressLabError::invalid_config(format!(
                    "{name}: critical threshold {} is below warning {}",
                    band.critical, band.warning
                )));
            }
        }
        let falling = [
            ("determinismScore", self.determinism_score),
            ("recoveryRate", self.recovery_rate),
        ];
        for (name, band) in falling {
            if band.critical > band.warning {
                return Err(StressLabError::invalid_config(format!(
                    "{name}: critical threshold {} is above warning {}",
                    band.critical, band.warning
                )));
            }
        }
        Ok(())
    }
}

fn rising(metric: AlertMetric, value: f64, band: Band, label: &str) -> Option<Alert> {
    let (level, threshold) = if value >= band.critical {
        (AlertLevel::Critical, band.critical)
    } else if value >= band.warning {
        (AlertLevel::Warning, band.warning)
    } else {
        return None;
    };
    Some(Alert {
        metric,
        level,
        value,
        threshold,
        message: format!("{label} {value:.3} reached the {level} threshold {threshold:.3}"),
    })
}

fn falling(metric: AlertMetric, value: f64, band: Band, label: &str) -> Option<Alert> {
    let (level, threshold) = if value < band.critical {
        (AlertLevel::Critical, band.critical)
    } else if value < band.warning {
        (AlertLevel::Warning, band.warning)
    } else {
        return None;
    };
    Some(Alert {
        metric,
        level,
        value,
        threshold,
        message: format!("{label} {value:.3} is below the {level} threshold {threshold:.3}"),
    })
}

/// Evaluate every metric of `digest`. New runtime crashes come from the
/// attached baseline comparison when present, else from the run's own
/// runtime-crash count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn check_alerts(digest: &Digest, thresholds: &AlertThresholds) -> Vec<Alert> {
    let s = &digest.summary;
    let new_runtime_crashes = digest
        .baseline
        .as_ref()
        .map_or(s.runtime_crashes, |cmp| cmp.new_runtime_crashes);
    [
        rising(
            AlertMetric::CrashRate,
            digest.crash_rate(),
            thresholds.crash_rate,
            "crash rate",
        ),
        rising(
            AlertMetric::NewRuntimeCrashes,
            new_runtime_crashes as f64,
            thresholds.new_runtime_crashes,
            "new runtime crashes",
        ),
        rising(
            AlertMetric::GateRejectionRate,
            s.gate_rejection_rate,
            thresholds.gate_rejection_rate,
            "gate rejection rate",
        ),
        falling(
            AlertMetric::DeterminismScore,
            s.determinism_score,
            thresholds.determinism_score,
            "determinism score",
        ),
        falling(
            AlertMetric::RecoveryRate,
            s.recovery_rate,
            thresholds.recovery_rate,
            "recovery rate",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}
