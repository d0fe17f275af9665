//! JSON artifacts: the telemetry export and shared read/write helpers.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stresslab_error::{Result, StressLabError};
use tracing::info;

use crate::TELEMETRY_VERSION;
use crate::runner::Telemetry;
use crate::stats::{AggregateStats, compute_aggregate_stats};

/// Serialize `value` as pretty JSON (with a trailing newline) into `path`.
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    fs::write(path, json).map_err(|source| StressLabError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "wrote json artifact");
    Ok(())
}

/// Read and deserialize a JSON file.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| StressLabError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Every telemetry record of a run plus its aggregate statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryExport {
    pub version: u32,
    /// RFC 3339 UTC timestamp.
    pub generated_at: String,
    pub stats: AggregateStats,
    pub results: Vec<Telemetry>,
}

impl TelemetryExport {
    /// Snapshot `results`, recomputing statistics from them.
    #[must_use]
    pub fn new(results: &[Telemetry]) -> Self {
        Self {
            version: TELEMETRY_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            stats: compute_aggregate_stats(results),
            results: results.to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_file(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClass;
    use crate::runner::PipelinePhase;
    use crate::testutil::telemetry;

    #[test]
    fn export_round_trips_through_a_file() {
        let results = vec![
            telemetry(1, None, 12.0),
            telemetry(2, Some((ErrorClass::DataGate, PipelinePhase::BuildPpt)), 8.0),
        ];
        let export = TelemetryExport::new(&results);
        assert_eq!(export.stats.failed, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        export.write(&path).unwrap();
        let loaded = TelemetryExport::load(&path).unwrap();
        assert_eq!(loaded, export);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let export = TelemetryExport::new(&[telemetry(3, None, 1.0)]);
        let value: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert!(value.get("generatedAt").is_some());
        assert_eq!(value["version"], TELEMETRY_VERSION);
        assert_eq!(value["results"][0]["seed"], 3);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TelemetryExport::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StressLabError::ReadFailed { .. }));
    }

    #[test]
    fn unwritable_path_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out.json");
        let err = write_json_file(&path, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StressLabError::WriteFailed { .. }));
    }
}
