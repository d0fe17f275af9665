//! Field-budget content compactor.

use serde_json::Value;
use tracing::debug;

use crate::{CompactionEntry, ContentSizeChecker, DocgenError, SizeCheckOptions, SizeCheckOutcome};

/// Default per-field budget, in chars.
pub const DEFAULT_MAX_FIELD_CHARS: usize = 4_000;

/// Default budget for all text in the country analysis, in chars.
pub const DEFAULT_MAX_TOTAL_CHARS: usize = 600_000;

/// Truncates country-analysis strings that exceed a per-field budget and
/// rejects payloads whose total text is over a hard budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBudgetCompactor {
    pub max_field_chars: usize,
    pub max_total_chars: usize,
}

impl Default for FieldBudgetCompactor {
    fn default() -> Self {
        Self {
            max_field_chars: DEFAULT_MAX_FIELD_CHARS,
            max_total_chars: DEFAULT_MAX_TOTAL_CHARS,
        }
    }
}

impl FieldBudgetCompactor {
    fn compact(
        &self,
        value: &mut Value,
        pointer: &mut String,
        apply: bool,
        log: &mut Vec<CompactionEntry>,
    ) -> usize {
        match value {
            Value::String(text) => {
                let chars = text.chars().count();
                if chars <= self.max_field_chars {
                    return chars;
                }
                log.push(CompactionEntry {
                    path: pointer.clone(),
                    original_chars: chars,
                    compacted_chars: self.max_field_chars,
                });
                if apply {
                    *text = text.chars().take(self.max_field_chars).collect();
                    self.max_field_chars
                } else {
                    chars
                }
            }
            Value::Array(items) => {
                let mut total = 0;
                for (index, item) in items.iter_mut().enumerate() {
                    let restore = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&index.to_string());
                    total += self.compact(item, pointer, apply, log);
                    pointer.truncate(restore);
                }
                total
            }
            Value::Object(map) => {
                let mut total = 0;
                for (key, child) in map.iter_mut() {
                    let restore = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                    total += self.compact(child, pointer, apply, log);
                    pointer.truncate(restore);
                }
                total
            }
            _ => 0,
        }
    }
}

impl ContentSizeChecker for FieldBudgetCompactor {
    fn check_content_size(
        &self,
        country_analysis: &Value,
        options: SizeCheckOptions,
    ) -> Result<SizeCheckOutcome, DocgenError> {
        let Value::Object(_) = country_analysis else {
            return Err(DocgenError::ContentSize(format!(
                "countryAnalysis must be an object, found {}",
                kind_of(country_analysis)
            )));
        };

        let mut payload = country_analysis.clone();
        let mut compaction_log = Vec::new();
        let mut pointer = String::new();
        let total = self.compact(&mut payload, &mut pointer, !options.dry_run, &mut compaction_log);

        if !options.dry_run && total > self.max_total_chars {
            return Err(DocgenError::ContentSize(format!(
                "countryAnalysis holds {total} chars of text after compaction (budget {})",
                self.max_total_chars
            )));
        }

        debug!(
            compacted = compaction_log.len(),
            total_chars = total,
            dry_run = options.dry_run,
            "content size check"
        );
        Ok(SizeCheckOutcome {
            payload,
            compaction_log,
        })
    }
}

/// Short JSON type name for diagnostics.
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn small() -> FieldBudgetCompactor {
        FieldBudgetCompactor {
            max_field_chars: 10,
            max_total_chars: 40,
        }
    }

    #[test]
    fn truncates_long_fields_and_logs_them() {
        let input = json!({"a": "short", "b": {"c": ["x".repeat(25)]}});
        let outcome = small()
            .check_content_size(&input, SizeCheckOptions { dry_run: false })
            .unwrap();
        assert_eq!(outcome.payload["b"]["c"][0], json!("x".repeat(10)));
        assert_eq!(outcome.compaction_log.len(), 1);
        assert_eq!(outcome.compaction_log[0].path, "/b/c/0");
        assert_eq!(outcome.compaction_log[0].original_chars, 25);
    }

    #[test]
    fn dry_run_leaves_payload_untouched() {
        let input = json!({"a": "y".repeat(30)});
        let outcome = small()
            .check_content_size(&input, SizeCheckOptions { dry_run: true })
            .unwrap();
        assert_eq!(outcome.payload, input);
        assert_eq!(outcome.compaction_log.len(), 1);
    }

    #[test]
    fn rejects_total_over_budget() {
        let input = json!({"a": "1234567890", "b": "1234567890", "c": "1234567890", "d": "1234567890", "e": "1"});
        let err = small()
            .check_content_size(&input, SizeCheckOptions::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Content size gate"));
    }

    #[test]
    fn rejects_non_object() {
        let err = small()
            .check_content_size(&Value::Null, SizeCheckOptions::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Content size gate: countryAnalysis must be an object, found null"
        );
    }

    #[test]
    fn escapes_pointer_segments() {
        let input = json!({"a/b": "z".repeat(11)});
        let outcome = small()
            .check_content_size(&input, SizeCheckOptions::default())
            .unwrap();
        assert_eq!(outcome.compaction_log[0].path, "/a~1b");
    }
}
