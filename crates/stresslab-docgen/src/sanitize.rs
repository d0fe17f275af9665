//! Transient-key sanitizer shared by the deck builder and the mutation engine.
//!
//! Upstream synthesis stages leave bookkeeping keys in the payload
//! (`section_3`, `_wasArray`, `marketDeepenNotes`, ...). They carry no slide
//! content; the builder drops them before validation, and the stress lab's
//! `transient-keys` mutation injects keys that must all be recognized here.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static TRANSIENT_KEY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^section_\d+$",
        r"^_was(Array|Object|String)$",
        r"Deepen",
        r"^_synthesis[A-Z]\w*$",
        r"^_debug\w*$",
        r"^finalReviewGap\w*$",
        r"^_meta$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("transient key pattern is valid"))
    .collect()
});

/// Whether `key` is upstream bookkeeping that the builder may safely ignore.
#[must_use]
pub fn is_transient_key(key: &str) -> bool {
    TRANSIENT_KEY_PATTERNS.iter().any(|re| re.is_match(key))
}

/// Remove every transient key from `value`, recursively. Returns the number
/// of keys removed.
pub fn strip_transient_keys(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_transient_key(key));
            let mut removed = before - map.len();
            for child in map.values_mut() {
                removed += strip_transient_keys(child);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(strip_transient_keys).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn recognizes_known_noise_keys() {
        for key in [
            "section_0",
            "section_17",
            "_wasArray",
            "_wasObject",
            "marketDeepenNotes",
            "competitorDeepen2",
            "_synthesisMeta",
            "_debugTrace",
            "finalReviewGap3",
            "_meta",
        ] {
            assert!(is_transient_key(key), "{key} should be transient");
        }
    }

    #[test]
    fn keeps_content_keys() {
        for key in [
            "section",
            "sections_1",
            "executiveSummary",
            "chartData",
            "wasArray",
            "meta",
            "finalReview",
        ] {
            assert!(!is_transient_key(key), "{key} should be kept");
        }
    }

    #[test]
    fn strip_is_recursive() {
        let mut value = json!({
            "title": "Market",
            "section_1": {"x": 1},
            "nested": [{"_wasArray": true, "keep": 1}, {"deep": {"marketDeepen": 2}}]
        });
        let removed = strip_transient_keys(&mut value);
        assert_eq!(removed, 3);
        assert_eq!(
            value,
            json!({"title": "Market", "nested": [{"keep": 1}, {"deep": {}}]})
        );
    }
}
