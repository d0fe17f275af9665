//! Failure taxonomy: runtime crash vs data gate.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse classification of a failed seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// An implementation bug: type errors, missing values, stack overflow,
    /// panics.
    RuntimeCrash,
    /// An intentional rejection by the builder's content-quality gates.
    DataGate,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuntimeCrash => "runtime-crash",
            Self::DataGate => "data-gate",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RUNTIME_CRASH_LITERALS: &[&str] = &[
    "is not a function",
    "Cannot read propert",
    "Cannot set propert",
    "is not iterable",
    "Maximum call stack",
    "panicked",
    "called `Option::unwrap()`",
    "called `Result::unwrap()`",
    "index out of bounds",
    "with overflow",
    "stack overflow",
];

static RUNTIME_CRASH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    RUNTIME_CRASH_LITERALS
        .iter()
        .map(|lit| Regex::new(&regex::escape(lit)).expect("escaped literal is a valid pattern"))
        .collect()
});

static DATA_GATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\[PPT\] Data gate failed",
        r"exceeds? \d+ chars",
        r"Content size gate",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("data gate pattern is valid"))
    .collect()
});

/// Classify a raw failure message.
///
/// Runtime-crash patterns are checked first, then data-gate patterns; the
/// first match wins. A message matching neither list is a data gate if it
/// carries the `[PPT` prefix and a runtime crash otherwise, so unrecognized
/// failures are never counted as expected rejections.
#[must_use]
pub fn classify_error(message: &str) -> ErrorClass {
    if RUNTIME_CRASH_PATTERNS.iter().any(|re| re.is_match(message)) {
        return ErrorClass::RuntimeCrash;
    }
    if DATA_GATE_PATTERNS.iter().any(|re| re.is_match(message)) || message.contains("[PPT") {
        return ErrorClass::DataGate;
    }
    ErrorClass::RuntimeCrash
}
