//! Mutation engine: named payload corruption classes.
//!
//! Each class is a plain function that corrupts an exclusively-owned payload
//! clone in place, drawing randomness from the seed's mutation-apply stream.
//! Which classes a seed gets, and in which order, is drawn from a separate
//! mutation-selection stream so that neither stream can starve the other.
//!
//! Appliers locate targets with JSON pointers collected from the current
//! tree. A class that finds no target (for example because an earlier class
//! already deleted it) skips silently; appliers never panic.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::trace;

use crate::payload::TABLE_SECTION;
use crate::rng::{RngPurpose, SeededRng};

/// Signature shared by every mutation applier. The payload is mutated in
/// place.
pub type MutationFn = fn(&mut Value, &mut SeededRng);

// ── MutationClass ───────────────────────────────────────────────────────

/// A named category of deliberate payload corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationClass {
    TransientKeys,
    SchemaCorruption,
    GeometryOverride,
    LongText,
    TableDensity,
    ChartAnomalies,
    EmptyNull,
}

impl MutationClass {
    /// Every class, in canonical registry order.
    pub const ALL: [Self; 7] = [
        Self::TransientKeys,
        Self::SchemaCorruption,
        Self::GeometryOverride,
        Self::LongText,
        Self::TableDensity,
        Self::ChartAnomalies,
        Self::EmptyNull,
    ];

    /// Classes used by quick smoke runs.
    pub const QUICK: [Self; 3] = [Self::TransientKeys, Self::SchemaCorruption, Self::EmptyNull];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientKeys => "transient-keys",
            Self::SchemaCorruption => "schema-corruption",
            Self::GeometryOverride => "geometry-override",
            Self::LongText => "long-text",
            Self::TableDensity => "table-density",
            Self::ChartAnomalies => "chart-anomalies",
            Self::EmptyNull => "empty-null",
        }
    }

    /// The applier implementing this class.
    #[must_use]
    pub fn applier(self) -> MutationFn {
        match self {
            Self::TransientKeys => apply_transient_keys,
            Self::SchemaCorruption => apply_schema_corruption,
            Self::GeometryOverride => apply_geometry_override,
            Self::LongText => apply_long_text,
            Self::TableDensity => apply_table_density,
            Self::ChartAnomalies => apply_chart_anomalies,
            Self::EmptyNull => apply_empty_null,
        }
    }
}

impl fmt::Display for MutationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| format!("unknown mutation class '{s}'"))
    }
}

// ── MutationRegistry ────────────────────────────────────────────────────

/// The outcome of mutating a base payload for one seed.
#[derive(Debug, Clone, PartialEq)]
pub struct MutatedPayload {
    pub payload: Value,
    /// Classes applied, in application order.
    pub classes: Vec<MutationClass>,
}

/// An explicit, constructed set of mutation classes.
///
/// Registries are plain values: a full registry and a reduced smoke-run
/// registry can coexist in the same process.
#[derive(Debug, Clone)]
pub struct MutationRegistry {
    entries: Vec<(MutationClass, MutationFn)>,
}

impl Default for MutationRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl MutationRegistry {
    /// All seven classes.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_classes(&MutationClass::ALL)
    }

    /// The reduced smoke-run set.
    #[must_use]
    pub fn quick() -> Self {
        Self::with_classes(&MutationClass::QUICK)
    }

    /// A registry holding `classes` in the given order; duplicates are
    /// dropped.
    #[must_use]
    pub fn with_classes(classes: &[MutationClass]) -> Self {
        let mut entries: Vec<(MutationClass, MutationFn)> = Vec::with_capacity(classes.len());
        for &class in classes {
            if !entries.iter().any(|(existing, _)| *existing == class) {
                entries.push((class, class.applier()));
            }
        }
        Self { entries }
    }

    /// Whether this registry holds exactly the quick set, in quick order.
    #[must_use]
    pub fn is_quick(&self) -> bool {
        self.classes() == MutationClass::QUICK
    }

    #[must_use]
    pub fn classes(&self) -> Vec<MutationClass> {
        self.entries.iter().map(|(class, _)| *class).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn applier(&self, class: MutationClass) -> Option<MutationFn> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == class)
            .map(|(_, apply)| *apply)
    }

    /// Deterministically choose 2–4 classes for `seed`: draw the count,
    /// Fisher–Yates shuffle the registry order, take the prefix.
    #[must_use]
    pub fn select_mutations_for_seed(&self, seed: u32) -> Vec<MutationClass> {
        let mut rng = SeededRng::derive(seed, RngPurpose::MutationSelection);
        let count = rng.int_between(2, 4).min(self.len());
        let mut classes = self.classes();
        rng.shuffle(&mut classes);
        classes.truncate(count);
        classes
    }

    /// Clone `base` and apply the seed's selected classes in selection
    /// order.
    #[must_use]
    pub fn mutate_payload(&self, base: &Value, seed: u32) -> MutatedPayload {
        let classes = self.select_mutations_for_seed(seed);
        let mut payload = base.clone();
        let mut rng = SeededRng::derive(seed, RngPurpose::MutationApply);
        for &class in &classes {
            if let Some(apply) = self.applier(class) {
                apply(&mut payload, &mut rng);
                trace!(seed, class = %class, "applied mutation");
            }
        }
        MutatedPayload { payload, classes }
    }
}

// ── Pointer helpers ─────────────────────────────────────────────────────

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn walk(value: &Value, pointer: &mut String, keep: &dyn Fn(&Value) -> bool, out: &mut Vec<String>) {
    if !pointer.is_empty() && keep(value) {
        out.push(pointer.clone());
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let restore = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_token(key));
                walk(child, pointer, keep, out);
                pointer.truncate(restore);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let restore = pointer.len();
                pointer.push('/');
                pointer.push_str(&index.to_string());
                walk(child, pointer, keep, out);
                pointer.truncate(restore);
            }
        }
        _ => {}
    }
}

/// Pointers (root excluded) to every node matching `keep`, in document
/// order.
fn collect_pointers(root: &Value, keep: impl Fn(&Value) -> bool) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, &mut String::new(), &keep, &mut out);
    out
}

fn pick_pointer(root: &Value, rng: &mut SeededRng, keep: impl Fn(&Value) -> bool) -> Option<String> {
    let pointers = collect_pointers(root, keep);
    rng.pick(&pointers).cloned()
}

fn set_at(root: &mut Value, pointer: &str, value: Value) -> bool {
    match root.pointer_mut(pointer) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

fn remove_at(root: &mut Value, pointer: &str) -> bool {
    let Some((parent, last)) = pointer.rsplit_once('/') else {
        return false;
    };
    let key = last.replace("~1", "/").replace("~0", "~");
    match root.pointer_mut(parent) {
        Some(Value::Object(map)) => map.remove(&key).is_some(),
        Some(Value::Array(items)) => match key.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items.remove(index);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn random_text(rng: &mut SeededRng, len: usize) -> String {
    (&mut *rng)
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn market_sections(root: &Value, has: &str) -> Vec<String> {
    let Some(Value::Object(market)) = root.pointer("/countryAnalysis/market") else {
        return Vec::new();
    };
    market
        .iter()
        .filter(|(_, section)| section.get(has).is_some_and(Value::is_object))
        .map(|(key, _)| format!("/countryAnalysis/market/{}", escape_token(key)))
        .collect()
}

// ── transient-keys ──────────────────────────────────────────────────────

fn transient_key(rng: &mut SeededRng) -> String {
    const WAS: &[&str] = &["_wasArray", "_wasObject", "_wasString"];
    const DEEPEN_PREFIX: &[&str] = &["market", "policy", "competitor"];
    const DEEPEN_SUFFIX: &[&str] = &["Notes", "Pass", "Draft"];
    const SYNTHESIS: &[&str] = &["_synthesisMeta", "_synthesisTrace"];
    match rng.int_between(0, 5) {
        0 => format!("section_{}", rng.int_between(0, 40)),
        1 => WAS[rng.index(WAS.len())].to_owned(),
        2 => {
            let prefix = DEEPEN_PREFIX[rng.index(DEEPEN_PREFIX.len())];
            let suffix = DEEPEN_SUFFIX[rng.index(DEEPEN_SUFFIX.len())];
            format!("{prefix}Deepen{suffix}")
        }
        3 => SYNTHESIS[rng.index(SYNTHESIS.len())].to_owned(),
        4 => format!("finalReviewGap{}", rng.int_between(1, 9)),
        _ => "_debugTrace".to_owned(),
    }
}

fn transient_value(rng: &mut SeededRng) -> Value {
    match rng.int_between(0, 4) {
        0 => Value::Null,
        1 => Value::Bool(true),
        2 => json!("stale draft text"),
        3 => json!({ "_meta": format!("synthesis pass {}", rng.int_between(1, 3)) }),
        _ => json!([1, 2, 3]),
    }
}

/// Inject 3–10 upstream bookkeeping keys at random object nodes.
pub fn apply_transient_keys(payload: &mut Value, rng: &mut SeededRng) {
    let count = rng.int_between(3, 10);
    for _ in 0..count {
        let Some(target) = pick_pointer(payload, rng, Value::is_object) else {
            return;
        };
        let key = transient_key(rng);
        let value = transient_value(rng);
        if let Some(Value::Object(map)) = payload.pointer_mut(&target) {
            map.insert(key, value);
        }
    }
}

// ── schema-corruption ───────────────────────────────────────────────────

fn mismatched_value(rng: &mut SeededRng) -> Value {
    match rng.int_between(0, 5) {
        0 => json!([]),
        1 => json!({}),
        2 => Value::Null,
        3 => Value::Bool(true),
        4 => json!(42),
        _ => json!(""),
    }
}

/// Replace 2–7 string leaves with type-mismatched values, stringify 1–3
/// arrays, and add 2–5 unexpected fields.
pub fn apply_schema_corruption(payload: &mut Value, rng: &mut SeededRng) {
    for _ in 0..rng.int_between(2, 7) {
        let Some(target) = pick_pointer(payload, rng, Value::is_string) else {
            break;
        };
        let replacement = mismatched_value(rng);
        set_at(payload, &target, replacement);
    }

    for _ in 0..rng.int_between(1, 3) {
        let Some(target) = pick_pointer(payload, rng, Value::is_array) else {
            break;
        };
        if let Some(slot) = payload.pointer_mut(&target) {
            let text = slot.to_string();
            *slot = Value::String(text);
        }
    }

    for _ in 0..rng.int_between(2, 5) {
        let Some(target) = pick_pointer(payload, rng, Value::is_object) else {
            break;
        };
        let key = format!("unexpectedField_{}", rng.int_between(0, 999));
        let value = mismatched_value(rng);
        if let Some(Value::Object(map)) = payload.pointer_mut(&target) {
            map.insert(key, value);
        }
    }
}

// ── geometry-override ───────────────────────────────────────────────────

fn cell_text(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn chart_to_table(chart: &Map<String, Value>) -> Value {
    let categories = chart
        .get("categories")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let series = chart
        .get("series")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut headers = vec![json!("Category")];
    headers.extend(
        series
            .iter()
            .map(|s| cell_text(s.get("name").unwrap_or(&Value::Null))),
    );
    let rows: Vec<Value> = categories
        .iter()
        .enumerate()
        .map(|(i, category)| {
            let mut row = vec![cell_text(category)];
            row.extend(series.iter().map(|s| {
                cell_text(
                    s.get("values")
                        .and_then(|v| v.get(i))
                        .unwrap_or(&Value::Null),
                )
            }));
            Value::Array(row)
        })
        .collect();
    json!({ "headers": headers, "rows": rows })
}

fn table_to_chart(table: &Map<String, Value>) -> Value {
    let headers = table
        .get("headers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let rows = table
        .get("rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let categories: Vec<Value> = rows
        .iter()
        .map(|row| cell_text(row.get(0).unwrap_or(&Value::Null)))
        .collect();
    let series: Vec<Value> = (1..headers.len())
        .map(|col| {
            let values: Vec<f64> = rows
                .iter()
                .map(|row| {
                    row.get(col)
                        .and_then(|cell| match cell {
                            Value::Number(n) => n.as_f64(),
                            Value::String(s) => s.trim().parse::<f64>().ok(),
                            _ => None,
                        })
                        .unwrap_or(0.0)
                })
                .collect();
            json!({ "name": cell_text(&headers[col]), "values": values })
        })
        .collect();
    json!({ "categories": categories, "unit": "derived", "series": series })
}

/// Give chart sections table data and table sections chart data; each
/// section loses its natural shape with 50% probability.
pub fn apply_geometry_override(payload: &mut Value, rng: &mut SeededRng) {
    let Some(Value::Object(market)) = payload.pointer_mut("/countryAnalysis/market") else {
        return;
    };
    for section in market.values_mut() {
        let Value::Object(section) = section else {
            continue;
        };
        let chart = section.get("chartData").and_then(Value::as_object).cloned();
        let table = section.get("tableData").and_then(Value::as_object).cloned();
        match (chart, table) {
            (Some(chart), None) => {
                section.insert("tableData".to_owned(), chart_to_table(&chart));
                if rng.chance(0.5) {
                    section.remove("chartData");
                }
            }
            (None, Some(table)) => {
                section.insert("chartData".to_owned(), table_to_chart(&table));
                if rng.chance(0.5) {
                    section.remove("tableData");
                }
            }
            _ => {}
        }
    }
}

// ── long-text ───────────────────────────────────────────────────────────

/// Narrative fields that long-text may inflate.
pub const LONG_TEXT_TARGETS: &[&str] = &[
    "/synthesis/executiveSummary/0",
    "/synthesis/keyInsights/0/implication",
    "/synthesis/entryStrategy/recommendation",
    "/countryAnalysis/summary/overview",
    "/countryAnalysis/policy/nationalPolicy/overview",
    "/countryAnalysis/market/marketSizeAndGrowth/keyInsight",
    "/scope/clientContext",
];

const LONG_TEXT_LENGTHS: [usize; 3] = [5_000, 10_000, 15_000];

/// Inflate 1–5 narrative fields to 5k/10k/15k random characters.
pub fn apply_long_text(payload: &mut Value, rng: &mut SeededRng) {
    let count = rng.int_between(1, 5);
    let mut targets = LONG_TEXT_TARGETS.to_vec();
    rng.shuffle(&mut targets);
    for target in targets.into_iter().take(count) {
        let len = LONG_TEXT_LENGTHS[rng.index(LONG_TEXT_LENGTHS.len())];
        if payload.pointer(target).is_some() {
            let text = random_text(rng, len);
            set_at(payload, target, Value::String(text));
        }
    }
}

// ── table-density ───────────────────────────────────────────────────────

fn dense_table(rng: &mut SeededRng) -> Value {
    let (rows, cols, cell_len) = match rng.int_between(0, 2) {
        0 => (rng.int_between(50, 70), 3, 0),
        1 => (5, rng.int_between(20, 24), 0),
        _ => (4, 3, rng.int_between(1_000, 3_000)),
    };
    let headers: Vec<Value> = (0..cols).map(|c| json!(format!("Column {}", c + 1))).collect();
    let rows: Vec<Value> = (0..rows)
        .map(|r| {
            let cells: Vec<Value> = (0..cols)
                .map(|c| {
                    if cell_len > 0 {
                        Value::String(random_text(rng, cell_len))
                    } else {
                        json!(format!("r{r}c{c}"))
                    }
                })
                .collect();
            Value::Array(cells)
        })
        .collect();
    json!({ "headers": headers, "rows": rows })
}

/// Replace one market section's table with 50–70 rows, 20–24 columns, or
/// 1,000–3,000-character cells.
pub fn apply_table_density(payload: &mut Value, rng: &mut SeededRng) {
    let mut candidates = market_sections(payload, "tableData");
    if candidates.is_empty() {
        let fallback = format!("/countryAnalysis/market/{TABLE_SECTION}");
        if payload.pointer(&fallback).is_some_and(Value::is_object) {
            candidates.push(fallback);
        }
    }
    let Some(target) = rng.pick(&candidates).cloned() else {
        return;
    };
    let table = dense_table(rng);
    if let Some(Value::Object(section)) = payload.pointer_mut(&target) {
        section.insert("tableData".to_owned(), table);
    }
}

// ── chart-anomalies ─────────────────────────────────────────────────────

fn series_values_mut(chart: &mut Value) -> Vec<&mut Vec<Value>> {
    let Some(Value::Array(series)) = chart.get_mut("series") else {
        return Vec::new();
    };
    series
        .iter_mut()
        .filter_map(|s| match s.get_mut("values") {
            Some(Value::Array(values)) => Some(values),
            _ => None,
        })
        .collect()
}

/// Zero a chart, force negative values into a stacked chart, inject
/// non-numeric values, or replace the series list with a non-array.
pub fn apply_chart_anomalies(payload: &mut Value, rng: &mut SeededRng) {
    let candidates = market_sections(payload, "chartData");
    let Some(target) = rng.pick(&candidates).cloned() else {
        return;
    };
    let mode = rng.int_between(0, 3);
    let Some(chart) = payload.pointer_mut(&format!("{target}/chartData")) else {
        return;
    };
    match mode {
        0 => {
            for values in series_values_mut(chart) {
                values.iter_mut().for_each(|v| *v = json!(0));
            }
        }
        1 => {
            if let Value::Object(map) = chart {
                map.insert("stacked".to_owned(), Value::Bool(true));
            }
            let mut flipped = false;
            for values in series_values_mut(chart) {
                for value in values.iter_mut() {
                    if let Some(n) = value.as_f64() {
                        if !flipped || rng.chance(0.5) {
                            *value = json!(-n.abs() - 1.0);
                            flipped = true;
                        }
                    }
                }
            }
        }
        2 => {
            const JUNK: [&str; 3] = ["n/a", "12%", "TBD"];
            let mut series = series_values_mut(chart);
            for _ in 0..rng.int_between(1, 3) {
                let at = rng.index(series.len());
                let Some(values) = series.get_mut(at) else {
                    break;
                };
                if values.is_empty() {
                    continue;
                }
                let slot = rng.index(values.len());
                values[slot] = match rng.int_between(0, 3) {
                    3 => Value::Null,
                    junk => json!(JUNK[junk]),
                };
            }
        }
        _ => {
            let replacement = match rng.int_between(0, 3) {
                0 => json!("series"),
                1 => json!({}),
                2 => Value::Null,
                _ => json!(0),
            };
            if let Value::Object(map) = chart {
                map.insert("series".to_owned(), replacement);
            }
        }
    }
}

// ── empty-null ──────────────────────────────────────────────────────────

/// Sections empty-null may delete or null out.
pub const NAMED_SECTIONS: &[&str] = &[
    "/synthesis/competitors",
    "/synthesis/summaryRatings",
    "/synthesis/nextSteps",
    "/countryAnalysis/policy/investmentRestrictions",
    "/countryAnalysis/competitors",
    "/countryAnalysis/summary",
    "/scope/targetMarkets",
];

/// Delete or null named sections (70% each), inject nulls into 1–3 arrays,
/// and replace 1–2 populated objects with `{}`.
pub fn apply_empty_null(payload: &mut Value, rng: &mut SeededRng) {
    for section in NAMED_SECTIONS {
        if !rng.chance(0.7) {
            continue;
        }
        if rng.chance(0.5) {
            remove_at(payload, section);
        } else {
            set_at(payload, section, Value::Null);
        }
    }

    for _ in 0..rng.int_between(1, 3) {
        let Some(target) = pick_pointer(payload, rng, Value::is_array) else {
            break;
        };
        if let Some(Value::Array(items)) = payload.pointer_mut(&target) {
            let at = rng.int_between(0, items.len());
            items.insert(at, Value::Null);
        }
    }

    for _ in 0..rng.int_between(1, 2) {
        let Some(target) = pick_pointer(payload, rng, |v| v.as_object().is_some_and(|m| !m.is_empty()))
        else {
            break;
        };
        set_at(payload, &target, json!({}));
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use stresslab_docgen::is_transient_key;

    use super::*;
    use crate::payload::build_base_payload;

    fn apply(class: MutationClass, seed: u32) -> Value {
        let mut payload = build_base_payload(seed);
        let mut rng = SeededRng::derive(seed, RngPurpose::MutationApply);
        (class.applier())(&mut payload, &mut rng);
        payload
    }

    fn keys(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    out.push(k.clone());
                    keys(v, out);
                }
            }
            Value::Array(items) => items.iter().for_each(|v| keys(v, out)),
            _ => {}
        }
    }

    #[test]
    fn class_names_round_trip_through_from_str() {
        for class in MutationClass::ALL {
            assert_eq!(class.as_str().parse::<MutationClass>(), Ok(class));
            assert_eq!(
                serde_json::to_value(class).unwrap(),
                json!(class.as_str())
            );
        }
        assert!("bit-flip".parse::<MutationClass>().is_err());
    }

    #[test]
    fn selection_is_deterministic_and_sized() {
        let registry = MutationRegistry::standard();
        for seed in 1..=200 {
            let first = registry.select_mutations_for_seed(seed);
            assert_eq!(first, registry.select_mutations_for_seed(seed));
            assert!((2..=4).contains(&first.len()), "seed {seed}: {first:?}");
            let mut dedup = first.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), first.len());
        }
    }

    #[test]
    fn selection_is_clamped_to_registry_size() {
        let registry = MutationRegistry::with_classes(&[MutationClass::LongText]);
        assert_eq!(
            registry.select_mutations_for_seed(9),
            vec![MutationClass::LongText]
        );
        assert!(MutationRegistry::with_classes(&[]).select_mutations_for_seed(9).is_empty());
    }

    #[test]
    fn quick_registry_only_selects_quick_classes() {
        let registry = MutationRegistry::quick();
        assert_eq!(registry.len(), 3);
        assert!(registry.is_quick());
        assert!(!MutationRegistry::standard().is_quick());
        for seed in 1..=50 {
            for class in registry.select_mutations_for_seed(seed) {
                assert!(MutationClass::QUICK.contains(&class));
            }
        }
    }

    #[test]
    fn with_classes_drops_duplicates() {
        let registry = MutationRegistry::with_classes(&[
            MutationClass::EmptyNull,
            MutationClass::EmptyNull,
            MutationClass::LongText,
        ]);
        assert_eq!(
            registry.classes(),
            vec![MutationClass::EmptyNull, MutationClass::LongText]
        );
        assert!(registry.applier(MutationClass::ChartAnomalies).is_none());
    }

    #[test]
    fn mutate_payload_is_deterministic_and_leaves_base_untouched() {
        let registry = MutationRegistry::standard();
        let base = build_base_payload(42);
        let snapshot = base.clone();
        let a = registry.mutate_payload(&base, 42);
        let b = registry.mutate_payload(&base, 42);
        assert_eq!(a, b);
        assert_eq!(base, snapshot);
        assert_eq!(a.classes, registry.select_mutations_for_seed(42));
        assert_ne!(a.payload, base);
    }

    #[test]
    fn transient_keys_are_recognized_by_the_sanitizer() {
        for seed in 1..=30 {
            let base = build_base_payload(seed);
            let mut base_keys = Vec::new();
            keys(&base, &mut base_keys);
            let mut mutated_keys = Vec::new();
            keys(&apply(MutationClass::TransientKeys, seed), &mut mutated_keys);
            for key in mutated_keys.iter().filter(|k| !base_keys.contains(k)) {
                assert!(is_transient_key(key), "seed {seed}: {key} not transient");
            }
            assert!(mutated_keys.len() > base_keys.len());
        }
    }

    #[test]
    fn long_text_inflates_known_fields() {
        for seed in 1..=20 {
            let payload = apply(MutationClass::LongText, seed);
            let inflated = LONG_TEXT_TARGETS
                .iter()
                .filter_map(|p| payload.pointer(p).and_then(Value::as_str))
                .filter(|s| LONG_TEXT_LENGTHS.contains(&s.chars().count()))
                .count();
            assert!((1..=5).contains(&inflated), "seed {seed}: {inflated}");
        }
    }

    #[test]
    fn table_density_exceeds_a_limit() {
        for seed in 1..=20 {
            let payload = apply(MutationClass::TableDensity, seed);
            let table = &payload["countryAnalysis"]["market"][TABLE_SECTION]["tableData"];
            let rows = table["rows"].as_array().map_or(0, Vec::len);
            let cols = table["headers"].as_array().map_or(0, Vec::len);
            let widest_cell = table["rows"]
                .as_array()
                .into_iter()
                .flatten()
                .flat_map(|row| row.as_array().into_iter().flatten())
                .filter_map(Value::as_str)
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0);
            assert!(
                (50..=70).contains(&rows) || (20..=24).contains(&cols) || widest_cell >= 1_000,
                "seed {seed}: rows={rows} cols={cols} cell={widest_cell}"
            );
        }
    }

    #[test]
    fn geometry_override_gives_every_section_a_foreign_shape() {
        let payload = apply(MutationClass::GeometryOverride, 5);
        let market = payload["countryAnalysis"]["market"].as_object().unwrap();
        for (key, section) in market {
            let has_chart = section.get("chartData").is_some();
            let has_table = section.get("tableData").is_some();
            assert!(has_chart || has_table, "{key} lost both shapes");
        }
        assert!(market[TABLE_SECTION].get("chartData").is_some());
        assert!(market["segmentMix"].get("tableData").is_some());
    }

    #[test]
    fn remove_at_handles_objects_arrays_and_misses() {
        let mut value = json!({"a": {"b/c": 1}, "list": [1, 2, 3]});
        assert!(remove_at(&mut value, "/a/b~1c"));
        assert!(remove_at(&mut value, "/list/1"));
        assert!(!remove_at(&mut value, "/list/9"));
        assert!(!remove_at(&mut value, "/missing/x"));
        assert!(!remove_at(&mut value, ""));
        assert_eq!(value, json!({"a": {}, "list": [1, 3]}));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn every_class_survives_any_prior_corruption(seed in 1u32..50_000) {
            // Apply all seven classes in turn, twice over: later classes see
            // trees already corrupted by earlier ones.
            let mut payload = build_base_payload(seed);
            let mut rng = SeededRng::derive(seed, RngPurpose::MutationApply);
            for class in MutationClass::ALL.iter().chain(MutationClass::ALL.iter()) {
                (class.applier())(&mut payload, &mut rng);
            }
            prop_assert!(serde_json::to_string(&payload).is_ok());
        }

        #[test]
        fn mutation_is_reproducible(seed in 1u32..50_000) {
            let registry = MutationRegistry::standard();
            let base = build_base_payload(seed);
            prop_assert_eq!(
                registry.mutate_payload(&base, seed),
                registry.mutate_payload(&base, seed)
            );
        }
    }
}
