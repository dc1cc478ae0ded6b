//! Delta-tracking state graph.
//!
//! Backing objects are arena-held inside the graph and accessed only
//! through named handles, which keeps the single-owner assumption
//! explicit: nothing else aliases the tracked fields between two delta
//! computations.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Field map of one backing object.
pub type Fields = serde_json::Map<String, Value>;

/// Sparse per-interval change set: entry name -> field -> change.
///
/// Absence of an entry or field means "no change this interval".
pub type DeltaSet = BTreeMap<String, BTreeMap<String, Value>>;

/// Full live field-state of every wrapped entry, keyed by entry name.
pub type StateImage = BTreeMap<String, Fields>;

/// Per-field mutation predicate. Returning `false` makes the write a
/// silent no-op.
pub type Validator = Box<dyn Fn(&str, &Value) -> bool + Send>;

/// The default accept-all validation strategy.
#[must_use]
pub fn accept_all(_field: &str, _value: &Value) -> bool {
    true
}

struct Entry {
    live: Fields,
    baseline: Fields,
    validator: Validator,
}

#[derive(Default)]
struct GraphInner {
    entries: HashMap<String, Entry>,
}

/// Registry of wrapped backing objects with rolling delta baselines.
///
/// Cheap to clone; clones share the same arena.
#[derive(Clone, Default)]
pub struct StateGraph {
    inner: Arc<Mutex<GraphInner>>,
}

impl StateGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backing object under `name`, capturing its current
    /// field values as the initial baseline.
    ///
    /// Re-wrapping an existing name replaces the entry and resets its
    /// baseline.
    pub fn wrap<F>(&self, name: impl Into<String>, fields: Fields, validator: F) -> ObjectHandle
    where
        F: Fn(&str, &Value) -> bool + Send + 'static,
    {
        let name = name.into();
        let mut inner = lock(&self.inner);
        let replaced = inner
            .entries
            .insert(
                name.clone(),
                Entry {
                    baseline: fields.clone(),
                    live: fields,
                    validator: Box::new(validator),
                },
            )
            .is_some();
        tracing::debug!(name, replaced, "wrapped state entry");
        ObjectHandle {
            graph: Arc::clone(&self.inner),
            name,
        }
    }

    /// Retrieve a handle to a previously wrapped entry.
    #[must_use]
    pub fn obj(&self, name: &str) -> Option<ObjectHandle> {
        let inner = lock(&self.inner);
        inner.entries.contains_key(name).then(|| ObjectHandle {
            graph: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }

    /// Compute the sparse delta set for this interval and reset every
    /// baseline to the live values, so no change is ever counted twice.
    ///
    /// Numeric fields record `live - baseline`; non-numeric fields record
    /// the raw live value.
    pub fn compute_deltas(&self) -> DeltaSet {
        let mut inner = lock(&self.inner);
        let mut deltas = DeltaSet::new();

        for (name, entry) in &mut inner.entries {
            let mut changed = BTreeMap::new();
            for (field, live) in &entry.live {
                match entry.baseline.get(field) {
                    Some(baseline) if baseline == live => {}
                    Some(baseline) => {
                        changed.insert(field.clone(), field_delta(live, baseline));
                    }
                    None => {
                        changed.insert(field.clone(), live.clone());
                    }
                }
            }
            if !changed.is_empty() {
                entry.baseline = entry.live.clone();
                deltas.insert(name.clone(), changed);
            }
        }

        tracing::trace!(entries = deltas.len(), "computed deltas");
        deltas
    }

    /// Full live field-state of every wrapped entry.
    #[must_use]
    pub fn live_image(&self) -> StateImage {
        let inner = lock(&self.inner);
        inner
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.live.clone()))
            .collect()
    }

    /// Write a received state image into already-wrapped entries,
    /// running each field through the entry's validator and refreshing
    /// baselines so the import does not surface as a local delta.
    ///
    /// Unknown entry names and rejected fields are skipped silently.
    /// Returns the number of fields applied.
    pub fn apply_image(&self, image: &StateImage) -> usize {
        let mut inner = lock(&self.inner);
        let mut applied = 0;

        for (name, fields) in image {
            let Some(entry) = inner.entries.get_mut(name) else {
                tracing::debug!(name, "state image entry not wrapped, skipping");
                continue;
            };
            for (field, value) in fields {
                if !(entry.validator)(field, value) {
                    continue;
                }
                entry.live.insert(field.clone(), value.clone());
                entry.baseline.insert(field.clone(), value.clone());
                applied += 1;
            }
        }

        applied
    }

    /// Number of wrapped entries.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Whether any entries are wrapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph").field("len", &self.len()).finish()
    }
}

/// Accessor handle for one wrapped entry.
#[derive(Clone)]
pub struct ObjectHandle {
    graph: Arc<Mutex<GraphInner>>,
    name: String,
}

impl ObjectHandle {
    /// The entry name this handle refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutate one field of the backing object.
    ///
    /// A validator-rejected write is a silent no-op returning `false`;
    /// an accepted write is visible to every reader immediately, while
    /// delta bookkeeping waits for the next computation pass.
    pub fn set(&self, field: &str, value: Value) -> bool {
        let mut inner = lock(&self.graph);
        let Some(entry) = inner.entries.get_mut(&self.name) else {
            tracing::debug!(name = %self.name, "set on unwrapped entry ignored");
            return false;
        };
        if !(entry.validator)(field, &value) {
            tracing::trace!(name = %self.name, field, "validator rejected write");
            return false;
        }
        entry.live.insert(field.to_string(), value);
        true
    }

    /// Read one field of the backing object.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        let inner = lock(&self.graph);
        inner
            .entries
            .get(&self.name)
            .and_then(|entry| entry.live.get(field).cloned())
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle").field("name", &self.name).finish()
    }
}

fn field_delta(live: &Value, baseline: &Value) -> Value {
    if let (Some(a), Some(b)) = (live.as_i64(), baseline.as_i64()) {
        if let Some(diff) = a.checked_sub(b) {
            return Value::from(diff);
        }
    }
    if let (Some(a), Some(b)) = (live.as_f64(), baseline.as_f64()) {
        if let Some(diff) = serde_json::Number::from_f64(a - b) {
            return Value::Number(diff);
        }
    }
    live.clone()
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ball() -> Fields {
        let mut fields = Fields::new();
        fields.insert("x".to_string(), json!(100));
        fields.insert("y".to_string(), json!(200));
        fields
    }

    #[test]
    fn deltas_are_relative_to_baseline() {
        let graph = StateGraph::new();
        let handle = graph.wrap("ball", ball(), accept_all);

        assert!(graph.obj("ball").unwrap().set("x", json!(110)));
        assert!(handle.set("y", json!(0)));

        let deltas = graph.compute_deltas();
        assert_eq!(deltas["ball"]["x"], json!(10));
        assert_eq!(deltas["ball"]["y"], json!(-200));

        // Baseline was reset, so an immediate recompute is empty.
        assert!(graph.compute_deltas().is_empty());
    }

    #[test]
    fn non_numeric_fields_record_live_value() {
        let graph = StateGraph::new();
        let mut fields = Fields::new();
        fields.insert("label".to_string(), json!("idle"));
        let handle = graph.wrap("widget", fields, accept_all);

        handle.set("label", json!("running"));

        let deltas = graph.compute_deltas();
        assert_eq!(deltas["widget"]["label"], json!("running"));
    }

    #[test]
    fn rejected_writes_are_silent_noops() {
        let graph = StateGraph::new();
        let handle = graph.wrap("ball", ball(), |field, _| field != "y");

        assert!(handle.set("x", json!(150)));
        assert!(!handle.set("y", json!(999)));

        assert_eq!(handle.get("y"), Some(json!(200)));
        let deltas = graph.compute_deltas();
        assert_eq!(deltas["ball"].get("y"), None);
        assert_eq!(deltas["ball"]["x"], json!(50));
    }

    #[test]
    fn unchanged_entries_are_absent_from_deltas() {
        let graph = StateGraph::new();
        graph.wrap("ball", ball(), accept_all);
        graph.wrap("paddle", ball(), accept_all);

        graph.obj("paddle").unwrap().set("x", json!(101));

        let deltas = graph.compute_deltas();
        assert!(!deltas.contains_key("ball"));
        assert_eq!(deltas["paddle"]["x"], json!(1));
    }

    #[test]
    fn unknown_lookup_returns_none() {
        let graph = StateGraph::new();
        assert!(graph.obj("ghost").is_none());
    }

    #[test]
    fn mutation_is_immediately_visible() {
        let graph = StateGraph::new();
        let writer = graph.wrap("ball", ball(), accept_all);
        let reader = graph.obj("ball").unwrap();

        writer.set("x", json!(42));
        assert_eq!(reader.get("x"), Some(json!(42)));
    }

    #[test]
    fn fractional_deltas_use_float_arithmetic() {
        let graph = StateGraph::new();
        let mut fields = Fields::new();
        fields.insert("t".to_string(), json!(1.5));
        let handle = graph.wrap("clock", fields, accept_all);

        handle.set("t", json!(4.0));

        let deltas = graph.compute_deltas();
        assert_eq!(deltas["clock"]["t"], json!(2.5));
    }

    #[test]
    fn apply_image_refreshes_baselines() {
        let graph = StateGraph::new();
        graph.wrap("ball", ball(), accept_all);

        let mut incoming = Fields::new();
        incoming.insert("x".to_string(), json!(500));
        let image: StateImage = [("ball".to_string(), incoming)].into();

        assert_eq!(graph.apply_image(&image), 1);
        assert_eq!(graph.obj("ball").unwrap().get("x"), Some(json!(500)));
        // Imported state is the new baseline, not a local change.
        assert!(graph.compute_deltas().is_empty());
    }

    #[test]
    fn apply_image_skips_unknown_and_rejected() {
        let graph = StateGraph::new();
        graph.wrap("ball", ball(), |field, _| field == "x");

        let mut incoming = Fields::new();
        incoming.insert("x".to_string(), json!(7));
        incoming.insert("y".to_string(), json!(7));
        let image: StateImage = [
            ("ball".to_string(), incoming.clone()),
            ("ghost".to_string(), incoming),
        ]
        .into();

        assert_eq!(graph.apply_image(&image), 1);
        assert_eq!(graph.obj("ball").unwrap().get("y"), Some(json!(200)));
    }
}
