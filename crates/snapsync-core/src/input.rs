//! Input buffers with a guaranteed minimum sample density.
//!
//! Each buffer accumulates timestamped field-state samples between two
//! scheduler firings. A runtime-driven sampler appends hold-last-value
//! samples between explicit `set` calls, and `flush` tops the drained
//! batch up to the configured resolution, so sparse input still yields
//! at least `resolution` samples per interval.

use crate::graph::Fields;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// One timestamped field-state sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Capture time in milliseconds since the UNIX epoch.
    pub at_ms: u64,
    /// The full field-state at capture time.
    pub fields: Fields,
}

impl Sample {
    fn now(fields: Fields) -> Self {
        Self {
            at_ms: current_time_ms(),
            fields,
        }
    }
}

struct BufferInner {
    samples: Vec<Sample>,
    hold: Option<Fields>,
}

/// Shared state of one input buffer.
///
/// Public so the runtime crate can drive the fixed-rate sampler;
/// applications interact through [`InputBuffer`] handles instead.
pub struct BufferShared {
    resolution: u32,
    inner: Mutex<BufferInner>,
}

impl BufferShared {
    /// The minimum guaranteed sample count per interval.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Append one hold-last-value sample; no-op before the first `set`.
    ///
    /// Invoked `resolution` times per interval by the runtime's sampler
    /// task.
    pub fn sample_tick(&self) {
        let mut inner = lock(&self.inner);
        if let Some(hold) = inner.hold.clone() {
            inner.samples.push(Sample::now(hold));
        }
    }

    fn record(&self, fields: Fields) {
        let mut inner = lock(&self.inner);
        inner.samples.push(Sample::now(fields.clone()));
        inner.hold = Some(fields);
    }

    fn flush(&self) -> Vec<Sample> {
        let mut inner = lock(&self.inner);
        let mut batch = std::mem::take(&mut inner.samples);
        if let Some(hold) = &inner.hold {
            while batch.len() < self.resolution as usize {
                batch.push(Sample::now(hold.clone()));
            }
        }
        batch
    }
}

/// Application-facing handle for one input buffer.
#[derive(Clone)]
pub struct InputBuffer {
    name: String,
    shared: Arc<BufferShared>,
}

impl InputBuffer {
    /// The buffer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The minimum guaranteed sample count per interval.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.shared.resolution
    }

    /// Record the full current field-state as one sample, tagged with
    /// the current time, and retain it as the hold value for the
    /// sampler.
    pub fn set(&self, fields: Fields) {
        self.shared.record(fields);
    }

    /// The sampler-facing shared state.
    #[must_use]
    pub fn shared(&self) -> &Arc<BufferShared> {
        &self.shared
    }
}

impl std::fmt::Debug for InputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBuffer")
            .field("name", &self.name)
            .field("resolution", &self.shared.resolution)
            .finish()
    }
}

/// Errors for input buffer registration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InputError {
    /// Resolution must be a positive sample count.
    #[error("input buffer resolution must be at least 1")]
    InvalidResolution,
    /// A buffer with this name already exists.
    #[error("input buffer '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Registry of named input buffers for one session.
///
/// Cheap to clone; clones share the same buffers.
#[derive(Clone, Default)]
pub struct InputRegistry {
    buffers: Arc<Mutex<HashMap<String, Arc<BufferShared>>>>,
}

impl InputRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer under `name` with the given resolution.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::InvalidResolution`] for a zero resolution
    /// and [`InputError::AlreadyRegistered`] for a duplicate name.
    pub fn create(&self, name: impl Into<String>, resolution: u32) -> Result<InputBuffer, InputError> {
        if resolution == 0 {
            return Err(InputError::InvalidResolution);
        }
        let name = name.into();
        let mut buffers = lock(&self.buffers);
        if buffers.contains_key(&name) {
            return Err(InputError::AlreadyRegistered(name));
        }
        let shared = Arc::new(BufferShared {
            resolution,
            inner: Mutex::new(BufferInner {
                samples: Vec::new(),
                hold: None,
            }),
        });
        buffers.insert(name.clone(), Arc::clone(&shared));
        tracing::debug!(name, resolution, "created input buffer");
        Ok(InputBuffer { name, shared })
    }

    /// Retrieve a handle to an existing buffer.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<InputBuffer> {
        lock(&self.buffers).get(name).map(|shared| InputBuffer {
            name: name.to_string(),
            shared: Arc::clone(shared),
        })
    }

    /// Drain every buffer, oldest samples first.
    ///
    /// The result is sparse: buffers that flushed nothing are omitted.
    pub fn flush_all(&self) -> BTreeMap<String, Vec<Sample>> {
        let buffers: Vec<(String, Arc<BufferShared>)> = {
            let buffers = lock(&self.buffers);
            buffers
                .iter()
                .map(|(name, shared)| (name.clone(), Arc::clone(shared)))
                .collect()
        };

        let mut actions = BTreeMap::new();
        for (name, shared) in buffers {
            let batch = shared.flush();
            if !batch.is_empty() {
                actions.insert(name, batch);
            }
        }
        actions
    }

    /// Shared states of every registered buffer, for sampler startup.
    #[must_use]
    pub fn states(&self) -> Vec<Arc<BufferShared>> {
        lock(&self.buffers).values().map(Arc::clone).collect()
    }

    /// Number of registered buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.buffers).len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.buffers).is_empty()
    }
}

impl std::fmt::Debug for InputRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRegistry").field("len", &self.len()).finish()
    }
}

fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: i64) -> Fields {
        let mut fields = Fields::new();
        fields.insert("up".to_string(), json!(value));
        fields
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let registry = InputRegistry::new();
        assert!(matches!(
            registry.create("dummy", 0),
            Err(InputError::InvalidResolution)
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = InputRegistry::new();
        registry.create("dummy", 10).unwrap();
        assert!(matches!(
            registry.create("dummy", 5),
            Err(InputError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn flush_tops_up_to_resolution() {
        let registry = InputRegistry::new();
        let buffer = registry.create("dummy", 10).unwrap();

        buffer.set(fields(0));

        let actions = registry.flush_all();
        let batch = &actions["dummy"];
        assert!(batch.len() >= 10);
        assert!(batch.iter().all(|sample| sample.fields["up"] == json!(0)));
    }

    #[test]
    fn flush_preserves_order_and_drains() {
        let registry = InputRegistry::new();
        let buffer = registry.create("dummy", 2).unwrap();

        buffer.set(fields(0));
        buffer.set(fields(100));

        let batch = registry.flush_all().remove("dummy").unwrap();
        assert_eq!(batch[0].fields["up"], json!(0));
        assert_eq!(batch[1].fields["up"], json!(100));

        // Drained, but the hold value keeps the guarantee alive.
        let again = registry.flush_all().remove("dummy").unwrap();
        assert_eq!(again.len(), 2);
        assert!(again.iter().all(|sample| sample.fields["up"] == json!(100)));
    }

    #[test]
    fn untouched_buffer_flushes_nothing() {
        let registry = InputRegistry::new();
        registry.create("dummy", 10).unwrap();

        assert!(registry.flush_all().is_empty());
    }

    #[test]
    fn sample_tick_holds_last_value() {
        let registry = InputRegistry::new();
        let buffer = registry.create("dummy", 4).unwrap();

        // Before any input, sampler ticks are no-ops.
        buffer.shared().sample_tick();
        assert!(registry.flush_all().is_empty());

        buffer.set(fields(7));
        buffer.shared().sample_tick();
        buffer.shared().sample_tick();

        let batch = registry.flush_all().remove("dummy").unwrap();
        assert!(batch.len() >= 4);
        assert!(batch.iter().all(|sample| sample.fields["up"] == json!(7)));
    }
}
