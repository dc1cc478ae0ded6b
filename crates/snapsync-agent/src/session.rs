//! Session orchestration.
//!
//! One [`Session`] per logical connection. Each session executes on one
//! logical thread of control: mutation, bus dispatch, and scheduler
//! firing are synchronous and never overlap within a session.
//! Concurrency across peers comes from running independent sessions,
//! never from sharing one.

use crate::config::SessionConfig;
use crate::ticker::Ticker;
use snapsync_core::{
    DeltaSet, EventBus, Fields, HandlerId, InputBuffer, InputError, InputRegistry, ObjectHandle,
    Role, StateGraph, StateImage,
};
use snapsync_proto::{dispatch, Envelope, HelloPayload, Kind};
use serde_json::Value;
use uuid::Uuid;

/// Errors for session operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Observer sessions may receive synchronization events but must
    /// not contribute input.
    #[error("observer sessions cannot register input buffers")]
    ObserverInput,
    /// Buffer registration failed.
    #[error(transparent)]
    Input(#[from] InputError),
}

/// One replication peer: a role, a bus, a state graph, input buffers,
/// and a scheduler.
pub struct Session {
    id: Uuid,
    role: Role,
    config: SessionConfig,
    bus: EventBus,
    graph: StateGraph,
    inputs: InputRegistry,
    ticker: Ticker,
}

impl Session {
    /// Create a session with the given role and configuration.
    #[must_use]
    pub fn new(role: Role, config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        let bus = EventBus::new();
        let graph = StateGraph::new();
        let inputs = InputRegistry::new();
        let ticker = Ticker::new(role, &config, bus.clone(), graph.clone(), inputs.clone());

        tracing::info!(%id, %role, interval = ?config.interval, "session created");

        Self {
            id,
            role,
            config,
            bus,
            graph,
            inputs,
            ticker,
        }
    }

    /// Unique session identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's capability role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The session's state graph.
    #[must_use]
    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    /// The session's scheduler.
    #[must_use]
    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Register `handler` for `topic` on the session bus.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> HandlerId
    where
        F: FnMut(&[Value]) + Send + 'static,
    {
        self.bus.on(topic, handler)
    }

    /// Publish `args` to every handler of `topic`, synchronously.
    pub fn emit(&self, topic: &str, args: &[Value]) -> usize {
        self.bus.emit(topic, args)
    }

    /// Remove one handler registration.
    pub fn remove_listener(&self, topic: &str, id: HandlerId) -> bool {
        self.bus.remove_listener(topic, id)
    }

    /// Clear one topic's handlers, or all handlers.
    pub fn remove_all_listeners(&self, topic: Option<&str>) {
        self.bus.remove_all_listeners(topic);
    }

    /// Wrap a backing object into the state graph.
    pub fn wrap<F>(&self, name: impl Into<String>, fields: Fields, validator: F) -> ObjectHandle
    where
        F: Fn(&str, &Value) -> bool + Send + 'static,
    {
        self.graph.wrap(name, fields, validator)
    }

    /// Retrieve a handle to a wrapped object.
    #[must_use]
    pub fn obj(&self, name: &str) -> Option<ObjectHandle> {
        self.graph.obj(name)
    }

    /// Register an input buffer guaranteeing `resolution` samples per
    /// interval.
    ///
    /// Re-creating an existing name returns a handle to the existing
    /// buffer unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ObserverInput`] for observer sessions and
    /// [`SessionError::Input`] for a zero resolution.
    pub fn create_buffer(
        &self,
        name: impl Into<String>,
        resolution: u32,
    ) -> Result<InputBuffer, SessionError> {
        if !self.role.accepts_input() {
            tracing::warn!(role = %self.role, "input buffer refused");
            return Err(SessionError::ObserverInput);
        }
        let name = name.into();
        match self.inputs.create(name, resolution) {
            Ok(buffer) => {
                if self.ticker.is_running() {
                    self.ticker.watch_buffer(buffer.shared().clone());
                }
                Ok(buffer)
            }
            Err(InputError::AlreadyRegistered(name)) => {
                tracing::debug!(name, "buffer already registered, reusing");
                self.inputs
                    .get(&name)
                    .ok_or(SessionError::Input(InputError::AlreadyRegistered(name)))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Validate an inbound envelope and re-publish its payload on the
    /// bus under the subtype name.
    ///
    /// Returns `false` with zero side effects for malformed input; a
    /// bad peer envelope never interrupts the session.
    pub fn handle(&self, envelope: &Envelope) -> bool {
        dispatch(&self.bus, envelope)
    }

    /// Build this session's `hello` announcement envelope.
    #[must_use]
    pub fn hello_envelope(&self) -> Envelope {
        Envelope::typed(
            Kind::Hello,
            &HelloPayload {
                session_id: self.id,
                role: self.role,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        )
    }

    /// Build a full state image envelope for bringing a late joiner up
    /// to date.
    #[must_use]
    pub fn state_envelope(&self) -> Envelope {
        Envelope::typed(Kind::State, &self.graph.live_image())
    }

    /// Apply a received state image payload to the local graph.
    ///
    /// Fields flow through each entry's validator; rejected fields and
    /// unknown entries are skipped silently, and applied values refresh
    /// the baselines so the import does not echo back as a delta.
    /// Returns `false` if the payload is not a state image.
    pub fn apply_state(&self, payload: &Value) -> bool {
        let Ok(image) = serde_json::from_value::<StateImage>(payload.clone()) else {
            tracing::debug!("malformed state image dropped");
            return false;
        };
        let applied = self.graph.apply_image(&image);
        tracing::debug!(applied, entries = image.len(), "applied state image");
        true
    }

    /// The last computed delta set, when diagnostics are enabled.
    #[must_use]
    pub fn delta_cache(&self) -> Option<DeltaSet> {
        self.ticker.delta_cache()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Role::default(), SessionConfig::default())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snapsync_core::accept_all;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn sessions_have_distinct_ids_and_roles() {
        let a = Session::new(Role::Authoritative, SessionConfig::default());
        let b = Session::new(Role::Participant, SessionConfig::default());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.role(), b.role());
    }

    #[test]
    fn observer_cannot_register_buffers() {
        let session = Session::new(Role::Observer, SessionConfig::default());
        assert!(matches!(
            session.create_buffer("dummy", 10),
            Err(SessionError::ObserverInput)
        ));
    }

    #[test]
    fn duplicate_buffer_returns_existing_handle() {
        let session = Session::new(Role::Participant, SessionConfig::default());
        let first = session.create_buffer("dummy", 10).unwrap();
        let second = session.create_buffer("dummy", 3).unwrap();
        assert_eq!(second.resolution(), first.resolution());
    }

    #[test]
    fn handle_round_trips_valid_envelopes() {
        let session = Session::default();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = std::sync::Arc::clone(&seen);
        session.on("hello", move |args| sink.lock().unwrap().push(args[0].clone()));

        let envelope = session.hello_envelope();
        assert!(session.handle(&envelope));
        assert!(!session.handle(&Envelope::Invalid));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["role"], "participant");
    }

    #[test]
    fn state_envelope_applies_to_peer_graph() {
        let source = Session::new(Role::Authoritative, SessionConfig::default());
        source.wrap("ball", fields(&[("x", json!(1)), ("y", json!(2))]), accept_all);
        source.obj("ball").unwrap().set("x", json!(10));

        let target = Session::new(Role::Participant, SessionConfig::default());
        target.wrap("ball", fields(&[("x", json!(0)), ("y", json!(0))]), accept_all);

        let envelope = source.state_envelope();
        assert!(target.apply_state(envelope.payload().unwrap()));
        assert_eq!(target.obj("ball").unwrap().get("x"), Some(json!(10)));
        assert!(target.graph().compute_deltas().is_empty());
    }

    #[test]
    fn delta_cache_requires_diagnostics() {
        let session = Session::default();
        assert!(session.delta_cache().is_none());
    }
}
