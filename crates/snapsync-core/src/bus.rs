//! Synchronous publish/subscribe event bus.
//!
//! Handlers are kept in a bounded per-topic list and invoked in
//! registration order, on the emitting thread, before `emit` returns.
//! There are no priorities, no wildcard topics, and no deferred dispatch.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Handler = Arc<Mutex<dyn FnMut(&[Value]) + Send>>;

/// Token identifying one handler registration.
///
/// Returned by [`EventBus::on`] and consumed by
/// [`EventBus::remove_listener`]. Closures are not comparable in Rust, so
/// the token stands in for handler identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, Vec<Registration>>,
    next_id: u64,
}

/// Synchronous, order-preserving event bus.
///
/// Cheap to clone; clones share the same handler registry. The registry
/// lock is never held across a handler invocation, so handlers may
/// register, remove, or emit on other topics from inside a callback.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> HandlerId
    where
        F: FnMut(&[Value]) + Send + 'static,
    {
        let topic = topic.into();
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner.topics.entry(topic).or_default().push(Registration {
            id,
            handler: Arc::new(Mutex::new(handler)),
        });
        id
    }

    /// Invoke every handler registered for `topic` with `args`, in
    /// registration order, before returning.
    ///
    /// Returns the number of handlers invoked. A panicking handler
    /// propagates to the caller; the bus itself stays usable afterwards.
    pub fn emit(&self, topic: &str, args: &[Value]) -> usize {
        let handlers: Vec<Handler> = {
            let inner = lock(&self.inner);
            inner
                .topics
                .get(topic)
                .map(|regs| regs.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default()
        };

        for handler in &handlers {
            let mut handler = lock(handler);
            (&mut *handler)(args);
        }

        handlers.len()
    }

    /// Remove one registration from `topic`.
    ///
    /// Returns `false` if the topic or registration is unknown.
    pub fn remove_listener(&self, topic: &str, id: HandlerId) -> bool {
        let mut inner = lock(&self.inner);
        let Some(regs) = inner.topics.get_mut(topic) else {
            return false;
        };
        let before = regs.len();
        regs.retain(|r| r.id != id);
        before != regs.len()
    }

    /// Clear one topic's handlers, or every topic's handlers when
    /// `topic` is `None`.
    pub fn remove_all_listeners(&self, topic: Option<&str>) {
        let mut inner = lock(&self.inner);
        match topic {
            Some(topic) => {
                inner.topics.remove(topic);
            }
            None => inner.topics.clear(),
        }
    }

    /// Number of handlers currently registered for `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.inner).topics.get(topic).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("EventBus")
            .field("topics", &inner.topics.len())
            .finish()
    }
}

// A handler panic must not wedge the bus, so poisoned locks are re-entered.
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_invokes_with_exact_args() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on("test", move |args| {
            sink.lock().unwrap().push(args.to_vec());
        });

        bus.emit("test", &[json!(null), json!({"test": "data"}), json!("arbitrary")]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][1]["test"], "data");
        assert_eq!(seen[0][2], "arbitrary");
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let sink = Arc::clone(&order);
            bus.on("seq", move |_| sink.lock().unwrap().push(tag));
        }

        let invoked = bus.emit("seq", &[]);
        assert_eq!(invoked, 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn remove_listener_is_selective() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0u32));

        let sink = Arc::clone(&hits);
        let keep = bus.on("t", move |_| *sink.lock().unwrap() += 1);
        let sink = Arc::clone(&hits);
        let drop_me = bus.on("t", move |_| *sink.lock().unwrap() += 10);

        assert!(bus.remove_listener("t", drop_me));
        bus.emit("t", &[]);
        assert_eq!(*hits.lock().unwrap(), 1);

        // Unknown topic and already-removed id are failure sentinels.
        assert!(!bus.remove_listener("missing", keep));
        assert!(!bus.remove_listener("t", drop_me));
    }

    #[test]
    fn remove_all_listeners_scopes_by_topic() {
        let bus = EventBus::new();
        bus.on("a", |_| {});
        bus.on("a", |_| {});
        bus.on("b", |_| {});

        bus.remove_all_listeners(Some("a"));
        assert_eq!(bus.listener_count("a"), 0);
        assert_eq!(bus.listener_count("b"), 1);

        bus.remove_all_listeners(None);
        assert_eq!(bus.listener_count("b"), 0);
    }

    #[test]
    fn handler_may_reenter_bus() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0u32));

        let reentrant = bus.clone();
        let sink = Arc::clone(&hits);
        bus.on("outer", move |_| {
            let sink = Arc::clone(&sink);
            reentrant.on("inner", move |_| *sink.lock().unwrap() += 1);
        });

        bus.emit("outer", &[]);
        bus.emit("inner", &[]);
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
