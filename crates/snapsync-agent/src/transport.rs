//! Transport hooks.
//!
//! Byte-level framing, reconnection, and authentication live outside
//! the core; a transport only sees sealed envelopes. [`LoopbackTransport`]
//! is an in-process channel pair for tests and demos.

use crate::session::Session;
use snapsync_core::HandlerId;
use snapsync_proto::{topics, Envelope};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque outbound hook: delivers sealed envelopes to a peer.
pub trait Transport: Send + Sync {
    /// Hand one envelope to the transport. Delivery is best-effort;
    /// the core never waits on it.
    fn send(&self, envelope: &Envelope);
}

/// In-process transport carrying envelope wire values over an unbounded
/// channel.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Value>,
}

impl LoopbackTransport {
    /// Create a connected send half and its receive end.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, envelope: &Envelope) {
        if let Some(value) = envelope.to_value() {
            if self.tx.send(value).is_err() {
                tracing::debug!("loopback receiver dropped");
            }
        }
    }
}

/// Forward every locally published `"sync"` envelope to `transport`.
///
/// Returns the bus registration, so callers can detach the wire again.
pub fn wire_outbound(session: &Session, transport: Arc<dyn Transport>) -> HandlerId {
    session.on(topics::SYNC, move |args| {
        if let Some(value) = args.first() {
            let envelope = Envelope::from_value(value);
            if envelope.is_sealed() {
                transport.send(&envelope);
            }
        }
    })
}

/// Feed received wire values into `session` until the channel closes.
///
/// Malformed values are dropped silently by `Session::handle`.
pub async fn pump_inbound(session: Arc<Session>, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(value) = rx.recv().await {
        let envelope = Envelope::from_value(&value);
        if !session.handle(&envelope) {
            tracing::debug!("dropped malformed inbound envelope");
        }
    }
    tracing::debug!("inbound transport closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loopback_carries_sealed_envelopes_only() {
        let (transport, mut rx) = LoopbackTransport::pair();

        transport.send(&Envelope::seal("sync", json!({"deltas": {}})));
        transport.send(&Envelope::Invalid);

        let value = rx.try_recv().unwrap();
        assert_eq!(value["kind"], "sync");
        assert!(rx.try_recv().is_err());
    }
}
