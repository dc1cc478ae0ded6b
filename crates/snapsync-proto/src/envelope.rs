//! Envelope construction, validation, and dispatch.
//!
//! The registered subtype set is the closed [`Kind`] enum and is not
//! extensible at runtime. Every malformed input — unregistered subtype,
//! wrong protocol tag, missing payload — produces [`Envelope::Invalid`],
//! a value that cannot be encoded or dispatched; nothing here panics on
//! peer input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snapsync_core::{DeltaSet, EventBus, Role, Sample};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Protocol tag carried by every envelope.
pub const PROTOCOL_TAG: &str = "snapsync";

/// Wire key holding the protocol tag.
pub const TAG_KEY: &str = "proto";

/// Wire key holding the subtype name.
pub const KIND_KEY: &str = "kind";

/// Registered envelope subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Per-interval deltas plus flushed input actions.
    Sync,
    /// Peer discovery and role advertisement.
    Hello,
    /// Full state image for late joiners.
    State,
}

impl Kind {
    /// Every registered subtype.
    pub const ALL: [Kind; 3] = [Kind::Sync, Kind::Hello, Kind::State];

    /// The wire name of this subtype.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Sync => "sync",
            Kind::Hello => "hello",
            Kind::State => "state",
        }
    }

    /// Look up a subtype by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Kind::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `sync` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Sparse per-interval delta set.
    #[serde(default)]
    pub deltas: DeltaSet,
    /// Flushed input samples per buffer name; empty batches are omitted.
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<Sample>>,
}

impl SyncPayload {
    /// Whether this interval carried no change at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.actions.is_empty()
    }
}

/// Payload of a `hello` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Capability role of the announcing peer.
    pub role: Role,
    /// Peer software version.
    pub version: String,
}

/// A typed unit of peer exchange.
///
/// Either sealed (registered subtype, payload present) or explicitly
/// invalid; there is no partially-formed state.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A well-formed envelope ready for dispatch or encoding.
    Sealed {
        /// The registered subtype.
        kind: Kind,
        /// The payload carried under the subtype's wire key.
        payload: Value,
    },
    /// The unusable result of constructing or parsing malformed input.
    Invalid,
}

impl Envelope {
    /// Construct an envelope for the named subtype.
    ///
    /// Unregistered subtypes yield [`Envelope::Invalid`]; this never
    /// fails loudly.
    #[must_use]
    pub fn seal(subtype: &str, payload: Value) -> Self {
        match Kind::from_name(subtype) {
            Some(kind) => Envelope::Sealed { kind, payload },
            None => {
                tracing::debug!(subtype, "refusing to seal unregistered subtype");
                Envelope::Invalid
            }
        }
    }

    /// Construct an envelope from a serializable payload.
    #[must_use]
    pub fn typed<T: Serialize>(kind: Kind, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Envelope::Sealed { kind, payload },
            Err(error) => {
                tracing::warn!(%kind, %error, "payload serialization failed");
                Envelope::Invalid
            }
        }
    }

    /// Validate a received wire value.
    ///
    /// Checks the protocol tag, a registered subtype, and a payload
    /// under the subtype's key; anything else yields
    /// [`Envelope::Invalid`] with no side effects.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Envelope::Invalid;
        };
        if map.get(TAG_KEY).and_then(Value::as_str) != Some(PROTOCOL_TAG) {
            return Envelope::Invalid;
        }
        let Some(kind) = map
            .get(KIND_KEY)
            .and_then(Value::as_str)
            .and_then(Kind::from_name)
        else {
            return Envelope::Invalid;
        };
        match map.get(kind.as_str()) {
            Some(payload) => Envelope::Sealed {
                kind,
                payload: payload.clone(),
            },
            None => Envelope::Invalid,
        }
    }

    /// The subtype, if sealed.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Envelope::Sealed { kind, .. } => Some(*kind),
            Envelope::Invalid => None,
        }
    }

    /// The payload, if sealed.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Envelope::Sealed { payload, .. } => Some(payload),
            Envelope::Invalid => None,
        }
    }

    /// Whether this envelope is usable.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self, Envelope::Sealed { .. })
    }

    /// The wire value, or `None` for an invalid envelope.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        let Envelope::Sealed { kind, payload } = self else {
            return None;
        };
        let mut map = Map::new();
        map.insert(TAG_KEY.to_string(), Value::String(PROTOCOL_TAG.to_string()));
        map.insert(KIND_KEY.to_string(), Value::String(kind.as_str().to_string()));
        map.insert(kind.as_str().to_string(), payload.clone());
        Some(Value::Object(map))
    }

    /// Encode the wire value as CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidEnvelope`] for an invalid envelope
    /// and [`CodecError::Encode`] if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        let value = self.to_value().ok_or(CodecError::InvalidEnvelope)?;
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode CBOR bytes into an envelope.
    ///
    /// Shape-level problems still yield [`Envelope::Invalid`]; only
    /// byte-level decode failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not valid CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Self::from_value(&value))
    }
}

/// Re-publish an accepted envelope's payload on the bus under its
/// subtype name.
///
/// Returns `false` with zero side effects for an invalid envelope;
/// callers branch on the boolean.
pub fn dispatch(bus: &EventBus, envelope: &Envelope) -> bool {
    match envelope {
        Envelope::Sealed { kind, payload } => {
            let handlers = bus.emit(kind.as_str(), std::slice::from_ref(payload));
            tracing::debug!(%kind, handlers, "dispatched envelope");
            true
        }
        Envelope::Invalid => {
            tracing::debug!("dropped invalid envelope");
            false
        }
    }
}

/// Errors for envelope byte encoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The bytes are not valid CBOR.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Invalid envelopes have no wire form.
    #[error("invalid envelopes cannot be encoded")]
    InvalidEnvelope,
}
