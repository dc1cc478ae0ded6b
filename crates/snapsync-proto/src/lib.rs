//! # snapsync Protocol
//!
//! Typed envelope construction, validation, and dispatch for snapsync
//! peers.
//!
//! ## Wire shape
//!
//! `{"proto": "snapsync", "kind": <subtype>, <subtype>: payload}` — the
//! only structure crossing the peer boundary. Byte-level framing belongs
//! to the external transport; CBOR helpers are provided for transports
//! that want them.
//!
//! ## Envelope kinds
//!
//! - `sync`: per-interval deltas plus flushed input actions
//! - `hello`: peer discovery and role advertisement
//! - `state`: full state image for late joiners

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod topics;

pub use envelope::{dispatch, CodecError, Envelope, HelloPayload, Kind, SyncPayload};
