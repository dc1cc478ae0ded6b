//! # snapsync Agent
//!
//! Per-session runtime for the snapsync replication engine.
//!
//! A [`Session`] owns one event bus, one state graph, one input-buffer
//! registry, and one [`Ticker`]. The ticker collapses continuous local
//! mutation into one synchronization envelope per fixed interval;
//! inbound envelopes are fed through [`Session::handle`], which
//! validates and re-publishes them as bus events for role-specific
//! reaction.

pub mod config;
pub mod session;
pub mod ticker;
pub mod transport;

pub use config::{ConfigError, SessionConfig, DEFAULT_INTERVAL};
pub use session::{Session, SessionError};
pub use ticker::Ticker;
pub use transport::{LoopbackTransport, Transport};
