//! # snapsync Core
//!
//! Leaf components of the snapsync state-replication engine.
//!
//! This crate provides:
//! - Fixed capability roles for replication peers
//! - A synchronous publish/subscribe event bus with ordered dispatch
//! - A delta-tracking state graph over arena-held backing objects
//! - Input buffers with a guaranteed minimum sample density per interval
//!
//! Everything here is synchronous and runtime-agnostic; timers and task
//! spawning live in `snapsync-agent`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod graph;
pub mod input;
pub mod role;

pub use bus::{EventBus, HandlerId};
pub use graph::{accept_all, DeltaSet, Fields, ObjectHandle, StateGraph, StateImage};
pub use input::{BufferShared, InputBuffer, InputError, InputRegistry, Sample};
pub use role::{Role, RoleParseError};
