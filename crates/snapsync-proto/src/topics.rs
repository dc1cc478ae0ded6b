//! Event topics produced by the replication core.

/// Per-interval synchronization envelope, published by the scheduler.
pub const SYNC: &str = "sync";

/// Raw delta frame, published whenever a delta computation ran.
pub const SNAPSHOT: &str = "snapshot";
