//! Core scheduler constants for cloud saves.

/// Save tick cadence in milliseconds.
pub const SAVE_TICK_INTERVAL_MS: u64 = 1_000;

/// Timeout for reads and credential exchange, in seconds.
pub const READ_TIMEOUT_SECS: u64 = 10;

/// Timeout for a single save round-trip, in seconds.
pub const SAVE_TIMEOUT_SECS: u64 = 30;

/// Consecutive save failures that open the circuit.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Elapsed offline time (seconds) at or below which no reward is granted.
pub const OFFLINE_GRACE_SECS: i64 = 60;
