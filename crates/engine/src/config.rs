//! Engine configuration.

use time::Duration;

/// Argon2id cost parameters for process passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashingParams {
    /// The cheapest parameters argon2 accepts. For tests and fixtures only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a successful password check unlocks a process for a visitor.
    pub grant_ttl: Duration,
    pub hashing: HashingParams,
    /// Distance above the current maximum `order_index` used as the parking
    /// range during a two-phase reorder. Must be at least 1.
    pub reorder_offset: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grant_ttl: Duration::hours(1),
            hashing: HashingParams::default(),
            reorder_offset: 1000,
        }
    }
}
