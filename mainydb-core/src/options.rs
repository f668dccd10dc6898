// src/options.rs
//! Engine-wide configuration: checkpoint cadence and cache sizing.
//!
//! Grounded on the teacher's `durability.rs`, whose `DurabilityMode` picked
//! between WAL auto-commit strategies; since this engine has no WAL (§4.1
//! drops write-ahead-log replay complexity in favor of checkpoint-replace),
//! the knobs that matter are the checkpoint triggers themselves (§4.1: every
//! N ops, every T seconds, or explicit flush/close) plus the ambient cache
//! capacity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Checkpoint after this many operations since the last checkpoint.
    pub checkpoint_ops: u64,
    /// Checkpoint after this many seconds since the last checkpoint.
    pub checkpoint_interval_secs: u64,
    /// Capacity of the per-collection query result cache.
    pub query_cache_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            checkpoint_ops: 1000,
            checkpoint_interval_secs: 30,
            query_cache_capacity: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let o = EngineOptions::default();
        assert_eq!(o.checkpoint_ops, 1000);
        assert_eq!(o.checkpoint_interval_secs, 30);
    }
}
