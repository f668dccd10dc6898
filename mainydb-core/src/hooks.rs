// src/hooks.rs
//! Encryption and media hook points (§6). Interfaces only — no cipher or
//! image codec behind them in v1; wiring a real implementation in is the
//! collaborator's job, not this engine's (an explicit §9 non-goal).

use crate::value::Value;

/// Per-field transform attached to a collection or database. Hash-style
/// fields transform on write only and are matched by structure, never
/// queried directly (§6, §9); cipher-style fields transform both ways.
pub trait EncryptionHook: Send + Sync {
    fn on_write(&self, doc: Value) -> Value;
    fn on_read(&self, doc: Value) -> Value;
}

/// A no-op hook, the default when no encryption is configured.
pub struct NoEncryption;

impl EncryptionHook for NoEncryption {
    fn on_write(&self, doc: Value) -> Value {
        doc
    }
    fn on_read(&self, doc: Value) -> Value {
        doc
    }
}

/// How a binary media field should be handed back to the caller.
pub enum MediaValue {
    /// Fully-decoded bytes, returned by `find_one`.
    Eager(Vec<u8>),
    /// A decode key to be resolved lazily by a scanning cursor (`find`),
    /// keeping per-row memory O(1) until the caller actually asks for it.
    Deferred(String),
}

/// Per-field media auto-detection hook: on write, a byte array is stored as
/// typed binary; a string naming a readable, image-suffixed path is
/// read-and-encoded. On read, the caller chooses eager vs. deferred
/// resolution via this trait.
pub trait MediaHook: Send + Sync {
    fn encode_on_write(&self, field_value: &Value) -> Option<Vec<u8>>;
    fn decode_eager(&self, key: &str) -> Option<Vec<u8>>;
}

pub struct NoMediaHook;

impl MediaHook for NoMediaHook {
    fn encode_on_write(&self, _field_value: &Value) -> Option<Vec<u8>> {
        None
    }
    fn decode_eager(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }
}
