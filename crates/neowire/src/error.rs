//! # Error Definitions
//!
//! Failures raised while marshaling values for the wire.
//!
//! Restoration itself never fails: a payload that cannot be restored to its
//! original class degrades to plain data instead.

/// Operational failures within the restoration engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A class instance could not be converted to plain data.
    #[error("failed to serialize instance of '{class}': {reason}")]
    Serialization { class: String, reason: String },
    /// Callbacks may only travel as call arguments.
    #[error("callbacks cannot be transferred as {0}")]
    CallbackNotTransferable(&'static str),
    /// A callback invocation could not be delivered.
    #[error("callback invocation failed: {0}")]
    Callback(String),
    /// The envelope did not have the expected shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// A specialized Result type for restoration engine operations.
pub type Result<T> = std::result::Result<T, Error>;
