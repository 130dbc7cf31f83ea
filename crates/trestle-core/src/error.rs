//! Error types for the Trestle bridge.

use std::fmt;

/// Errors that can occur while running the UI/DSP bridge protocol.
///
/// Each variant maps one-to-one onto a VST3 `tresult` code, so COM-facing
/// wrappers can translate results without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// An endpoint was used before its counterpart was registered, or after
    /// it was torn down.
    NotInitialized,
    /// A malformed message, a missing/mistyped attribute, or an argument
    /// outside its documented domain.
    InvalidArgument,
    /// A message id this endpoint does not handle.
    NotImplemented,
    /// A protocol invariant was violated (e.g. a duplicate `ready` without
    /// an intervening `idle`).
    InternalError,
    /// The host failed to allocate a message object.
    OutOfMemory,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "endpoint not initialized"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::InternalError => write!(f, "internal protocol error"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
