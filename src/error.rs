//! Unified error types for the dispatch core.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! host-level error handling uniform. All variants are `Copy` so they can be
//! returned from producer contexts and logged from the worker without
//! allocation.

use core::fmt;

use crate::dispatch::GroupId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Handing an envelope to the worker failed.
    Dispatch(DispatchError),
    /// A profile or group identifier was out of range.
    Range(RangeError),
    /// The worker thread could not be spawned.
    Spawn,
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch(e) => write!(f, "dispatch: {e}"),
            Self::Range(e) => write!(f, "range: {e}"),
            Self::Spawn => write!(f, "worker thread spawn failed"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Dispatch errors (returned synchronously to producers)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The deep copy of the payload could not allocate. The producer still
    /// owns its original payload.
    AllocationFailed,
    /// The queue is at capacity and the enqueue policy is non-blocking.
    QueueFull,
    /// The queue stayed full for the whole bounded wait.
    Timeout,
    /// No handler is installed for the group.
    UnknownGroup(GroupId),
    /// The request was rejected before it reached the queue.
    InvalidArg(&'static str),
    /// The worker has been shut down.
    Stopped,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "payload allocation failed"),
            Self::QueueFull => write!(f, "dispatch queue full"),
            Self::Timeout => write!(f, "timed out waiting for queue space"),
            Self::UnknownGroup(g) => write!(f, "no handler for group {}", g.index()),
            Self::InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            Self::Stopped => write!(f, "worker stopped"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

// ---------------------------------------------------------------------------
// Range errors
// ---------------------------------------------------------------------------

/// An identifier fell outside `[0, limit)`. Nothing was indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeError {
    pub id: usize,
    pub limit: usize,
}

impl RangeError {
    /// Check `id` against `limit`, returning it unchanged when in range.
    pub const fn check(id: usize, limit: usize) -> core::result::Result<usize, Self> {
        if id < limit {
            Ok(id)
        } else {
            Err(Self { id, limit })
        }
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id {} outside [0, {})", self.id, self.limit)
    }
}

impl std::error::Error for RangeError {}

impl From<RangeError> for Error {
    fn from(e: RangeError) -> Self {
        Self::Range(e)
    }
}

// ---------------------------------------------------------------------------
// Handler faults (reported through logging, never to the producer)
// ---------------------------------------------------------------------------

/// A group handler panicked while processing an envelope. The worker loop
/// caught it, released the payload, and moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerPanic {
    pub group: GroupId,
    pub action: u8,
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler for group {} panicked on action {}",
            self.group.index(),
            self.action
        )
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
