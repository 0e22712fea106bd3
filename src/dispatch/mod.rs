//! Cross-context dispatch: envelopes, the bounded queue, argument
//! marshalling, and the single worker loop.
//!
//! ```text
//! ┌──────────────┐            ┌────────────────┐            ┌──────────────┐
//! │ API callers  │──enqueue──▶│                │            │              │
//! │ Stack events │──enqueue──▶│ Dispatch Queue │──dequeue──▶│ Worker Loop  │
//! │ Profiles     │──enqueue──▶│ (FIFO, bounded)│            │ (one thread) │
//! └──────────────┘  deep copy └────────────────┘            └──────┬───────┘
//!                                                                  │
//!                                            HandlerTable[group] ◀─┘
//! ```
//!
//! Producers never share a payload with the worker: `enqueue` deep-copies
//! through [`Marshal`], so the caller may drop or reuse its buffer as soon as
//! the call returns. The worker drops each payload after its handler returns.

pub mod envelope;
pub mod marshal;
pub mod queue;
pub mod worker;

pub use envelope::{Envelope, Signal};
pub use marshal::{AllocError, CopyBudget, Marshal, Payload};
pub use queue::{Consumer, MAX_BLOCKED_PRODUCERS, Producer, QueueSettings, dispatch_queue};
pub use worker::{GroupHandler, HandlerTable, Worker, WorkerContext, WorkerState, WorkerStatus};

use core::fmt;

use crate::error::RangeError;

/// Depth of the dispatch queue (envelopes in flight between producers and
/// the worker).
pub const DISPATCH_QUEUE_LEN: usize = 60;

/// Dispatch group: selects the handler that processes an envelope. One group
/// per protocol module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u8);

impl GroupId {
    /// Size of the handler table.
    pub const COUNT: usize = 32;

    /// Reserved for the connection serialization queue.
    pub const PROFILE_QUEUE: Self = Self(0);
    pub const GAP_BLE: Self = Self(1);
    pub const GATTC: Self = Self(2);
    pub const GATTS: Self = Self(3);
    pub const GAP_BT: Self = Self(4);
    pub const A2DP: Self = Self(5);
    pub const HF: Self = Self(6);
    pub const SPP: Self = Self(7);

    /// Range-checked constructor.
    pub const fn new(id: u8) -> Result<Self, RangeError> {
        match RangeError::check(id as usize, Self::COUNT) {
            Ok(_) => Ok(Self(id)),
            Err(e) => Err(e),
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}
