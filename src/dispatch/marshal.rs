//! Argument marshalling: deep copy at enqueue time, release on drop.
//!
//! Each `(group, action)` argument structure is a variant of [`Payload`].
//! Owned buffers inside a variant are duplicated, never aliased, so the
//! producer can free or reuse its copy the moment `enqueue` returns. There is
//! no separate free step: dropping the payload releases every nested buffer
//! exactly once.
//!
//! Every buffer allocated by a copy is charged to a [`CopyBudget`]. The
//! budget models the bounded heap the worker's messages live in; running out
//! fails the copy atomically and nothing reaches the queue.

use core::fmt;

use crate::connect::ConnectArgs;
use crate::gap_ble::GapBleArgs;

/// The deep copy could not allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    pub requested: usize,
    pub remaining: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copy needs {} bytes, {} left in budget",
            self.requested, self.remaining
        )
    }
}

impl From<AllocError> for crate::error::DispatchError {
    fn from(_: AllocError) -> Self {
        Self::AllocationFailed
    }
}

/// Byte allowance for one envelope's deep copy.
#[derive(Debug)]
pub struct CopyBudget {
    limit: usize,
    used: usize,
}

impl CopyBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Bytes allocated so far.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    /// Allocate a fresh buffer and copy `src` into it.
    pub fn copy_bytes(&mut self, src: &[u8]) -> Result<Vec<u8>, AllocError> {
        let err = AllocError {
            requested: src.len(),
            remaining: self.remaining(),
        };
        if src.len() > self.remaining() {
            return Err(err);
        }
        let mut dst = Vec::new();
        dst.try_reserve_exact(src.len()).map_err(|_| err)?;
        dst.extend_from_slice(src);
        self.used += src.len();
        Ok(dst)
    }

    /// `copy_bytes` for optional buffers; `None` costs nothing.
    pub fn copy_opt(&mut self, src: Option<&Vec<u8>>) -> Result<Option<Vec<u8>>, AllocError> {
        src.map(|s| self.copy_bytes(s)).transpose()
    }
}

/// Structural deep copy of a message argument.
///
/// Implementations copy flat fields by value and route every owned buffer
/// through the budget. Release is the type's `Drop`.
pub trait Marshal: Sized + Send + 'static {
    fn marshal(&self, budget: &mut CopyBudget) -> Result<Self, AllocError>;
}

impl Marshal for Vec<u8> {
    fn marshal(&self, budget: &mut CopyBudget) -> Result<Self, AllocError> {
        budget.copy_bytes(self)
    }
}

/// Argument of an envelope, one variant per argument structure.
#[derive(Debug)]
pub enum Payload {
    /// No arguments.
    Empty,
    /// Flat byte arguments (default for messages without nested buffers).
    Bytes(Vec<u8>),
    /// GAP BLE API arguments.
    GapBle(GapBleArgs),
    /// Connection serialization queue requests.
    Connect(ConnectArgs),
}

impl Payload {
    /// Bytes held in nested buffers (what a deep copy would allocate).
    pub fn heap_bytes(&self) -> usize {
        match self {
            Self::Empty | Self::Connect(_) => 0,
            Self::Bytes(b) => b.len(),
            Self::GapBle(args) => args.heap_bytes(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<GapBleArgs> for Payload {
    fn from(args: GapBleArgs) -> Self {
        Self::GapBle(args)
    }
}

impl From<ConnectArgs> for Payload {
    fn from(args: ConnectArgs) -> Self {
        Self::Connect(args)
    }
}

impl Marshal for Payload {
    fn marshal(&self, budget: &mut CopyBudget) -> Result<Self, AllocError> {
        Ok(match self {
            Self::Empty => Self::Empty,
            Self::Bytes(b) => Self::Bytes(b.marshal(budget)?),
            Self::GapBle(args) => Self::GapBle(args.marshal(budget)?),
            Self::Connect(args) => Self::Connect(args.marshal(budget)?),
        })
    }
}
