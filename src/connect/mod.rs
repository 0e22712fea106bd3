//! Connection serialization queue.
//!
//! Many profiles share one radio, and only one outgoing connection attempt
//! may be in flight at a time. Requests are queued in the order they were
//! accepted; the head node is the only one marked busy, and it is busy
//! exactly when the queue is non-empty.
//!
//! ```text
//!  request_connect ──▶ [ head (busy) | pending | pending ] ◀── cancel
//!                          │
//!      advance(result) ◀───┘  radio reports the attempt finished
//! ```
//!
//! The queue is owned by the worker (see [`handler::ProfileQueueHandler`]);
//! every mutation arrives as an envelope on [`GroupId::PROFILE_QUEUE`].
//! Every request ends with exactly one completion callback.
//!
//! [`GroupId::PROFILE_QUEUE`]: crate::dispatch::GroupId::PROFILE_QUEUE

pub mod handler;

use core::fmt;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::diagnostics::panic_reason;
use crate::dispatch::{AllocError, CopyBudget, Marshal};
use crate::host::ports::ConnectInitiator;

pub use handler::ProfileQueueHandler;

// ───────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────

/// 48-bit Bluetooth device address, most significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// 16-bit service UUID of the profile requesting the connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub u16);

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Identifies one accepted connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueHandle(pub u32);

// ───────────────────────────────────────────────────────────────
// Outcomes
// ───────────────────────────────────────────────────────────────

/// Final result delivered to a request's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectOutcome {
    Connected,
    /// The radio attempt failed, or could not be started.
    Failed,
    /// Removed by `cancel` or `release` before completing.
    Cancelled,
    /// The queue was already holding the maximum number of requests.
    Rejected,
}

/// What the transport reports when an attempt finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Connected,
    Failed,
}

impl From<AttemptResult> for ConnectOutcome {
    fn from(r: AttemptResult) -> Self {
        match r {
            AttemptResult::Connected => Self::Connected,
            AttemptResult::Failed => Self::Failed,
        }
    }
}

pub type ConnectCallback = Arc<dyn Fn(ConnectOutcome) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// Requests (envelope payloads)
// ───────────────────────────────────────────────────────────────

/// Delivers a request's outcome exactly once.
///
/// Every copy of a request shares one slot. If the last copy is dropped
/// before an outcome was delivered (a queue torn down with the request
/// still inside it), the callback receives `Cancelled` from that drop.
#[derive(Clone)]
pub struct Completion(Arc<CompletionSlot>);

struct CompletionSlot {
    handle: QueueHandle,
    callback: ConnectCallback,
    done: AtomicBool,
}

impl Completion {
    pub fn new(handle: QueueHandle, callback: ConnectCallback) -> Self {
        Self(Arc::new(CompletionSlot {
            handle,
            callback,
            done: AtomicBool::new(false),
        }))
    }

    /// Deliver `outcome` unless an outcome was already delivered. Returns
    /// whether this call delivered it.
    pub fn complete(&self, outcome: ConnectOutcome) -> bool {
        self.0.deliver(outcome)
    }

    pub fn is_done(&self) -> bool {
        self.0.done.load(Ordering::Acquire)
    }
}

impl CompletionSlot {
    fn deliver(&self, outcome: ConnectOutcome) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A panicking callback must not skip the remaining notifications.
        if let Err(p) = catch_unwind(AssertUnwindSafe(|| (self.callback)(outcome))) {
            warn!(
                "connect: callback for {:?} panicked: {}",
                self.handle,
                panic_reason(p.as_ref())
            );
        }
        true
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        if !*self.done.get_mut() {
            debug!("connect: {:?} dropped unanswered", self.handle);
            self.deliver(ConnectOutcome::Cancelled);
        }
    }
}

#[derive(Clone)]
pub struct ConnectRequest {
    pub handle: QueueHandle,
    pub address: BdAddr,
    pub service: ServiceId,
    completion: Completion,
}

impl ConnectRequest {
    pub fn new(
        handle: QueueHandle,
        address: BdAddr,
        service: ServiceId,
        callback: ConnectCallback,
    ) -> Self {
        Self {
            handle,
            address,
            service,
            completion: Completion::new(handle, callback),
        }
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("handle", &self.handle)
            .field("address", &self.address)
            .field("service", &self.service)
            .field("done", &self.completion.is_done())
            .finish_non_exhaustive()
    }
}

/// Action codes on `GroupId::PROFILE_QUEUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectAction {
    Connect = 0,
    Advance = 1,
    Release = 2,
    Cancel = 3,
}

/// Payload of a `PROFILE_QUEUE` envelope.
#[derive(Debug, Clone)]
pub enum ConnectArgs {
    Connect(ConnectRequest),
    Advance(AttemptResult),
    Release,
    Cancel(QueueHandle),
}

impl ConnectArgs {
    pub fn action(&self) -> ConnectAction {
        match self {
            Self::Connect(_) => ConnectAction::Connect,
            Self::Advance(_) => ConnectAction::Advance,
            Self::Release => ConnectAction::Release,
            Self::Cancel(_) => ConnectAction::Cancel,
        }
    }
}

impl Marshal for ConnectArgs {
    /// No owned buffers: copies of a request share its completion.
    fn marshal(&self, _budget: &mut CopyBudget) -> Result<Self, AllocError> {
        Ok(self.clone())
    }
}

// ───────────────────────────────────────────────────────────────
// Queue
// ───────────────────────────────────────────────────────────────

pub struct ConnectNode {
    pub handle: QueueHandle,
    pub address: BdAddr,
    pub service: ServiceId,
    pub busy: bool,
    completion: Completion,
}

impl ConnectNode {
    fn complete(self, outcome: ConnectOutcome) {
        debug!(
            "connect: {:?} {} {:?} -> {:?}",
            self.handle, self.address, self.service, outcome
        );
        if !self.completion.complete(outcome) {
            warn!("connect: {:?} was already answered", self.handle);
        }
    }
}

/// FIFO of outgoing connection requests with at most one attempt in flight.
pub struct ConnectionQueue {
    nodes: VecDeque<ConnectNode>,
    max_pending: usize,
}

impl ConnectionQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            nodes: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    /// Append a request. If it is the only node it becomes busy and its
    /// attempt starts at once. A full queue answers `Rejected`.
    pub fn request_connect(&mut self, req: ConnectRequest, radio: &mut dyn ConnectInitiator) {
        let node = ConnectNode {
            handle: req.handle,
            address: req.address,
            service: req.service,
            busy: false,
            completion: req.completion,
        };
        if self.nodes.len() >= self.max_pending {
            warn!(
                "connect: queue full ({}), rejecting {:?}",
                self.max_pending, node.handle
            );
            node.complete(ConnectOutcome::Rejected);
            return;
        }
        self.nodes.push_back(node);
        if self.nodes.len() == 1 {
            self.start_head(radio);
        }
    }

    /// The in-flight attempt finished: complete the head and start the
    /// next node. Ignored when nothing is in flight.
    pub fn advance(&mut self, result: AttemptResult, radio: &mut dyn ConnectInitiator) {
        match self.nodes.front() {
            Some(head) if head.busy => {}
            _ => {
                debug!("connect: advance with no attempt in flight, ignored");
                return;
            }
        }
        if let Some(head) = self.nodes.pop_front() {
            head.complete(result.into());
        }
        self.start_head(radio);
    }

    /// Clear the queue, completing every node with `Cancelled`. An attempt
    /// already at the radio is left to the transport.
    pub fn release(&mut self) {
        let nodes = core::mem::take(&mut self.nodes);
        if !nodes.is_empty() {
            info!("connect: releasing {} requests", nodes.len());
        }
        for node in nodes {
            node.complete(ConnectOutcome::Cancelled);
        }
    }

    /// Remove a pending request. The busy head cannot be cancelled; its
    /// attempt completes through `advance`.
    pub fn cancel(&mut self, handle: QueueHandle) -> bool {
        let Some(pos) = self
            .nodes
            .iter()
            .position(|n| n.handle == handle && !n.busy)
        else {
            return false;
        };
        match self.nodes.remove(pos) {
            Some(node) => {
                node.complete(ConnectOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node whose attempt is in flight.
    pub fn busy(&self) -> Option<&ConnectNode> {
        self.nodes.front().filter(|n| n.busy)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConnectNode> {
        self.nodes.iter()
    }

    /// At most one busy node, it is the head, and it exists exactly when
    /// the queue is non-empty.
    pub fn invariant_holds(&self) -> bool {
        let busy = self.nodes.iter().filter(|n| n.busy).count();
        let head_busy = self.nodes.front().is_some_and(|n| n.busy);
        busy == usize::from(!self.nodes.is_empty()) && busy == usize::from(head_busy)
    }

    /// Promote the head and start its attempt. A synchronous failure
    /// completes that node with `Failed` and moves on to the next.
    fn start_head(&mut self, radio: &mut dyn ConnectInitiator) {
        while let Some(head) = self.nodes.front_mut() {
            head.busy = true;
            match radio.initiate(head.address, head.service) {
                Ok(()) => {
                    info!(
                        "connect: {:?} started to {} for {:?}",
                        head.handle, head.address, head.service
                    );
                    return;
                }
                Err(e) => {
                    warn!("connect: {:?} could not start: {}", head.handle, e);
                    if let Some(failed) = self.nodes.pop_front() {
                        failed.complete(ConnectOutcome::Failed);
                    }
                }
            }
        }
    }
}
