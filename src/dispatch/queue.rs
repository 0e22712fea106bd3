//! Bounded many-producer / single-consumer dispatch queue.
//!
//! Built on an `embassy-sync` bounded channel guarded by a
//! `CriticalSectionRawMutex`, the same primitive the firmware uses to bridge
//! its I/O task and control loop. The channel is the only storage shared
//! between arbitrary producers and the worker.
//!
//! ```text
//! ┌──────────────┐  Envelope   ┌──────────────┐
//! │  Producer ×n │────────────▶│  Consumer ×1 │
//! │  (Clone)     │   FIFO, N   │  (worker)    │
//! └──────────────┘             └──────────────┘
//! ```
//!
//! The [`Consumer`] half is not `Clone`; it moves into the worker thread, so
//! no producer or handler can dequeue.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::semaphore::{FairSemaphore, Semaphore};
use log::{debug, warn};

use super::envelope::Envelope;
use super::marshal::{CopyBudget, Marshal, Payload};
use super::{DISPATCH_QUEUE_LEN, GroupId};
use crate::config::{EnqueuePolicy, HostConfig};
use crate::diagnostics::DispatchStats;
use crate::error::DispatchError;

/// Producers that may wait for space at the same time. Beyond this a
/// blocking enqueue fails with `QueueFull` right away.
pub const MAX_BLOCKED_PRODUCERS: usize = 16;

enum QueueItem {
    Work(Envelope),
    Stop,
}

enum SendWait {
    Sent,
    TimedOut,
    Crowded,
}

/// Producer-side knobs, taken from [`HostConfig`].
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub policy: EnqueuePolicy,
    pub max_payload_bytes: usize,
    pub congest_threshold: usize,
}

impl From<&HostConfig> for QueueSettings {
    fn from(c: &HostConfig) -> Self {
        Self {
            policy: c.enqueue_policy,
            max_payload_bytes: c.max_payload_bytes,
            congest_threshold: c.congest_threshold,
        }
    }
}

struct Shared<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, QueueItem, N>,
    /// One permit: the channel keeps a single sender waker, so only the
    /// holder waits on it. Other blocked producers queue here in FIFO order.
    send_gate: FairSemaphore<CriticalSectionRawMutex, MAX_BLOCKED_PRODUCERS>,
    /// Bit `g` set when group `g` has a handler.
    routes: AtomicU32,
    closed: AtomicBool,
    consumer_thread: OnceLock<ThreadId>,
    stats: DispatchStats,
}

/// Create a connected producer/consumer pair with capacity `N`.
pub fn dispatch_queue<const N: usize>(settings: QueueSettings) -> (Producer<N>, Consumer<N>) {
    let shared = Arc::new(Shared {
        channel: Channel::new(),
        send_gate: FairSemaphore::new(1),
        routes: AtomicU32::new(0),
        closed: AtomicBool::new(false),
        consumer_thread: OnceLock::new(),
        stats: DispatchStats::new(),
    });
    (
        Producer {
            shared: shared.clone(),
            settings,
        },
        Consumer { shared },
    )
}

// ───────────────────────────────────────────────────────────────
// Producer
// ───────────────────────────────────────────────────────────────

/// Enqueue handle. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct Producer<const N: usize = DISPATCH_QUEUE_LEN> {
    shared: Arc<Shared<N>>,
    settings: QueueSettings,
}

impl<const N: usize> Producer<N> {
    /// Deep-copy `args` and append an API-call envelope.
    ///
    /// On success the caller's `args` are independent of the queued copy.
    /// On failure nothing was queued and `args` are untouched.
    pub fn enqueue<A>(&self, group: GroupId, action: u8, args: &A) -> Result<(), DispatchError>
    where
        A: Marshal + Into<Payload>,
    {
        self.check_route(group)?;
        let copy = self.copy_args(group, action, args)?;
        self.send(Envelope::call(group, action, copy.into()))
    }

    /// Append an API-call envelope, taking ownership of `payload` (no copy).
    pub fn enqueue_owned(&self, group: GroupId, action: u8, payload: Payload) -> Result<(), DispatchError> {
        self.check_route(group)?;
        self.send(Envelope::call(group, action, payload))
    }

    /// Append a stack-originated callback envelope.
    pub fn post_callback(&self, group: GroupId, event: u8, payload: Payload) -> Result<(), DispatchError> {
        self.check_route(group)?;
        self.send(Envelope::callback(group, event, payload))
    }

    /// Envelopes currently queued.
    pub fn len(&self) -> usize {
        self.shared.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.channel.is_empty()
    }

    /// True once the queue holds more than the configured threshold.
    pub fn is_congested(&self) -> bool {
        self.len() > self.settings.congest_threshold
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.shared.stats
    }

    /// Whether the calling thread is the consumer (worker) thread.
    pub fn on_consumer_thread(&self) -> bool {
        self.shared
            .consumer_thread
            .get()
            .is_some_and(|id| *id == std::thread::current().id())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting envelopes and wake the consumer with a stop marker.
    ///
    /// Envelopes already queued ahead of the marker are still delivered.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.on_consumer_thread() {
            // The worker is closing itself; it must not wait for its own space.
            if self.shared.channel.try_send(QueueItem::Stop).is_err() {
                warn!("dispatch: queue full while worker closes itself");
            }
            return;
        }
        let shared = &*self.shared;
        futures_lite::future::block_on(async {
            let _turn = shared.send_gate.acquire(1).await;
            shared.channel.send(QueueItem::Stop).await;
        });
    }

    fn check_route(&self, group: GroupId) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Stopped);
        }
        if self.shared.routes.load(Ordering::Acquire) & (1 << group.index()) == 0 {
            return Err(DispatchError::UnknownGroup(group));
        }
        Ok(())
    }

    fn copy_args<A: Marshal>(&self, group: GroupId, action: u8, args: &A) -> Result<A, DispatchError> {
        let mut budget = CopyBudget::new(self.settings.max_payload_bytes);
        args.marshal(&mut budget).map_err(|e| {
            self.shared.stats.record_alloc_failure();
            warn!("dispatch: {:?}/{} copy failed: {}", group, action, e);
            DispatchError::AllocationFailed
        })
    }

    fn send(&self, env: Envelope) -> Result<(), DispatchError> {
        // Blocking on the worker's own thread could never complete.
        let policy = if self.on_consumer_thread() {
            EnqueuePolicy::NonBlocking
        } else {
            self.settings.policy
        };

        let result = match self.shared.channel.try_send(QueueItem::Work(env)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => match policy {
                EnqueuePolicy::NonBlocking => Err(DispatchError::QueueFull),
                EnqueuePolicy::Block { timeout_ms } => {
                    self.send_timeout(item, Duration::from_millis(u64::from(timeout_ms)))
                }
            },
        };

        match result {
            Ok(()) => self.shared.stats.record_enqueued(self.len()),
            Err(DispatchError::QueueFull) => {
                self.shared.stats.record_queue_full();
                debug!("dispatch: queue full ({} slots)", N);
            }
            Err(DispatchError::Timeout) => {
                self.shared.stats.record_timeout();
                warn!("dispatch: enqueue timed out after waiting for space");
            }
            Err(_) => {}
        }
        result
    }

    /// Wait for a turn at the gate, then for space, racing both against a
    /// timer. When the timer wins, the send future is dropped together with
    /// the envelope it was holding and its place at the gate.
    fn send_timeout(&self, item: QueueItem, timeout: Duration) -> Result<(), DispatchError> {
        let shared = &*self.shared;
        let outcome = futures_lite::future::block_on(futures_lite::future::or(
            async move {
                let Ok(_turn) = shared.send_gate.acquire(1).await else {
                    return SendWait::Crowded;
                };
                shared.channel.send(item).await;
                SendWait::Sent
            },
            async {
                async_io_mini::Timer::after(timeout).await;
                SendWait::TimedOut
            },
        ));
        match outcome {
            SendWait::Sent => Ok(()),
            SendWait::TimedOut => Err(DispatchError::Timeout),
            SendWait::Crowded => {
                warn!(
                    "dispatch: more than {} producers waiting for space",
                    MAX_BLOCKED_PRODUCERS
                );
                Err(DispatchError::QueueFull)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Consumer
// ───────────────────────────────────────────────────────────────

/// The single consuming end. Owned by the worker loop.
pub struct Consumer<const N: usize = DISPATCH_QUEUE_LEN> {
    shared: Arc<Shared<N>>,
}

impl<const N: usize> Consumer<N> {
    /// Block until the next envelope arrives. Returns `None` once the stop
    /// marker is reached, or once the queue is closed and drained.
    pub fn dequeue(&mut self) -> Option<Envelope> {
        // A worker that closed itself on a full queue never queued a marker.
        if self.shared.closed.load(Ordering::Acquire) && self.shared.channel.is_empty() {
            return None;
        }
        match futures_lite::future::block_on(self.shared.channel.receive()) {
            QueueItem::Work(env) => Some(env),
            QueueItem::Stop => None,
        }
    }

    /// Allow producers to target `group`.
    pub fn open_route(&self, group: GroupId) {
        self.shared
            .routes
            .fetch_or(1 << group.index(), Ordering::AcqRel);
    }

    /// Record the calling thread as the consumer thread. Called once by the
    /// worker loop before its first dequeue.
    pub fn bind_current_thread(&self) {
        let _ = self.shared.consumer_thread.set(std::thread::current().id());
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.shared.stats
    }

    /// Next envelope if one is already queued. Stop markers are skipped.
    pub fn try_dequeue(&mut self) -> Option<Envelope> {
        while let Ok(item) = self.shared.channel.try_receive() {
            if let QueueItem::Work(env) = item {
                return Some(env);
            }
        }
        None
    }
}
