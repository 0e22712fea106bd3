//! Dispatch counters and the handler fault log.
//!
//! Counters are lock-free atomics bumped from producer contexts and the
//! worker. Handler faults land in a small RAM ring (last 4 entries), each
//! capturing the group, action, and a truncated panic reason.
//!
//! A [`StatsSnapshot`] is serde-serializable so the application can ship it
//! over whatever diagnostics channel it has.

use core::cell::RefCell;
use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::{Deserialize, Serialize};

use crate::error::HandlerPanic;

const FAULT_RING_SLOTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEntry {
    /// Monotonic fault number (survives ring wrap).
    pub seq: u32,
    pub group: u8,
    pub action: u8,
    pub reason: heapless::String<64>,
}

impl FaultEntry {
    pub fn new(seq: u32, fault: HandlerPanic, reason: &str) -> Self {
        let mut r = heapless::String::new();
        for ch in reason.chars() {
            if r.push(ch).is_err() {
                break;
            }
        }
        Self {
            seq,
            group: fault.group.raw(),
            action: fault.action,
            reason: r,
        }
    }
}

/// Counters shared by producers and the worker.
pub struct DispatchStats {
    enqueued: AtomicU32,
    dispatched: AtomicU32,
    queue_full: AtomicU32,
    timeouts: AtomicU32,
    alloc_failures: AtomicU32,
    handler_panics: AtomicU32,
    high_water: AtomicUsize,
    faults: Mutex<CriticalSectionRawMutex, RefCell<heapless::Deque<FaultEntry, FAULT_RING_SLOTS>>>,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub enqueued: u32,
    pub dispatched: u32,
    pub queue_full: u32,
    pub timeouts: u32,
    pub alloc_failures: u32,
    pub handler_panics: u32,
    /// Deepest queue length observed right after an enqueue.
    pub high_water: usize,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchStats {
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU32::new(0),
            dispatched: AtomicU32::new(0),
            queue_full: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
            alloc_failures: AtomicU32::new(0),
            handler_panics: AtomicU32::new(0),
            high_water: AtomicUsize::new(0),
            faults: Mutex::new(RefCell::new(heapless::Deque::new())),
        }
    }

    pub fn record_enqueued(&self, depth: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.high_water.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alloc_failure(&self) {
        self.alloc_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a handler panic and push it into the fault ring, evicting the
    /// oldest entry when full.
    pub fn record_panic(&self, fault: HandlerPanic, reason: &str) {
        let seq = self.handler_panics.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = FaultEntry::new(seq, fault, reason);
        self.faults.lock(|ring| {
            let mut ring = ring.borrow_mut();
            if ring.is_full() {
                ring.pop_front();
            }
            let _ = ring.push_back(entry);
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
        }
    }

    /// Stored faults, oldest first.
    pub fn faults(&self) -> heapless::Vec<FaultEntry, FAULT_RING_SLOTS> {
        self.faults.lock(|ring| {
            let mut out = heapless::Vec::new();
            for entry in ring.borrow().iter() {
                let _ = out.push(entry.clone());
            }
            out
        })
    }
}

/// Best-effort text of a panic payload.
pub fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook: routes panic text through `log`
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that reports through the logger instead of stderr.
///
/// Handler panics are still caught by the worker; this only controls where
/// the message goes.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("?");
        match info.location() {
            Some(loc) => log::error!(
                "PANIC in '{}' at {}:{}: {}",
                name,
                loc.file(),
                loc.line(),
                panic_reason(info.payload())
            ),
            None => log::error!("PANIC in '{}': {}", name, panic_reason(info.payload())),
        }
    }));
}
