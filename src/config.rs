//! Host configuration parameters
//!
//! All tunable parameters for the dispatch core. Values can be overridden by
//! the application before the host is started (e.g. from NVS or a build-time
//! JSON blob).

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::task_pin::Core;

/// How a producer behaves when the dispatch queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueuePolicy {
    /// Fail immediately with `QueueFull`.
    NonBlocking,
    /// Wait up to `timeout_ms` for space, then fail with `Timeout`.
    Block { timeout_ms: u32 },
}

/// Worker thread placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Thread name (shown in task lists and log prefixes).
    pub name: heapless::String<16>,
    /// Core the worker is pinned to on ESP-IDF (ignored on host).
    pub core: Core,
    /// FreeRTOS priority on ESP-IDF (ignored on host).
    pub priority: u8,
    /// Stack size in KiB.
    pub stack_kb: usize,
}

/// Core host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    // --- Queue ---
    /// Producer behaviour on a full queue
    pub enqueue_policy: EnqueuePolicy,
    /// Queue length above which `is_congested()` reports true
    pub congest_threshold: usize,

    // --- Marshalling ---
    /// Maximum bytes a single envelope's deep copy may allocate
    pub max_payload_bytes: usize,

    // --- Connection queue ---
    /// Maximum outstanding connection requests (busy + pending)
    pub max_pending_connects: usize,

    // --- Worker ---
    pub worker: WorkerConfig,
}

impl HostConfig {
    /// Reject configurations the host cannot run with.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.congest_threshold == 0 || self.congest_threshold > crate::dispatch::DISPATCH_QUEUE_LEN {
            return Err("congest_threshold must be within (0, DISPATCH_QUEUE_LEN]");
        }
        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be non-zero");
        }
        if self.max_pending_connects == 0 {
            return Err("max_pending_connects must be non-zero");
        }
        if self.worker.stack_kb == 0 {
            return Err("worker stack must be non-zero");
        }
        if let EnqueuePolicy::Block { timeout_ms: 0 } = self.enqueue_policy {
            return Err("blocking enqueue needs a non-zero timeout");
        }
        Ok(())
    }
}

impl HostConfig {
    /// Compact encoding for storing the configuration as a blob.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("encode failed"))
    }

    /// Decode a stored blob. A blob that decodes but fails `validate` is
    /// rejected the same as a corrupted one.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        let cfg: Self = postcard::from_bytes(bytes).map_err(|_| Error::Config("corrupted blob"))?;
        cfg.validate().map_err(Error::Config)?;
        Ok(cfg)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        let mut name = heapless::String::new();
        let _ = name.push_str("btc");
        Self {
            // Queue
            enqueue_policy: EnqueuePolicy::Block { timeout_ms: 2000 },
            congest_threshold: 40, // of 60 slots

            // Marshalling
            max_payload_bytes: 1024,

            // Connection queue
            max_pending_connects: 10,

            // Worker: co-located with the controller on PRO_CPU
            worker: WorkerConfig {
                name,
                core: Core::Pro,
                priority: 19,
                stack_kb: 16,
            },
        }
    }
}
