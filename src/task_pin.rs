//! Core-pinned thread spawning for the dispatch worker.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::spawn` creates a
//! FreeRTOS task pinned to a specific CPU core with explicit priority
//! and stack size. On non-ESP targets, falls back to a plain named thread.
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread, so the config→spawn pair must not be interleaved
//! with other thread creation on the same thread.

use serde::{Deserialize, Serialize};
use std::io;
use std::thread::JoinHandle;

/// CPU core identifiers for the ESP32 dual-core parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): protocol stacks (WiFi, BLE controller, lwIP).
    Pro = 0,
    /// Core 1 (APP_CPU): application logic.
    App = 1,
}

/// Placement request for [`spawn_on_core`].
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec<'a> {
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
    pub name: &'a str,
}

/// Host threads get at least this much stack regardless of the request;
/// FreeRTOS-sized stacks are too small for the host's panic machinery.
#[cfg(not(target_os = "espidf"))]
const HOST_MIN_STACK_KB: usize = 64;

/// Spawn a thread pinned to a specific core with explicit priority and stack.
#[cfg(target_os = "espidf")]
pub fn spawn_on_core<F>(spec: TaskSpec<'_>, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    // The pthread config keeps a raw pointer to the name until the spawn
    // below, so it needs a NUL-terminated copy that outlives that call.
    let mut c_name: heapless::Vec<u8, 17> = heapless::Vec::new();
    for b in spec.name.bytes().take(16) {
        let _ = c_name.push(b);
    }
    let _ = c_name.push(0);

    // SAFETY: `cfg` is fully initialised by the default-config call and
    // `c_name` lives until after `spawn` consumes the configuration.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = spec.priority as i32;
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = c_name.as_ptr() as *const _;
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
    }

    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        spec.name,
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new().name(spec.name.into()).spawn(f)
}

/// Simulation fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core<F>(spec: TaskSpec<'_>, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let stack_kb = spec.stack_kb.max(HOST_MIN_STACK_KB);
    log::info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        spec.name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(spec.name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
