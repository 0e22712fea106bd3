//! Bluetooth host task-dispatch core.
//!
//! Every public call and every internal stack event crosses one boundary:
//! a bounded FIFO consumed by a single pinned worker thread that owns all
//! protocol-stack state. Around it sit the argument marshaller, the profile
//! callback table, and the connection serialization queue.
//!
//! Host-side modules are plain `std`; ESP-IDF specifics are guarded by
//! `#[cfg(target_os = "espidf")]` inside the modules that need them.

#![deny(unused_must_use)]

// Link the host time driver behind `async-io-mini`'s timer.
#[cfg(not(target_os = "espidf"))]
use embassy_time as _;

pub mod adapters;
pub mod config;
pub mod connect;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod gap_ble;
pub mod host;
pub mod profile;
pub mod task_pin;

pub use config::{EnqueuePolicy, HostConfig};
pub use dispatch::{Envelope, GroupId, Payload};
pub use error::{DispatchError, Error, RangeError};
pub use host::{BtHost, HostBuilder};
pub use profile::{PROFILE_COUNT, ProfileCallback, ProfileId};
