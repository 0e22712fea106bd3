//! Host assembly: the producer-side API and the worker lifetime.
//!
//! | Item          | Role                                              |
//! |---------------|---------------------------------------------------|
//! | `HostBuilder` | installs handlers and ports, spawns the worker    |
//! | `BtHost`      | enqueue, callbacks, connection queue, shutdown    |
//! | `ports`       | traits the radio side implements                  |

pub mod ports;
mod service;

pub use service::{BtHost, HostBuilder};
