//! Adapters: concrete implementations of the host port traits.
//!
//! | Adapter     | Implements        | Connects to         |
//! |-------------|-------------------|---------------------|
//! | `log_radio` | ConnectInitiator  | Serial log output   |
//! |             | GapBlePort        |                     |

pub mod log_radio;
