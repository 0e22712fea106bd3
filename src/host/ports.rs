//! Port traits: the boundary between the dispatch core and the radio side.
//!
//! ```text
//!   BtHost ──▶ worker ──▶ Port trait ──▶ Adapter (controller, log, mock)
//! ```
//!
//! Adapters are moved into the worker thread when the host starts and are
//! only ever called from there, so they need `Send` but not `Sync`.

use core::fmt;

use crate::connect::{BdAddr, ServiceId};
use crate::gap_ble::{AdvData, AdvParams};

/// Failure reported synchronously by a port call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The controller cannot accept the command right now.
    Busy,
    /// The controller rejected the command with a status code.
    Controller(i32),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "controller busy"),
            Self::Controller(code) => write!(f, "controller status {code}"),
        }
    }
}

impl std::error::Error for PortError {}

// ───────────────────────────────────────────────────────────────
// Connection initiator (driven adapter: worker → radio)
// ───────────────────────────────────────────────────────────────

/// Starts an outgoing connection attempt.
///
/// `Ok` means the attempt is in flight; the transport later reports the
/// result through `BtHost::connect_finished`. The transport owns attempt
/// timeouts.
pub trait ConnectInitiator: Send {
    fn initiate(&mut self, address: BdAddr, service: ServiceId) -> Result<(), PortError>;
}

// ───────────────────────────────────────────────────────────────
// GAP BLE port (driven adapter: worker → controller)
// ───────────────────────────────────────────────────────────────

/// Controller-side GAP BLE commands.
pub trait GapBlePort: Send {
    fn config_adv_data(&mut self, data: &AdvData) -> Result<(), PortError>;

    fn config_adv_data_raw(&mut self, raw: &[u8]) -> Result<(), PortError>;

    fn config_scan_rsp_data_raw(&mut self, raw: &[u8]) -> Result<(), PortError>;

    fn set_security_param(&mut self, param: u8, value: &[u8]) -> Result<(), PortError>;

    fn start_advertising(&mut self, params: &AdvParams) -> Result<(), PortError>;

    fn stop_advertising(&mut self) -> Result<(), PortError>;
}
