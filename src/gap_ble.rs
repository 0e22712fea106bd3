//! GAP BLE protocol module.
//!
//! Shows how a protocol module plugs into the dispatch core: argument
//! structures with nested buffers implement [`Marshal`], the producer API
//! validates before anything is copied, and [`GapBleHandler`] runs the call
//! on the worker and reports completion to the GAP BLE profile callback.
//! The controller work itself sits behind [`GapBlePort`].

use log::{debug, warn};

use crate::dispatch::{
    AllocError, CopyBudget, Envelope, GroupHandler, GroupId, Marshal, Payload, Producer,
    WorkerContext,
};
use crate::error::DispatchError;
use crate::host::ports::{GapBlePort, PortError};
use crate::profile::ProfileId;

/// Maximum length of one advertising or scan response PDU payload.
pub const ADV_DATA_LEN_MAX: usize = 31;
/// Length of one 128-bit service UUID in the UUID list.
pub const UUID128_LEN: usize = 16;
/// Longest security parameter value (OOB data).
pub const SEC_PARAM_LEN_MAX: usize = 16;
/// Advertising interval bounds, in 0.625 ms units.
pub const ADV_INTERVAL_MIN: u16 = 0x0020;
pub const ADV_INTERVAL_MAX: u16 = 0x4000;

/// Structured advertising data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvData {
    pub set_scan_rsp: bool,
    pub include_name: bool,
    pub include_txpower: bool,
    pub min_interval: u16,
    pub max_interval: u16,
    pub appearance: u16,
    pub manufacturer: Option<Vec<u8>>,
    pub service_data: Option<Vec<u8>>,
    /// Concatenated 128-bit UUIDs.
    pub service_uuids: Option<Vec<u8>>,
    pub flag: u8,
}

impl AdvData {
    pub fn heap_bytes(&self) -> usize {
        [&self.manufacturer, &self.service_data, &self.service_uuids]
            .into_iter()
            .flatten()
            .map(|b| b.len())
            .sum()
    }
}

impl Marshal for AdvData {
    fn marshal(&self, budget: &mut CopyBudget) -> Result<Self, AllocError> {
        Ok(Self {
            manufacturer: budget.copy_opt(self.manufacturer.as_ref())?,
            service_data: budget.copy_opt(self.service_data.as_ref())?,
            service_uuids: budget.copy_opt(self.service_uuids.as_ref())?,
            ..*self
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub adv_type: u8,
    pub own_addr_type: u8,
    pub channel_map: u8,
    pub filter_policy: u8,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            interval_min: 0x20,
            interval_max: 0x40,
            adv_type: 0,
            own_addr_type: 0,
            channel_map: 0x07,
            filter_policy: 0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Actions and events
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GapBleAction {
    ConfigAdvData = 0,
    ConfigAdvDataRaw = 1,
    ConfigScanRspDataRaw = 2,
    SetSecurityParam = 3,
    StartAdvertising = 4,
    StopAdvertising = 5,
}

/// Completion events delivered to the GAP BLE profile callback. The
/// callback payload is `Payload::Bytes([status])`, `0` meaning success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GapBleEvent {
    AdvDataSetComplete = 0,
    AdvDataRawSetComplete = 1,
    ScanRspDataRawSetComplete = 2,
    SecurityParamSetComplete = 3,
    AdvStartComplete = 4,
    AdvStopComplete = 5,
}

impl GapBleEvent {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::AdvDataSetComplete,
            1 => Self::AdvDataRawSetComplete,
            2 => Self::ScanRspDataRawSetComplete,
            3 => Self::SecurityParamSetComplete,
            4 => Self::AdvStartComplete,
            5 => Self::AdvStopComplete,
            _ => return None,
        })
    }
}

pub const STATUS_OK: u8 = 0;
pub const STATUS_BUSY: u8 = 1;
pub const STATUS_FAIL: u8 = 2;

// ───────────────────────────────────────────────────────────────
// Arguments
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapBleArgs {
    ConfigAdvData(AdvData),
    ConfigAdvDataRaw(Vec<u8>),
    ConfigScanRspDataRaw(Vec<u8>),
    SetSecurityParam { param: u8, value: Vec<u8> },
    StartAdvertising(AdvParams),
    StopAdvertising,
}

impl GapBleArgs {
    pub fn action(&self) -> GapBleAction {
        match self {
            Self::ConfigAdvData(_) => GapBleAction::ConfigAdvData,
            Self::ConfigAdvDataRaw(_) => GapBleAction::ConfigAdvDataRaw,
            Self::ConfigScanRspDataRaw(_) => GapBleAction::ConfigScanRspDataRaw,
            Self::SetSecurityParam { .. } => GapBleAction::SetSecurityParam,
            Self::StartAdvertising(_) => GapBleAction::StartAdvertising,
            Self::StopAdvertising => GapBleAction::StopAdvertising,
        }
    }

    /// Bytes a deep copy would allocate.
    pub fn heap_bytes(&self) -> usize {
        match self {
            Self::ConfigAdvData(d) => d.heap_bytes(),
            Self::ConfigAdvDataRaw(raw) | Self::ConfigScanRspDataRaw(raw) => raw.len(),
            Self::SetSecurityParam { value, .. } => value.len(),
            Self::StartAdvertising(_) | Self::StopAdvertising => 0,
        }
    }

    /// Reject malformed arguments before they are copied or queued.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::ConfigAdvData(d) => {
                match &d.service_uuids {
                    Some(uuids) if uuids.len() % UUID128_LEN != 0 => Err(
                        DispatchError::InvalidArg("service UUID list length must be a multiple of 16"),
                    ),
                    _ => Ok(()),
                }
            }
            Self::ConfigAdvDataRaw(raw) | Self::ConfigScanRspDataRaw(raw) => {
                if raw.len() > ADV_DATA_LEN_MAX {
                    return Err(DispatchError::InvalidArg("raw data longer than 31 bytes"));
                }
                Ok(())
            }
            Self::SetSecurityParam { value, .. } => {
                if value.is_empty() || value.len() > SEC_PARAM_LEN_MAX {
                    return Err(DispatchError::InvalidArg("security parameter length"));
                }
                Ok(())
            }
            Self::StartAdvertising(p) => {
                let range = ADV_INTERVAL_MIN..=ADV_INTERVAL_MAX;
                if !range.contains(&p.interval_min)
                    || !range.contains(&p.interval_max)
                    || p.interval_min > p.interval_max
                {
                    return Err(DispatchError::InvalidArg("advertising interval"));
                }
                Ok(())
            }
            Self::StopAdvertising => Ok(()),
        }
    }
}

impl Marshal for GapBleArgs {
    fn marshal(&self, budget: &mut CopyBudget) -> Result<Self, AllocError> {
        Ok(match self {
            Self::ConfigAdvData(d) => Self::ConfigAdvData(d.marshal(budget)?),
            Self::ConfigAdvDataRaw(raw) => Self::ConfigAdvDataRaw(budget.copy_bytes(raw)?),
            Self::ConfigScanRspDataRaw(raw) => {
                Self::ConfigScanRspDataRaw(budget.copy_bytes(raw)?)
            }
            Self::SetSecurityParam { param, value } => Self::SetSecurityParam {
                param: *param,
                value: budget.copy_bytes(value)?,
            },
            Self::StartAdvertising(p) => Self::StartAdvertising(*p),
            Self::StopAdvertising => Self::StopAdvertising,
        })
    }
}

/// Validate `args` and enqueue a deep copy for the GAP BLE handler.
pub fn submit<const N: usize>(tx: &Producer<N>, args: &GapBleArgs) -> Result<(), DispatchError> {
    args.validate()?;
    tx.enqueue(GroupId::GAP_BLE, args.action() as u8, args)
}

// ───────────────────────────────────────────────────────────────
// Handler
// ───────────────────────────────────────────────────────────────

/// Worker-side GAP BLE handler.
pub struct GapBleHandler {
    port: Box<dyn GapBlePort>,
}

impl GapBleHandler {
    pub fn new(port: Box<dyn GapBlePort>) -> Self {
        Self { port }
    }

    fn execute(&mut self, args: &GapBleArgs) -> (GapBleEvent, Result<(), PortError>) {
        let port = self.port.as_mut();
        match args {
            GapBleArgs::ConfigAdvData(d) => {
                (GapBleEvent::AdvDataSetComplete, port.config_adv_data(d))
            }
            GapBleArgs::ConfigAdvDataRaw(raw) => (
                GapBleEvent::AdvDataRawSetComplete,
                port.config_adv_data_raw(raw),
            ),
            GapBleArgs::ConfigScanRspDataRaw(raw) => (
                GapBleEvent::ScanRspDataRawSetComplete,
                port.config_scan_rsp_data_raw(raw),
            ),
            GapBleArgs::SetSecurityParam { param, value } => (
                GapBleEvent::SecurityParamSetComplete,
                port.set_security_param(*param, value),
            ),
            GapBleArgs::StartAdvertising(p) => {
                (GapBleEvent::AdvStartComplete, port.start_advertising(p))
            }
            GapBleArgs::StopAdvertising => (GapBleEvent::AdvStopComplete, port.stop_advertising()),
        }
    }
}

impl GroupHandler for GapBleHandler {
    fn on_call(&mut self, env: Envelope, cx: &mut WorkerContext<'_>) {
        let Payload::GapBle(args) = env.payload() else {
            warn!("gap_ble: action {} without GAP arguments", env.action());
            return;
        };
        let (event, result) = self.execute(args);
        let status = match result {
            Ok(()) => STATUS_OK,
            Err(PortError::Busy) => STATUS_BUSY,
            Err(e) => {
                warn!("gap_ble: {:?} failed: {}", args.action(), e);
                STATUS_FAIL
            }
        };
        debug!("gap_ble: {:?} -> status {}", event, status);
        cx.defer_callback(GroupId::GAP_BLE, event as u8, Payload::Bytes(vec![status]));
    }

    fn profile(&self) -> Option<ProfileId> {
        Some(ProfileId::GAP_BLE)
    }
}
