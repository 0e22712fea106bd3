//! Log-based radio adapter.
//!
//! Implements [`ConnectInitiator`] and [`GapBlePort`] by writing every
//! command to the logger and accepting it. Used by the simulation binary
//! and as the default port before a controller adapter is wired in.
//! A controller-backed adapter would implement the same traits.

use log::info;

use crate::connect::{BdAddr, ServiceId};
use crate::gap_ble::{AdvData, AdvParams};
use crate::host::ports::{ConnectInitiator, GapBlePort, PortError};

/// Adapter that logs every radio command to the serial console.
#[derive(Debug, Default)]
pub struct LogRadio {
    commands: u32,
}

impl LogRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands accepted so far.
    pub fn commands(&self) -> u32 {
        self.commands
    }

    fn accept(&mut self) -> Result<(), PortError> {
        self.commands += 1;
        Ok(())
    }
}

impl ConnectInitiator for LogRadio {
    fn initiate(&mut self, address: BdAddr, service: ServiceId) -> Result<(), PortError> {
        info!("RADIO | connect {} service={:?}", address, service);
        self.accept()
    }
}

impl GapBlePort for LogRadio {
    fn config_adv_data(&mut self, data: &AdvData) -> Result<(), PortError> {
        info!(
            "RADIO | adv data | scan_rsp={} name={} txpwr={} appearance=0x{:04x} \
             mfr={}B svc_data={}B uuids={}B flag=0x{:02x}",
            data.set_scan_rsp,
            data.include_name,
            data.include_txpower,
            data.appearance,
            data.manufacturer.as_ref().map_or(0, Vec::len),
            data.service_data.as_ref().map_or(0, Vec::len),
            data.service_uuids.as_ref().map_or(0, Vec::len),
            data.flag,
        );
        self.accept()
    }

    fn config_adv_data_raw(&mut self, raw: &[u8]) -> Result<(), PortError> {
        info!("RADIO | adv data raw | {:02x?}", raw);
        self.accept()
    }

    fn config_scan_rsp_data_raw(&mut self, raw: &[u8]) -> Result<(), PortError> {
        info!("RADIO | scan rsp raw | {:02x?}", raw);
        self.accept()
    }

    fn set_security_param(&mut self, param: u8, value: &[u8]) -> Result<(), PortError> {
        info!("RADIO | security param {} = {}B", param, value.len());
        self.accept()
    }

    fn start_advertising(&mut self, params: &AdvParams) -> Result<(), PortError> {
        info!(
            "RADIO | adv start | interval={}..{} type={} ch=0x{:02x}",
            params.interval_min, params.interval_max, params.adv_type, params.channel_map
        );
        self.accept()
    }

    fn stop_advertising(&mut self) -> Result<(), PortError> {
        info!("RADIO | adv stop");
        self.accept()
    }
}
