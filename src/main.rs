//! btcore: ESP-IDF entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Adapters (outer ring)                    │
//! │   LogRadio (ConnectInitiator + GapBlePort)               │
//! │                                                          │
//! │  ─────────────── Port Trait Boundary ──────────────────  │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  BtHost: dispatch queue · worker · profile table   │  │
//! │  │          connection serialization queue            │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use btcore::adapters::log_radio::LogRadio;
use btcore::connect::{BdAddr, ServiceId};
use btcore::diagnostics;
use btcore::gap_ble::{AdvParams, GapBleArgs, GapBleEvent};
use btcore::{Envelope, HostBuilder, HostConfig, Payload, ProfileId};

/// Seconds between stats reports.
const STATS_INTERVAL_SECS: u64 = 30;

fn load_config() -> HostConfig {
    // Optional build-time override, e.g. BTCORE_CONFIG='{"enqueue_policy":...}'.
    match option_env!("BTCORE_CONFIG") {
        Some(json) => match serde_json::from_str::<HostConfig>(json) {
            Ok(cfg) => {
                info!("Config loaded from BTCORE_CONFIG");
                cfg
            }
            Err(e) => {
                warn!("BTCORE_CONFIG invalid ({}), using defaults", e);
                HostConfig::default()
            }
        },
        None => HostConfig::default(),
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    diagnostics::install_panic_handler();

    info!("btcore v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Host ───────────────────────────────────────────────
    let host = HostBuilder::new(load_config())
        .gap_ble(LogRadio::new())
        .connector(LogRadio::new())
        .start()?;

    host.register_callback(
        ProfileId::GAP_BLE.raw(),
        Arc::new(|env: &Envelope| {
            let status = match env.payload() {
                Payload::Bytes(b) => b.first().copied(),
                _ => None,
            };
            info!(
                "GAP | {:?} status={:?}",
                GapBleEvent::from_raw(env.action()),
                status
            );
        }),
    )?;

    // ── 3. Advertise ──────────────────────────────────────────
    host.gap_ble(&GapBleArgs::ConfigAdvDataRaw(vec![
        0x02, 0x01, 0x06, // flags: LE general discoverable, BR/EDR unsupported
        0x07, 0x09, b'b', b't', b'c', b'o', b'r', b'e', // complete local name
    ]))?;
    host.gap_ble(&GapBleArgs::StartAdvertising(AdvParams::default()))?;

    // Demo peer; the logging radio accepts every attempt.
    host.request_connect(ServiceId(0x180D), BdAddr([0x24, 0x0A, 0xC4, 0, 0, 1]), |outcome| {
        info!("CONNECT | heart rate peer -> {:?}", outcome);
    })?;

    // ── 4. Report ─────────────────────────────────────────────
    loop {
        std::thread::sleep(Duration::from_secs(STATS_INTERVAL_SECS));
        match serde_json::to_string(&host.stats()) {
            Ok(json) => info!("STATS | {}", json),
            Err(e) => warn!("STATS | encode failed: {}", e),
        }
        if host.is_congested() {
            warn!("STATS | dispatch queue congested ({} queued)", host.queue_len());
        }
    }
}
