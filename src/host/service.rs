//! Host service: owns the worker thread and exposes every producer entry
//! point.
//!
//! ```text
//!  any thread ──▶ ┌──────────────┐ ──▶ dispatch queue ──▶ worker thread
//!                 │    BtHost     │                        │ handlers
//!  radio done ──▶ │ Producer · CB │                        │ ConnectionQueue
//!                 └──────────────┘ ◀── profile callbacks ──┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use log::{error, info, warn};

use super::ports::{ConnectInitiator, GapBlePort};
use crate::config::HostConfig;
use crate::connect::{
    AttemptResult, BdAddr, ConnectArgs, ConnectOutcome, ConnectRequest, ProfileQueueHandler,
    QueueHandle, ServiceId,
};
use crate::diagnostics::{FaultEntry, StatsSnapshot};
use crate::dispatch::{
    DISPATCH_QUEUE_LEN, GroupHandler, GroupId, HandlerTable, Marshal, Payload, Producer, Worker,
    WorkerState, WorkerStatus, dispatch_queue,
};
use crate::error::{self, DispatchError, Error, RangeError};
use crate::gap_ble::{self, GapBleArgs, GapBleHandler};
use crate::profile::{ProfileCallback, SharedProfileTable};
use crate::task_pin::{TaskSpec, spawn_on_core};

// ───────────────────────────────────────────────────────────────
// Builder
// ───────────────────────────────────────────────────────────────

/// Collects handlers and ports, then starts the worker.
pub struct HostBuilder {
    config: HostConfig,
    handlers: HandlerTable,
    connector: Option<Box<dyn ConnectInitiator>>,
    reserved_taken: bool,
}

impl HostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            handlers: HandlerTable::new(),
            connector: None,
            reserved_taken: false,
        }
    }

    /// Install the handler for `group`. `GroupId::PROFILE_QUEUE` is reserved
    /// for the connection queue; installing there makes `start` fail.
    pub fn handler(mut self, group: GroupId, handler: impl GroupHandler + 'static) -> Self {
        if group == GroupId::PROFILE_QUEUE {
            self.reserved_taken = true;
            return self;
        }
        if self.handlers.install(group, Box::new(handler)).is_some() {
            warn!("host: handler for {:?} replaced", group);
        }
        self
    }

    /// Install the GAP BLE module on top of `port`.
    pub fn gap_ble(self, port: impl GapBlePort + 'static) -> Self {
        self.handler(GroupId::GAP_BLE, GapBleHandler::new(Box::new(port)))
    }

    /// Radio port for the connection queue. Without one, connection
    /// requests fail with `UnknownGroup`.
    pub fn connector(mut self, radio: impl ConnectInitiator + 'static) -> Self {
        self.connector = Some(Box::new(radio));
        self
    }

    /// Validate the config and spawn the worker thread.
    pub fn start(self) -> error::Result<BtHost> {
        let Self {
            config,
            mut handlers,
            connector,
            reserved_taken,
        } = self;

        config.validate().map_err(Error::Config)?;
        if reserved_taken {
            return Err(Error::Config("PROFILE_QUEUE group is reserved"));
        }

        let connect_depth = connector.map(|radio| {
            let h = ProfileQueueHandler::new(config.max_pending_connects, radio);
            let depth = h.depth();
            handlers.install(GroupId::PROFILE_QUEUE, Box::new(h));
            depth
        });

        let (tx, rx) = dispatch_queue::<DISPATCH_QUEUE_LEN>((&config).into());
        let profiles = SharedProfileTable::new();
        let worker = Worker::new(rx, handlers, profiles.clone());
        let status = worker.status();

        let spec = TaskSpec {
            core: config.worker.core,
            priority: config.worker.priority,
            stack_kb: config.worker.stack_kb,
            name: config.worker.name.as_str(),
        };
        let join = spawn_on_core(spec, move || worker.run()).map_err(|e| {
            error!("host: worker spawn failed: {}", e);
            Error::Spawn
        })?;

        info!(
            "host: started (policy={:?}, congest>{}, payload<={}B)",
            config.enqueue_policy, config.congest_threshold, config.max_payload_bytes
        );

        Ok(BtHost {
            tx,
            profiles,
            status,
            worker: Some(join),
            next_handle: AtomicU32::new(1),
            connect_depth,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// BtHost
// ───────────────────────────────────────────────────────────────

/// Running host. Safe to share between threads.
pub struct BtHost {
    tx: Producer,
    profiles: SharedProfileTable,
    status: Arc<WorkerStatus>,
    worker: Option<JoinHandle<()>>,
    next_handle: AtomicU32,
    connect_depth: Option<Arc<AtomicUsize>>,
}

impl BtHost {
    // ── Dispatch ──────────────────────────────────────────────

    /// Deep-copy `args` and queue an API call for `group`.
    pub fn enqueue<A>(&self, group: GroupId, action: u8, args: &A) -> Result<(), DispatchError>
    where
        A: Marshal + Into<Payload>,
    {
        self.tx.enqueue(group, action, args)
    }

    /// Queue an API call, moving `payload` in without a copy.
    pub fn enqueue_owned(
        &self,
        group: GroupId,
        action: u8,
        payload: Payload,
    ) -> Result<(), DispatchError> {
        self.tx.enqueue_owned(group, action, payload)
    }

    /// Queue a stack event for `group`'s profile callback.
    pub fn post_callback(
        &self,
        group: GroupId,
        event: u8,
        payload: Payload,
    ) -> Result<(), DispatchError> {
        self.tx.post_callback(group, event, payload)
    }

    /// Validate and queue a GAP BLE call.
    pub fn gap_ble(&self, args: &GapBleArgs) -> Result<(), DispatchError> {
        gap_ble::submit(&self.tx, args)
    }

    /// Producer handle for threads that do not hold the host.
    pub fn producer(&self) -> Producer {
        self.tx.clone()
    }

    // ── Profile callbacks ─────────────────────────────────────

    pub fn register_callback(&self, id: u8, cb: ProfileCallback) -> Result<(), RangeError> {
        self.profiles.register(id, cb)
    }

    /// Returns whether a callback was registered.
    pub fn unregister_callback(&self, id: u8) -> Result<bool, RangeError> {
        self.profiles.unregister(id)
    }

    pub fn callback(&self, id: u8) -> Option<ProfileCallback> {
        self.profiles.get(id)
    }

    // ── Connection queue ──────────────────────────────────────

    /// Queue an outgoing connection. `on_done` runs exactly once, whatever
    /// happens to the request. Normally it runs on the worker thread. On `Err`
    /// the request was never queued and `on_done` gets `Cancelled` right
    /// away. A request accepted while the host is shutting down is answered
    /// `Cancelled` by whichever thread drops the last queue handle.
    pub fn request_connect<F>(
        &self,
        service: ServiceId,
        address: BdAddr,
        on_done: F,
    ) -> Result<QueueHandle, DispatchError>
    where
        F: Fn(ConnectOutcome) + Send + Sync + 'static,
    {
        let handle = QueueHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let req = ConnectRequest::new(handle, address, service, Arc::new(on_done));
        self.send_connect(ConnectArgs::Connect(req))?;
        Ok(handle)
    }

    /// Withdraw a request that has not started yet.
    pub fn cancel_connect(&self, handle: QueueHandle) -> Result<(), DispatchError> {
        self.send_connect(ConnectArgs::Cancel(handle))
    }

    /// The radio finished the in-flight attempt.
    pub fn connect_finished(&self, result: AttemptResult) -> Result<(), DispatchError> {
        self.send_connect(ConnectArgs::Advance(result))
    }

    /// Drop every queued request, each completing with `Cancelled`.
    pub fn release_connections(&self) -> Result<(), DispatchError> {
        self.send_connect(ConnectArgs::Release)
    }

    /// Requests in the connection queue, as of the last worker update.
    pub fn pending_connects(&self) -> usize {
        self.connect_depth
            .as_ref()
            .map_or(0, |d| d.load(Ordering::Acquire))
    }

    fn send_connect(&self, args: ConnectArgs) -> Result<(), DispatchError> {
        let action = args.action() as u8;
        self.tx
            .enqueue_owned(GroupId::PROFILE_QUEUE, action, Payload::Connect(args))
    }

    // ── Status ────────────────────────────────────────────────

    pub fn queue_len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_congested(&self) -> bool {
        self.tx.is_congested()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.status.get()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.tx.stats().snapshot()
    }

    /// Most recent handler faults, oldest first.
    pub fn faults(&self) -> heapless::Vec<FaultEntry, 4> {
        self.tx.stats().faults()
    }

    /// True when called from the worker thread (inside a handler or callback).
    pub fn is_worker_context(&self) -> bool {
        self.tx.on_consumer_thread()
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Stop the worker after it drains what is already queued, then clear
    /// the callback table. Pending connection requests complete with
    /// `Cancelled`. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(join) = self.worker.take() else {
            return;
        };
        self.tx.close();
        if self.is_worker_context() {
            // Cannot join ourselves; the loop exits after this handler.
            warn!("host: shutdown requested from the worker thread");
        } else if join.join().is_err() {
            error!("host: worker thread panicked outside a handler");
        }
        self.profiles.reset_all();
        info!("host: shut down");
    }
}

impl Drop for BtHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
