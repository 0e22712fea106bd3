//! Full host: builder → worker thread → handlers → profile callbacks.

use crate::mock_radio::{GapCall, MockGap, wait_until};
use btcore::dispatch::{Envelope, GroupHandler, GroupId, Payload, WorkerContext, WorkerState};
use btcore::gap_ble::{AdvData, GapBleArgs, GapBleEvent, STATUS_BUSY, STATUS_OK};
use btcore::{
    DispatchError, EnqueuePolicy, HostBuilder, HostConfig, PROFILE_COUNT, ProfileId, RangeError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config(policy: EnqueuePolicy) -> HostConfig {
    HostConfig {
        enqueue_policy: policy,
        ..HostConfig::default()
    }
}

/// Forwards each call's bytes to the test thread.
struct Capture(Mutex<Sender<(u8, Vec<u8>)>>);

impl GroupHandler for Capture {
    fn on_call(&mut self, env: Envelope, _cx: &mut WorkerContext<'_>) {
        let bytes = match env.payload() {
            Payload::Bytes(b) => b.clone(),
            _ => Vec::new(),
        };
        let _ = self.0.lock().unwrap().send((env.action(), bytes));
    }
}

fn capture() -> (Capture, Receiver<(u8, Vec<u8>)>) {
    let (tx, rx) = mpsc::channel();
    (Capture(Mutex::new(tx)), rx)
}

/// Blocks the worker inside its first call until the test opens the gate.
struct Gate(Mutex<Receiver<()>>);

impl GroupHandler for Gate {
    fn on_call(&mut self, _env: Envelope, _cx: &mut WorkerContext<'_>) {
        let _ = self.0.lock().unwrap().recv_timeout(WAIT);
    }
}

/// Panics on action 0, counts everything else.
struct Fragile(Arc<AtomicUsize>);

impl GroupHandler for Fragile {
    fn on_call(&mut self, env: Envelope, _cx: &mut WorkerContext<'_>) {
        if env.action() == 0 {
            panic!("fragile handler hit action 0");
        }
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Ownership (producer overwrites its buffer) ────────────────

#[test]
fn dispatched_payload_keeps_original_bytes() {
    let (handler, seen) = capture();
    let mut host = HostBuilder::new(config(EnqueuePolicy::NonBlocking))
        .handler(GroupId::GAP_BLE, handler)
        .start()
        .unwrap();

    let original: Vec<u8> = (1..=10).collect();
    let mut buf = Payload::Bytes(original.clone());
    host.enqueue(GroupId::GAP_BLE, 5, &buf).unwrap();
    if let Payload::Bytes(b) = &mut buf {
        b.iter_mut().for_each(|x| *x = 0);
    }

    let (action, bytes) = seen.recv_timeout(WAIT).unwrap();
    assert_eq!(action, 5);
    assert_eq!(bytes, original);
    host.shutdown();
}

// ── Backpressure ──────────────────────────────────────────────

#[test]
fn full_queue_nonblocking_fails_fast() {
    let (open, gate) = mpsc::channel();
    let mut host = HostBuilder::new(config(EnqueuePolicy::NonBlocking))
        .handler(GroupId::GATTS, Gate(Mutex::new(gate)))
        .start()
        .unwrap();

    host.enqueue(GroupId::GATTS, 0, &Payload::Empty).unwrap();
    assert!(wait_until(WAIT, || host.worker_state() == WorkerState::Dispatching));

    let mut accepted = 0;
    let err = loop {
        match host.enqueue(GroupId::GATTS, 1, &Payload::Empty) {
            Ok(()) => accepted += 1,
            Err(e) => break e,
        }
    };
    assert_eq!(err, DispatchError::QueueFull);
    assert_eq!(accepted, btcore::dispatch::DISPATCH_QUEUE_LEN);
    assert!(host.is_congested());

    for _ in 0..=accepted {
        open.send(()).unwrap();
    }
    assert!(wait_until(WAIT, || host.queue_len() == 0));
    host.shutdown();
    assert_eq!(host.stats().queue_full, 1);
}

#[test]
fn full_queue_blocking_times_out() {
    let (open, gate) = mpsc::channel();
    let mut host = HostBuilder::new(config(EnqueuePolicy::Block { timeout_ms: 30 }))
        .handler(GroupId::GATTS, Gate(Mutex::new(gate)))
        .start()
        .unwrap();

    host.enqueue(GroupId::GATTS, 0, &Payload::Empty).unwrap();
    assert!(wait_until(WAIT, || host.worker_state() == WorkerState::Dispatching));
    for _ in 0..btcore::dispatch::DISPATCH_QUEUE_LEN {
        host.enqueue(GroupId::GATTS, 1, &Payload::Empty).unwrap();
    }
    assert_eq!(
        host.enqueue(GroupId::GATTS, 2, &Payload::Empty),
        Err(DispatchError::Timeout)
    );

    for _ in 0..=btcore::dispatch::DISPATCH_QUEUE_LEN {
        open.send(()).unwrap();
    }
    host.shutdown();
    assert_eq!(host.stats().timeouts, 1);
}

/// Routes callbacks for its group to `ProfileId::GATTC`.
struct Routed;

impl GroupHandler for Routed {
    fn on_call(&mut self, _env: Envelope, _cx: &mut WorkerContext<'_>) {}

    fn profile(&self) -> Option<ProfileId> {
        Some(ProfileId::GATTC)
    }
}

#[test]
fn enqueue_from_worker_thread_never_blocks() {
    let len = btcore::dispatch::DISPATCH_QUEUE_LEN;
    let sink_hits = Arc::new(AtomicUsize::new(0));
    let mut host = HostBuilder::new(config(EnqueuePolicy::Block { timeout_ms: 60_000 }))
        .handler(GroupId::GATTC, Fragile(sink_hits.clone()))
        .handler(GroupId::GATTS, Routed)
        .start()
        .unwrap();

    let (report, results) = mpsc::channel();
    let report = Mutex::new(report);
    let producer = host.producer();
    host.register_callback(
        ProfileId::GATTC.raw(),
        Arc::new(move |_: &Envelope| {
            // One more than fits: the worker is busy here, so nothing drains.
            let outcome: Vec<_> = (0..=len)
                .map(|_| producer.enqueue(GroupId::GATTC, 1, &Payload::Empty))
                .collect();
            let _ = report
                .lock()
                .unwrap()
                .send((producer.on_consumer_thread(), outcome));
        }),
    )
    .unwrap();

    host.post_callback(GroupId::GATTS, 0, Payload::Empty).unwrap();
    let (on_worker, outcome) = results.recv_timeout(WAIT).unwrap();
    assert!(on_worker);
    assert!(outcome[..len].iter().all(Result::is_ok));
    assert_eq!(outcome.last(), Some(&Err(DispatchError::QueueFull)));

    host.shutdown();
    assert_eq!(sink_hits.load(Ordering::SeqCst), len);
}

// ── Faults ────────────────────────────────────────────────────

#[test]
fn handler_panic_is_logged_and_worker_continues() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut host = HostBuilder::new(config(EnqueuePolicy::NonBlocking))
        .handler(GroupId::A2DP, Fragile(hits.clone()))
        .start()
        .unwrap();

    host.enqueue(GroupId::A2DP, 1, &Payload::Empty).unwrap();
    host.enqueue(GroupId::A2DP, 0, &Payload::Bytes(vec![9; 16])).unwrap();
    host.enqueue(GroupId::A2DP, 2, &Payload::Empty).unwrap();
    assert!(wait_until(WAIT, || hits.load(Ordering::SeqCst) == 2));

    let faults = host.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].group, GroupId::A2DP.raw());
    assert_eq!(faults[0].action, 0);
    assert_eq!(faults[0].reason.as_str(), "fragile handler hit action 0");
    assert_ne!(host.worker_state(), WorkerState::Stopped);
    host.shutdown();
    assert_eq!(host.worker_state(), WorkerState::Stopped);
}

#[test]
fn unknown_group_is_rejected_at_enqueue() {
    let mut host = HostBuilder::new(HostConfig::default()).start().unwrap();
    assert_eq!(
        host.enqueue(GroupId::HF, 0, &Payload::Empty),
        Err(DispatchError::UnknownGroup(GroupId::HF))
    );
    assert_eq!(host.queue_len(), 0);
    host.shutdown();
    assert_eq!(
        host.enqueue(GroupId::HF, 0, &Payload::Empty),
        Err(DispatchError::Stopped)
    );
}

#[test]
fn invalid_config_and_reserved_group_fail_start() {
    let bad = HostConfig {
        max_payload_bytes: 0,
        ..HostConfig::default()
    };
    assert!(HostBuilder::new(bad).start().is_err());

    let (handler, _rx) = capture();
    assert!(
        HostBuilder::new(HostConfig::default())
            .handler(GroupId::PROFILE_QUEUE, handler)
            .start()
            .is_err()
    );
}

// ── Profile callback table ────────────────────────────────────

#[test]
fn register_and_lookup_are_range_checked() {
    let mut host = HostBuilder::new(HostConfig::default()).start().unwrap();
    let cb: btcore::ProfileCallback = Arc::new(|_: &Envelope| {});

    host.register_callback(3, cb.clone()).unwrap();
    assert!(Arc::ptr_eq(&host.callback(3).unwrap(), &cb));
    assert!(host.callback(99).is_none());
    assert_eq!(
        host.register_callback(99, cb.clone()),
        Err(RangeError { id: 99, limit: PROFILE_COUNT })
    );
    assert_eq!(host.unregister_callback(3), Ok(true));
    assert!(host.callback(3).is_none());

    host.register_callback(4, cb).unwrap();
    host.shutdown();
    assert!(host.callback(4).is_none());
}

#[test]
fn worker_context_is_detected_inside_callbacks() {
    struct SppRouted;
    impl GroupHandler for SppRouted {
        fn on_call(&mut self, _env: Envelope, _cx: &mut WorkerContext<'_>) {}
        fn profile(&self) -> Option<ProfileId> {
            Some(ProfileId::SPP)
        }
    }

    let mut host = HostBuilder::new(HostConfig::default())
        .handler(GroupId::SPP, SppRouted)
        .start()
        .unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let producer = host.producer();
    host.register_callback(
        ProfileId::SPP.raw(),
        Arc::new(move |env: &Envelope| {
            let _ = tx
                .lock()
                .unwrap()
                .send((env.action(), producer.on_consumer_thread()));
        }),
    )
    .unwrap();

    assert!(!host.is_worker_context());
    host.post_callback(GroupId::SPP, 42, Payload::Empty).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (42, true));
    host.shutdown();
}

// ── GAP BLE module ────────────────────────────────────────────

#[test]
fn gap_call_reaches_port_and_reports_completion() {
    let gap = MockGap::new();
    let mut host = HostBuilder::new(HostConfig::default())
        .gap_ble(gap.clone())
        .start()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    host.register_callback(
        ProfileId::GAP_BLE.raw(),
        Arc::new(move |env: &Envelope| {
            let status = match env.payload() {
                Payload::Bytes(b) => b[0],
                _ => 0xFF,
            };
            let _ = tx
                .lock()
                .unwrap()
                .send((GapBleEvent::from_raw(env.action()), status));
        }),
    )
    .unwrap();

    let data = AdvData {
        include_name: true,
        manufacturer: Some(vec![0x4C, 0x00]),
        service_uuids: Some(vec![0xAB; 16]),
        ..AdvData::default()
    };
    host.gap_ble(&GapBleArgs::ConfigAdvData(data.clone())).unwrap();
    let sent = data.clone();
    drop(data);

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (Some(GapBleEvent::AdvDataSetComplete), STATUS_OK)
    );
    assert_eq!(gap.calls(), [GapCall::AdvData(sent)]);

    host.gap_ble(&GapBleArgs::StopAdvertising).unwrap();
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (Some(GapBleEvent::AdvStopComplete), STATUS_OK)
    );
    host.shutdown();
}

#[test]
fn gap_busy_port_reports_busy_status() {
    let gap = MockGap {
        busy: true,
        ..MockGap::new()
    };
    let mut host = HostBuilder::new(HostConfig::default())
        .gap_ble(gap.clone())
        .start()
        .unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    host.register_callback(
        ProfileId::GAP_BLE.raw(),
        Arc::new(move |env: &Envelope| {
            if let Payload::Bytes(b) = env.payload() {
                let _ = tx.lock().unwrap().send(b[0]);
            }
        }),
    )
    .unwrap();

    host.gap_ble(&GapBleArgs::ConfigAdvDataRaw(vec![0x02, 0x01, 0x06]))
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), STATUS_BUSY);
    host.shutdown();
}

#[test]
fn malformed_gap_args_never_reach_the_queue() {
    let gap = MockGap::new();
    let mut host = HostBuilder::new(HostConfig::default())
        .gap_ble(gap.clone())
        .start()
        .unwrap();

    let bad_uuids = AdvData {
        service_uuids: Some(vec![0; 20]),
        ..AdvData::default()
    };
    assert!(matches!(
        host.gap_ble(&GapBleArgs::ConfigAdvData(bad_uuids)),
        Err(DispatchError::InvalidArg(_))
    ));
    assert!(matches!(
        host.gap_ble(&GapBleArgs::ConfigScanRspDataRaw(vec![0; 40])),
        Err(DispatchError::InvalidArg(_))
    ));
    host.shutdown();
    assert!(gap.calls().is_empty());
    assert_eq!(host.stats().enqueued, 0);
}

#[test]
fn oversized_payload_fails_with_allocation_error() {
    let (handler, seen) = capture();
    let mut host = HostBuilder::new(HostConfig {
        max_payload_bytes: 32,
        ..HostConfig::default()
    })
    .handler(GroupId::GATTC, handler)
    .start()
    .unwrap();

    let big = Payload::Bytes(vec![1; 33]);
    assert_eq!(
        host.enqueue(GroupId::GATTC, 0, &big),
        Err(DispatchError::AllocationFailed)
    );
    // Moving the payload in skips the copy and its budget.
    host.enqueue_owned(GroupId::GATTC, 1, big).unwrap();
    assert_eq!(seen.recv_timeout(WAIT).unwrap().0, 1);
    host.shutdown();
    assert_eq!(host.stats().alloc_failures, 1);
}
