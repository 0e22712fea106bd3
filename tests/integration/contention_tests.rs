//! Producers competing for a full queue, and producers racing shutdown.

use crate::mock_radio::MockRadio;
use btcore::connect::{
    BdAddr, ConnectAction, ConnectArgs, ConnectOutcome, ConnectRequest, QueueHandle, ServiceId,
};
use btcore::dispatch::{
    Envelope, GroupHandler, GroupId, HandlerTable, Payload, QueueSettings, Worker, WorkerContext,
    dispatch_queue,
};
use btcore::profile::SharedProfileTable;
use btcore::{DispatchError, EnqueuePolicy, HostBuilder, HostConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAITERS: u8 = 4;

fn blocking(timeout_ms: u32) -> QueueSettings {
    QueueSettings {
        policy: EnqueuePolicy::Block { timeout_ms },
        max_payload_bytes: 64,
        congest_threshold: 1,
    }
}

/// Records the first byte of every call.
struct Tags(Arc<Mutex<Vec<u8>>>);

impl GroupHandler for Tags {
    fn on_call(&mut self, env: Envelope, _cx: &mut WorkerContext<'_>) {
        if let Payload::Bytes(b) = env.payload() {
            self.0.lock().unwrap().push(b[0]);
        }
    }
}

fn tagged(tag: u8) -> Payload {
    Payload::Bytes(vec![tag])
}

/// CPU ticks (user + system) the calling thread has used so far.
#[cfg(target_os = "linux")]
fn thread_cpu_ticks() -> u64 {
    let stat = std::fs::read_to_string("/proc/thread-self/stat").unwrap();
    // The command name may hold spaces; fields resume after its ')'.
    let rest = &stat[stat.rfind(')').unwrap() + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields[11].parse().unwrap();
    let stime: u64 = fields[12].parse().unwrap();
    utime + stime
}

// ── Several producers blocked on a full queue ─────────────────

#[cfg(target_os = "linux")]
#[test]
fn blocked_producers_sleep_until_timeout() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut table = HandlerTable::new();
    table.install(GroupId::SPP, Box::new(Tags(seen.clone())));
    let (tx, rx) = dispatch_queue::<1>(blocking(600));
    let worker = Worker::new(rx, table, SharedProfileTable::new());
    tx.enqueue_owned(GroupId::SPP, 0, tagged(0)).unwrap();

    let waiters: Vec<_> = (1..=WAITERS)
        .map(|tag| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                let before = thread_cpu_ticks();
                let result = tx.enqueue_owned(GroupId::SPP, 0, tagged(tag));
                (result, thread_cpu_ticks() - before)
            })
        })
        .collect();

    for waiter in waiters {
        let (result, ticks) = waiter.join().unwrap();
        assert_eq!(result, Err(DispatchError::Timeout));
        // 600 ms of spinning would be about 60 ticks.
        assert!(ticks < 20, "waiting producer burned {ticks} ticks");
    }
    assert_eq!(tx.stats().snapshot().timeouts, u32::from(WAITERS));

    let worker_thread = std::thread::spawn(move || worker.run());
    tx.close();
    worker_thread.join().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

#[test]
fn blocked_producers_are_served_in_arrival_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut table = HandlerTable::new();
    table.install(GroupId::SPP, Box::new(Tags(seen.clone())));
    let (tx, rx) = dispatch_queue::<1>(blocking(5000));
    let worker = Worker::new(rx, table, SharedProfileTable::new());
    tx.enqueue_owned(GroupId::SPP, 0, tagged(0)).unwrap();

    let mut waiters = Vec::new();
    for tag in 1..=WAITERS {
        let tx = tx.clone();
        waiters.push(std::thread::spawn(move || {
            tx.enqueue_owned(GroupId::SPP, 0, tagged(tag))
        }));
        // Let this producer park before the next one arrives.
        std::thread::sleep(Duration::from_millis(50));
    }

    let worker_thread = std::thread::spawn(move || worker.run());
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
    tx.close();
    worker_thread.join().unwrap();

    assert_eq!(*seen.lock().unwrap(), (0..=WAITERS).collect::<Vec<_>>());
    let stats = tx.stats().snapshot();
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.dispatched, u32::from(WAITERS) + 1);
}

// ── Producers racing shutdown ─────────────────────────────────

#[test]
fn requests_racing_shutdown_are_answered_once() {
    for round in 0..100u64 {
        let radio = MockRadio::new();
        let config = HostConfig {
            enqueue_policy: EnqueuePolicy::NonBlocking,
            max_pending_connects: 64,
            ..HostConfig::default()
        };
        let mut host = HostBuilder::new(config)
            .connector(radio.clone())
            .start()
            .unwrap();

        let answers: Arc<Mutex<Vec<(u32, ConnectOutcome)>>> = Arc::default();
        let tx = host.producer();
        let log = answers.clone();
        let spammer = std::thread::spawn(move || {
            let mut issued = 0u32;
            loop {
                issued += 1;
                let handle = issued;
                let log = log.clone();
                let req = ConnectRequest::new(
                    QueueHandle(handle),
                    BdAddr([0, 0, 0, 0, (handle >> 8) as u8, handle as u8]),
                    ServiceId(0x1101),
                    Arc::new(move |o: ConnectOutcome| log.lock().unwrap().push((handle, o))),
                );
                let result = tx.enqueue_owned(
                    GroupId::PROFILE_QUEUE,
                    ConnectAction::Connect as u8,
                    Payload::Connect(ConnectArgs::Connect(req)),
                );
                if result == Err(DispatchError::Stopped) {
                    return issued;
                }
            }
        });

        std::thread::sleep(Duration::from_micros(round * 37 % 400));
        host.shutdown();
        let issued = spammer.join().unwrap();
        drop(host);

        let mut per_handle: HashMap<u32, usize> = HashMap::new();
        for (handle, _) in answers.lock().unwrap().iter() {
            *per_handle.entry(*handle).or_default() += 1;
        }
        assert_eq!(per_handle.len(), issued as usize, "round {round}");
        assert!(per_handle.values().all(|n| *n == 1), "round {round}");
    }
}
