//! Fuzz target: `ConnectionQueue`
//!
//! Each input byte is one operation on the queue. Checks that:
//! - No operation panics
//! - At most one node is busy, and only the head
//! - Every accepted request completes exactly once after `release`
//!
//! cargo fuzz run fuzz_connect_queue

#![no_main]

use btcore::connect::{
    AttemptResult, BdAddr, ConnectOutcome, ConnectRequest, ConnectionQueue, QueueHandle, ServiceId,
};
use btcore::host::ports::{ConnectInitiator, PortError};
use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, Mutex};

/// Fails whenever the low bit of the next script byte is set.
struct ByteRadio<'a> {
    script: &'a [u8],
    pos: usize,
}

impl ConnectInitiator for ByteRadio<'_> {
    fn initiate(&mut self, _address: BdAddr, _service: ServiceId) -> Result<(), PortError> {
        let b = self.script.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        if b & 1 == 0 { Ok(()) } else { Err(PortError::Controller(-1)) }
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&limit, ops)) = data.split_first() else {
        return;
    };
    let max_pending = (limit as usize % 8) + 1;
    let mut queue = ConnectionQueue::new(max_pending);
    let mut radio = ByteRadio { script: ops, pos: 0 };
    let done: Arc<Mutex<Vec<u32>>> = Arc::default();
    let mut issued = 0u32;

    for &op in ops {
        match op % 5 {
            0 | 1 => {
                issued += 1;
                let handle = issued;
                let log = done.clone();
                let req = ConnectRequest::new(
                    QueueHandle(handle),
                    BdAddr([op; 6]),
                    ServiceId(u16::from(op)),
                    Arc::new(move |_: ConnectOutcome| {
                        log.lock().unwrap().push(handle);
                    }),
                );
                queue.request_connect(req, &mut radio);
            }
            2 => {
                let result = if op & 0x80 == 0 {
                    AttemptResult::Connected
                } else {
                    AttemptResult::Failed
                };
                queue.advance(result, &mut radio);
            }
            3 => {
                queue.cancel(QueueHandle(u32::from(op >> 3)));
            }
            _ => queue.release(),
        }
        assert!(queue.invariant_holds(), "busy node invariant broken");
        assert!(queue.len() <= max_pending, "queue grew past its limit");
    }

    queue.release();
    let mut done = done.lock().unwrap().clone();
    done.sort_unstable();
    assert_eq!(done, (1..=issued).collect::<Vec<_>>(), "request lost or completed twice");
});
