//! Worker-side owner of the connection queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;

use super::{ConnectArgs, ConnectionQueue};
use crate::dispatch::{Envelope, GroupHandler, Payload, WorkerContext};
use crate::host::ports::ConnectInitiator;

/// Handler for `GroupId::PROFILE_QUEUE`. Owns the [`ConnectionQueue`] and
/// the radio port, both touched only from the worker thread.
pub struct ProfileQueueHandler {
    queue: ConnectionQueue,
    radio: Box<dyn ConnectInitiator>,
    depth: Arc<AtomicUsize>,
}

impl ProfileQueueHandler {
    pub fn new(max_pending: usize, radio: Box<dyn ConnectInitiator>) -> Self {
        Self {
            queue: ConnectionQueue::new(max_pending),
            radio,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue length mirror readable from other threads.
    pub fn depth(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }

    fn apply(&mut self, args: ConnectArgs) {
        let radio = self.radio.as_mut();
        match args {
            ConnectArgs::Connect(req) => self.queue.request_connect(req, radio),
            ConnectArgs::Advance(result) => self.queue.advance(result, radio),
            ConnectArgs::Release => self.queue.release(),
            ConnectArgs::Cancel(handle) => {
                if !self.queue.cancel(handle) {
                    warn!("connect: {:?} not pending, cancel ignored", handle);
                }
            }
        }
        debug_assert!(self.queue.invariant_holds());
        self.depth.store(self.queue.len(), Ordering::Release);
    }
}

impl GroupHandler for ProfileQueueHandler {
    fn on_call(&mut self, env: Envelope, _cx: &mut WorkerContext<'_>) {
        let action = env.action();
        match env.into_payload() {
            Payload::Connect(args) => self.apply(args),
            other => warn!(
                "connect: action {} with unexpected payload {:?}",
                action, other
            ),
        }
    }
}

impl Drop for ProfileQueueHandler {
    /// Tearing down the worker must still answer every pending request.
    fn drop(&mut self) {
        self.queue.release();
        self.depth.store(0, Ordering::Release);
    }
}
