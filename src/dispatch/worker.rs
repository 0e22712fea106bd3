//! The single consuming loop.
//!
//! The worker owns every group handler and, through them, all protocol-stack
//! state. It alternates between two states: `Idle` (blocked in `dequeue`)
//! and `Dispatching` (running one handler). Handlers never see the consumer
//! half, so they cannot re-enter `dequeue`; follow-up work goes through
//! [`WorkerContext::defer`] and runs right after the current handler.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, error, info, warn};

use super::envelope::{Envelope, Signal};
use super::marshal::Payload;
use super::queue::Consumer;
use super::{DISPATCH_QUEUE_LEN, GroupId};
use crate::diagnostics::{DispatchStats, panic_reason};
use crate::error::HandlerPanic;
use crate::profile::{ProfileId, SharedProfileTable};

// ───────────────────────────────────────────────────────────────
// Handlers
// ───────────────────────────────────────────────────────────────

/// Per-group message handler, run only on the worker thread.
///
/// The handler takes the envelope by value; dropping it (or letting it go
/// out of scope) releases the payload.
pub trait GroupHandler: Send {
    /// An API call for this group.
    fn on_call(&mut self, env: Envelope, cx: &mut WorkerContext<'_>);

    /// A stack-originated event for this group. By default it is forwarded
    /// to the profile callback named by [`GroupHandler::profile`].
    fn on_callback(&mut self, env: Envelope, cx: &mut WorkerContext<'_>) {
        match self.profile() {
            Some(profile) => {
                if !cx.profiles().notify(profile, &env) {
                    debug!(
                        "worker: no callback for {:?}, dropping event {}",
                        profile,
                        env.action()
                    );
                }
            }
            None => debug!(
                "worker: {:?} has no profile, dropping event {}",
                env.group(),
                env.action()
            ),
        }
    }

    /// Profile that receives this group's callbacks.
    fn profile(&self) -> Option<ProfileId> {
        None
    }
}

/// `group -> handler` routing table, fixed before the worker starts.
pub struct HandlerTable {
    slots: [Option<Box<dyn GroupHandler>>; GroupId::COUNT],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; GroupId::COUNT],
        }
    }

    /// Install `handler` for `group`, returning the handler it replaced.
    pub fn install(
        &mut self,
        group: GroupId,
        handler: Box<dyn GroupHandler>,
    ) -> Option<Box<dyn GroupHandler>> {
        self.slots[group.index()].replace(handler)
    }

    pub fn contains(&self, group: GroupId) -> bool {
        self.slots[group.index()].is_some()
    }

    /// Groups that have a handler, ascending.
    pub fn installed(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .filter_map(|(i, _)| GroupId::new(i as u8).ok())
    }

    fn get_mut(&mut self, group: GroupId) -> Option<&mut Box<dyn GroupHandler>> {
        self.slots[group.index()].as_mut()
    }
}

// ───────────────────────────────────────────────────────────────
// Handler context
// ───────────────────────────────────────────────────────────────

/// What a handler may touch besides its own state.
pub struct WorkerContext<'a> {
    profiles: &'a SharedProfileTable,
    deferred: &'a mut VecDeque<Envelope>,
    stats: &'a DispatchStats,
}

impl WorkerContext<'_> {
    pub fn profiles(&self) -> &SharedProfileTable {
        self.profiles
    }

    /// Queue `env` to run after the current handler returns, ahead of the
    /// next dequeue. Never blocks and never fails.
    pub fn defer(&mut self, env: Envelope) {
        self.deferred.push_back(env);
    }

    /// Shorthand for deferring a callback envelope.
    pub fn defer_callback(&mut self, group: GroupId, event: u8, payload: Payload) {
        self.defer(Envelope::callback(group, event, payload));
    }

    pub fn stats(&self) -> &DispatchStats {
        self.stats
    }
}

// ───────────────────────────────────────────────────────────────
// Worker state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Blocked in `dequeue`.
    Idle = 0,
    /// Running a handler.
    Dispatching = 1,
    /// Loop exited; no further envelopes are processed.
    Stopped = 2,
}

/// Worker state readable from any thread.
#[derive(Debug)]
pub struct WorkerStatus(AtomicU8);

impl WorkerStatus {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    fn set(&self, s: WorkerState) {
        self.0.store(s as u8, Ordering::Release);
    }

    pub fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Idle,
            1 => WorkerState::Dispatching,
            _ => WorkerState::Stopped,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Loop
// ───────────────────────────────────────────────────────────────

pub struct Worker<const N: usize = DISPATCH_QUEUE_LEN> {
    consumer: Consumer<N>,
    handlers: HandlerTable,
    profiles: SharedProfileTable,
    status: Arc<WorkerStatus>,
    deferred: VecDeque<Envelope>,
}

impl<const N: usize> Worker<N> {
    /// Take ownership of the consumer and open a route for every installed
    /// group. Enqueues for other groups fail with `UnknownGroup`.
    pub fn new(consumer: Consumer<N>, handlers: HandlerTable, profiles: SharedProfileTable) -> Self {
        for group in handlers.installed() {
            consumer.open_route(group);
        }
        Self {
            consumer,
            handlers,
            profiles,
            status: Arc::new(WorkerStatus::new()),
            deferred: VecDeque::new(),
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    /// Run until the stop marker is dequeued.
    pub fn run(mut self) {
        self.consumer.bind_current_thread();
        info!("worker: running");

        loop {
            self.status.set(WorkerState::Idle);
            let Some(env) = self.consumer.dequeue() else {
                break;
            };
            self.dispatch_with_deferred(env);
        }

        // Producers that passed the closed check while the stop marker was
        // in flight still get their envelopes handled.
        let mut late = 0usize;
        while let Some(env) = self.consumer.try_dequeue() {
            late += 1;
            self.dispatch_with_deferred(env);
        }
        if late > 0 {
            warn!("worker: handled {} envelopes queued behind stop", late);
        }
        self.status.set(WorkerState::Stopped);
        info!("worker: stopped");
    }

    fn dispatch_with_deferred(&mut self, env: Envelope) {
        self.dispatch(env);
        while let Some(next) = self.deferred.pop_front() {
            self.dispatch(next);
        }
    }

    fn dispatch(&mut self, env: Envelope) {
        self.status.set(WorkerState::Dispatching);
        let group = env.group();
        let action = env.action();

        let Some(handler) = self.handlers.get_mut(group) else {
            // Only reachable through `defer`; producers are filtered by route.
            warn!("worker: no handler for {:?}, dropping action {}", group, action);
            return;
        };
        let stats = self.consumer.stats();
        let mut cx = WorkerContext {
            profiles: &self.profiles,
            deferred: &mut self.deferred,
            stats,
        };

        // The envelope moves into the closure, so an unwinding handler still
        // drops (releases) it.
        let outcome = catch_unwind(AssertUnwindSafe(|| match env.signal() {
            Signal::Call => handler.on_call(env, &mut cx),
            Signal::Callback => handler.on_callback(env, &mut cx),
        }));

        match outcome {
            Ok(()) => stats.record_dispatched(),
            Err(payload) => {
                let fault = HandlerPanic { group, action };
                let reason = panic_reason(payload.as_ref());
                error!("worker: {} ({})", fault, reason);
                stats.record_panic(fault, reason);
            }
        }
    }
}
