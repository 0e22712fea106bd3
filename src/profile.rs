//! Profile callback table.
//!
//! Stack-originated events reach the interested profile module through a
//! callback registered under a small profile id. The stack never depends on
//! concrete profile types, only on the id.
//!
//! Registration is callable from any thread, so the host keeps the table in
//! a [`SharedProfileTable`]: an explicit critical-section mutex around both
//! reads and writes. A read clones the callback `Arc` out and releases the
//! lock before the callback runs, so a callback may itself re-register.

use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::debug;

use crate::dispatch::Envelope;
use crate::error::RangeError;

/// Number of profile slots.
pub const PROFILE_COUNT: usize = 16;

/// Callback receiving stack events for one profile.
pub type ProfileCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Profile identifier, `0 <= id < PROFILE_COUNT`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileId(u8);

impl ProfileId {
    pub const GAP_BLE: Self = Self(0);
    pub const GATTC: Self = Self(1);
    pub const GATTS: Self = Self(2);
    pub const GAP_BT: Self = Self(3);
    pub const A2DP: Self = Self(4);
    pub const HF: Self = Self(5);
    pub const SPP: Self = Self(6);

    pub const fn new(id: u8) -> Result<Self, RangeError> {
        match RangeError::check(id as usize, PROFILE_COUNT) {
            Ok(_) => Ok(Self(id)),
            Err(e) => Err(e),
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Fixed-size `id -> callback` map. Every access is range-checked.
pub struct ProfileTable<C, const N: usize = PROFILE_COUNT> {
    slots: [Option<C>; N],
}

impl<C: Clone, const N: usize> Default for ProfileTable<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone, const N: usize> ProfileTable<C, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
        }
    }

    /// Install `cb` for `id`, replacing any previous callback.
    pub fn register(&mut self, id: u8, cb: C) -> Result<(), RangeError> {
        let idx = RangeError::check(id as usize, N)?;
        self.slots[idx] = Some(cb);
        Ok(())
    }

    /// Clear the slot for `id`. Returns the previous callback, if any.
    pub fn unregister(&mut self, id: u8) -> Result<Option<C>, RangeError> {
        let idx = RangeError::check(id as usize, N)?;
        Ok(self.slots[idx].take())
    }

    /// `None` for an empty slot or an out-of-range id.
    pub fn get(&self, id: u8) -> Option<C> {
        let idx = RangeError::check(id as usize, N).ok()?;
        self.slots[idx].clone()
    }

    pub fn reset_all(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    /// Number of occupied slots.
    pub fn registered(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Thread-safe handle to the host's callback table.
#[derive(Clone)]
pub struct SharedProfileTable {
    inner: Arc<Mutex<CriticalSectionRawMutex, RefCell<ProfileTable<ProfileCallback>>>>,
}

impl Default for SharedProfileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedProfileTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RefCell::new(ProfileTable::new()))),
        }
    }

    pub fn register(&self, id: u8, cb: ProfileCallback) -> Result<(), RangeError> {
        self.inner.lock(|t| t.borrow_mut().register(id, cb))?;
        debug!("profile: registered callback for id {}", id);
        Ok(())
    }

    pub fn unregister(&self, id: u8) -> Result<bool, RangeError> {
        let prev = self.inner.lock(|t| t.borrow_mut().unregister(id))?;
        Ok(prev.is_some())
    }

    pub fn get(&self, id: u8) -> Option<ProfileCallback> {
        self.inner.lock(|t| t.borrow().get(id))
    }

    pub fn reset_all(&self) {
        self.inner.lock(|t| t.borrow_mut().reset_all());
    }

    pub fn registered(&self) -> usize {
        self.inner.lock(|t| t.borrow().registered())
    }

    /// Deliver `env` to the callback for `profile`. Returns `false` when no
    /// callback is registered.
    pub fn notify(&self, profile: ProfileId, env: &Envelope) -> bool {
        // Lock is released before the callback runs.
        match self.get(profile.raw()) {
            Some(cb) => {
                cb(env);
                true
            }
            None => false,
        }
    }
}
