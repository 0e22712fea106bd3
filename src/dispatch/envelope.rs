//! The unit of cross-context work.

use super::GroupId;
use super::marshal::Payload;

/// Direction of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// API call from an application context into the stack.
    Call,
    /// Stack-originated event travelling back towards a profile callback.
    Callback,
}

/// A tagged message carrying a dispatch group, an action code, and an owned
/// payload.
///
/// Dropping an envelope releases its payload. A handler that wants to pass
/// the payload onward takes it with [`Envelope::into_payload`].
#[derive(Debug)]
pub struct Envelope {
    signal: Signal,
    group: GroupId,
    action: u8,
    payload: Payload,
}

impl Envelope {
    /// An API-call envelope.
    pub fn call(group: GroupId, action: u8, payload: Payload) -> Self {
        Self {
            signal: Signal::Call,
            group,
            action,
            payload,
        }
    }

    /// A callback envelope; `event` is the profile-specific event code.
    pub fn callback(group: GroupId, event: u8, payload: Payload) -> Self {
        Self {
            signal: Signal::Callback,
            group,
            action: event,
            payload,
        }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Action code (or event code for callbacks).
    pub fn action(&self) -> u8 {
        self.action
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Re-parent the payload, consuming the envelope.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}
