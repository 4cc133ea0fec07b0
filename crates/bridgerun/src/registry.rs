//! # Call Registry
//!
//! Correlates replies with the calls that caused them.
//!
//! Every call that expects a reply is registered under a fresh id before its line
//! is written, so a reply can never arrive for an id the registry has not seen
//! yet. The entry stays until the host closes the call; until then any number of
//! replies (a stream) may be delivered to it.
//!
//! ## Invariants
//!
//! - Ids are allocated from one counter, start at 1, and are never reused.
//! - Id 0 is never stored; it belongs to lifecycle messages.
//! - A reply for an unknown id is logged and ignored.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bridgerpc::Reply;
use bridgerpc::Value;
use bridgerpc::frame::SYSTEM_CALL_ID;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::Error;

/// Correlation id for one call.
pub type CallId = u64;

/// What one reply means to the caller.
pub type Outcome = std::result::Result<Value, Error>;

/// A single reply, routed to the channel of the call it belongs to.
#[derive(Debug)]
pub struct Delivery {
    pub call_id: CallId,
    pub outcome: Outcome,
}

/// Where host exceptions for a call go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRoute {
    /// Delivered to the caller as `Err(Error::Host(..))`.
    Deliver,
    /// Printed as a diagnostic; the caller only sees values.
    Report,
}

/// State for one outstanding call.
pub struct PendingCall {
    function: String,
    sink: UnboundedSender<Delivery>,
    errors: ErrorRoute,
}

impl PendingCall {
    pub fn new(function: impl Into<String>, sink: UnboundedSender<Delivery>, errors: ErrorRoute) -> Self {
        Self {
            function: function.into(),
            sink,
            errors,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    fn deliver(&self, call_id: CallId, outcome: Outcome) {
        // The receiver may already be gone (dropped future); that is fine.
        let _ = self.sink.send(Delivery { call_id, outcome });
    }
}

/// How a reply was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered { closed: bool },
    /// `desynchronized` is set on the one reply that completed a streak of
    /// `unknown_threshold` consecutive unknown ids.
    Unknown { desynchronized: bool },
}

pub struct CallRegistry {
    next_id: AtomicU64,
    pending: DashMap<CallId, PendingCall>,
    unknown_streak: AtomicU64,
    unknown_threshold: u64,
}

impl CallRegistry {
    /// `unknown_threshold` is the number of consecutive unknown-id replies after
    /// which a desynchronization diagnostic is emitted. Zero disables it.
    pub fn new(unknown_threshold: u64) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            unknown_streak: AtomicU64::new(0),
            unknown_threshold,
        }
    }

    /// Allocates the next call id.
    pub fn allocate(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a pending call. Id 0 is refused.
    pub fn register(&self, id: CallId, call: PendingCall) -> bool {
        if id == SYSTEM_CALL_ID {
            warn!("refusing to register '{}' under reserved call id 0", call.function);
            return false;
        }
        self.pending.insert(id, call);
        true
    }

    /// Drops a pending call without notifying it. Later replies for `id` are
    /// treated as unknown.
    pub fn forget(&self, id: CallId) -> Option<PendingCall> {
        self.pending.remove(&id).map(|(_, call)| call)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Routes one reply to its pending call.
    pub fn dispatch(&self, reply: Reply) -> Dispatch {
        let Reply { call_id, value, error: host_error, closed } = reply;

        {
            let Some(call) = self.pending.get(&call_id) else {
                let desynchronized = self.note_unknown(call_id);
                return Dispatch::Unknown { desynchronized };
            };
            self.unknown_streak.store(0, Ordering::Relaxed);

            match (host_error, value) {
                (Some(e), _) => match call.errors {
                    ErrorRoute::Deliver => call.deliver(call_id, Err(Error::Host(e))),
                    ErrorRoute::Report => {
                        error!("call {} to '{}' raised on the host:\n{}", call_id, call.function, e);
                    }
                },
                (None, Some(v)) => call.deliver(call_id, Ok(v)),
                (None, None) if !closed => {
                    warn!("reply for call {} ('{}') carries nothing", call_id, call.function);
                }
                (None, None) => {}
            }
            // the map guard is released here, before any removal
        }

        if closed {
            if let Some((_, call)) = self.pending.remove(&call_id) {
                debug!("call {} ('{}') closed by host", call_id, call.function);
            }
        }
        Dispatch::Delivered { closed }
    }

    /// Consecutive replies for unknown ids since the last known one.
    pub fn unknown_streak(&self) -> u64 {
        self.unknown_streak.load(Ordering::Relaxed)
    }

    fn note_unknown(&self, call_id: CallId) -> bool {
        let streak = self.unknown_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if self.unknown_threshold != 0 && streak == self.unknown_threshold {
            error!(
                "{} consecutive replies for unknown call ids (latest {}); script and host look desynchronized",
                streak, call_id
            );
            return true;
        }
        warn!("reply for unknown call id {}, ignoring", call_id);
        false
    }

    /// Wakes every pending call with `LinkClosed` and empties the registry.
    pub fn close_all(&self) {
        let ids: Vec<CallId> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                call.deliver(id, Err(Error::LinkClosed));
            }
        }
    }
}
