//! # Event Queue
//!
//! An `EventQueue` owns a set of host event handlers and one channel that all of
//! their streams feed. Registering a listener is two calls: a blocking
//! `register_<kind>_listener` that returns the host's handler id, then a
//! streaming `start_event_handler(handler_id)` whose replies are the events.
//!
//! Each stream is remembered by its call id together with the kind it was
//! registered for, so a payload is decoded against the kind of the handler that
//! produced it. Deliveries from streams the queue no longer tracks are skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bridgerpc::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;
use tracing::warn;

use crate::call::Call;
use crate::error::Error;
use crate::error::Result;
use crate::events::ChatFilter;
use crate::events::Event;
use crate::events::EventKind;
use crate::executor;
use crate::link::Link;
use crate::link::Recv;
use crate::link::Shared;
use crate::registry::CallId;
use crate::registry::Delivery;
use crate::registry::ErrorRoute;

pub const START_HANDLER_FUNCTION: &str = "start_event_handler";
pub const UNREGISTER_HANDLER_FUNCTION: &str = "unregister_event_handler";

/// Host-side id of a registered handler.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct HandlerId(pub i64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

struct Subscription {
    kind: EventKind,
    handler: HandlerId,
}

pub struct EventQueue {
    shared: Arc<Shared>,
    tx: UnboundedSender<Delivery>,
    rx: UnboundedReceiver<Delivery>,
    streams: HashMap<CallId, Subscription>,
}

impl EventQueue {
    pub fn new(link: &Link) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::clone(link.shared()),
            tx,
            rx,
            streams: HashMap::new(),
        }
    }

    /// Number of handlers currently feeding this queue.
    pub fn handlers(&self) -> usize {
        self.streams.len()
    }

    /// Registers a handler for `kind` and starts streaming its events into the queue.
    pub fn register_listener(&mut self, kind: EventKind, args: Vec<Value>) -> Result<HandlerId> {
        let id = Call::new(&self.shared, kind.register_function()).args(args).call()?;
        let handler = HandlerId(i64::try_from(id)?);

        let executor = executor::resolve(None, None, self.shared.default_executor());
        let stream = self.shared.issue(
            START_HANDLER_FUNCTION,
            &[Value::from(handler.0)],
            executor,
            ErrorRoute::Deliver,
            self.tx.clone(),
        )?;
        debug!("{} listening for {} events on call {}", handler, kind, stream);
        self.streams.insert(stream, Subscription { kind, handler });
        Ok(handler)
    }

    pub fn register_key_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Key, vec![])
    }

    pub fn register_mouse_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Mouse, vec![])
    }

    pub fn register_chat_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Chat, vec![])
    }

    /// Captures outgoing chat messages matching `filter` before they are sent.
    pub fn register_outgoing_chat_interceptor(&mut self, filter: ChatFilter) -> Result<HandlerId> {
        self.register_listener(EventKind::OutgoingChatIntercept, filter.to_args())
    }

    pub fn register_add_entity_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::AddEntity, vec![])
    }

    pub fn register_block_update_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::BlockUpdate, vec![])
    }

    pub fn register_take_item_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::TakeItem, vec![])
    }

    pub fn register_damage_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Damage, vec![])
    }

    pub fn register_explosion_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Explosion, vec![])
    }

    pub fn register_chunk_listener(&mut self) -> Result<HandlerId> {
        self.register_listener(EventKind::Chunk, vec![])
    }

    /// Takes the next event.
    ///
    /// Without `block`, returns `Error::Empty` when nothing is queued, whether
    /// or not the link is still open. With `block`, waits up to `timeout`
    /// (forever if `None`) and returns `Error::Timeout` when it expires, or
    /// `Error::LinkClosed` once the link is closed. A payload that does not
    /// decode for its kind is returned as an error rather than dropped.
    pub fn get(&mut self, block: bool, timeout: Option<Duration>) -> Result<Event> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let delivery = if block {
                let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                match self.shared.recv_blocking(&mut self.rx, remaining) {
                    Recv::Delivery(delivery) => delivery,
                    Recv::Disconnected | Recv::Closed => return Err(Error::LinkClosed),
                    Recv::InsideRuntime => return Err(Error::InsideRuntime),
                    Recv::TimedOut => {
                        return Err(Error::Timeout {
                            function: START_HANDLER_FUNCTION.to_string(),
                            after: timeout.unwrap_or_default(),
                        });
                    }
                }
            } else {
                match self.rx.try_recv() {
                    Ok(delivery) => delivery,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Err(Error::Empty),
                }
            };

            let Some(sub) = self.streams.get(&delivery.call_id) else {
                debug!("skipping event from untracked stream {}", delivery.call_id);
                continue;
            };
            return match delivery.outcome {
                Ok(payload) => Event::from_payload(sub.kind, payload),
                Err(e) => Err(e),
            };
        }
    }

    /// Asks the host to drop every handler and discards queued events. Safe to
    /// call more than once.
    pub fn unregister_all(&mut self) {
        let executor = executor::resolve(None, None, self.shared.default_executor());
        for (_, sub) in self.streams.drain() {
            debug!("unregistering {} ({} events)", sub.handler, sub.kind);
            let args = [Value::from(sub.handler.0)];
            if let Err(e) = self.shared.fire(UNREGISTER_HANDLER_FUNCTION, &args, executor) {
                warn!("could not unregister {}: {}", sub.handler, e);
            }
        }
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.unregister_all();
    }
}
