//! # Typed Events
//!
//! The host reports activity in the game as loosely shaped JSON objects. This
//! module gives each category a concrete type and decodes payloads into them
//! once, at the queue boundary, so consumers match on [`Event`] rather than
//! probing maps.
//!
//! Every payload carries `time`, the host's wall clock in seconds when the event
//! fired. A payload may also carry `event_type`; when it does it must name the
//! kind the handler was registered for.

use std::fmt;
use std::str::FromStr;

use bridgerpc::Value;
use bridgerpc::from_value;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Field a payload may use to name its own kind.
pub const EVENT_TYPE_FIELD: &str = "event_type";

/// The categories of host events a script can listen to.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Key,
    Mouse,
    Chat,
    OutgoingChatIntercept,
    AddEntity,
    BlockUpdate,
    TakeItem,
    Damage,
    Explosion,
    Chunk,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Key,
        EventKind::Mouse,
        EventKind::Chat,
        EventKind::OutgoingChatIntercept,
        EventKind::AddEntity,
        EventKind::BlockUpdate,
        EventKind::TakeItem,
        EventKind::Damage,
        EventKind::Explosion,
        EventKind::Chunk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Key => "key",
            EventKind::Mouse => "mouse",
            EventKind::Chat => "chat",
            EventKind::OutgoingChatIntercept => "outgoing_chat_intercept",
            EventKind::AddEntity => "add_entity",
            EventKind::BlockUpdate => "block_update",
            EventKind::TakeItem => "take_item",
            EventKind::Damage => "damage",
            EventKind::Explosion => "explosion",
            EventKind::Chunk => "chunk",
        }
    }

    /// Host function that registers a handler for this kind.
    pub fn register_function(self) -> String {
        match self {
            EventKind::OutgoingChatIntercept => "register_outgoing_chat_interceptor".to_string(),
            kind => format!("register_{}_listener", kind.as_str()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownEventKind(s.to_string()))
    }
}

/// Which outgoing chat messages an interceptor captures. Captured messages are
/// not sent; the script decides what to do with them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChatFilter {
    #[default]
    All,
    /// Messages starting with this text.
    Prefix(String),
    /// Messages matching this regular expression, evaluated by the host.
    Pattern(String),
}

impl ChatFilter {
    pub(crate) fn to_args(&self) -> Vec<Value> {
        match self {
            ChatFilter::All => vec![],
            ChatFilter::Prefix(prefix) => vec![Value::from(prefix.as_str()), Value::Null],
            ChatFilter::Pattern(pattern) => vec![Value::Null, Value::from(pattern.as_str())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: i64,
    pub scan_code: i64,
    /// 0 release, 1 press, 2 repeat.
    pub action: i64,
    pub modifiers: i64,
    pub time: f64,
    /// Name of the open screen, if any.
    #[serde(default)]
    pub screen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseEvent {
    pub button: i64,
    pub action: i64,
    pub modifiers: i64,
    pub time: f64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub screen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub message: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingChatEvent {
    pub message: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEntityEvent {
    pub entity: Value,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockUpdateEvent {
    pub position: [i64; 3],
    pub old_state: String,
    pub new_state: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeItemEvent {
    pub player_uuid: String,
    pub item: Value,
    pub amount: i64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub entity_uuid: String,
    #[serde(default)]
    pub cause_uuid: Option<String>,
    pub source: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplosionEvent {
    pub position: [f64; 3],
    /// Affected blocks, encoded by the host.
    pub blockpack_base64: String,
    pub time: f64,
}

/// A chunk was loaded (`loaded == true`) or unloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEvent {
    pub loaded: bool,
    pub x_min: i64,
    pub z_min: i64,
    pub x_max: i64,
    pub z_max: i64,
    pub time: f64,
}

/// One decoded host event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Chat(ChatEvent),
    OutgoingChat(OutgoingChatEvent),
    AddEntity(AddEntityEvent),
    BlockUpdate(BlockUpdateEvent),
    TakeItem(TakeItemEvent),
    Damage(DamageEvent),
    Explosion(ExplosionEvent),
    Chunk(ChunkEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Key(_) => EventKind::Key,
            Event::Mouse(_) => EventKind::Mouse,
            Event::Chat(_) => EventKind::Chat,
            Event::OutgoingChat(_) => EventKind::OutgoingChatIntercept,
            Event::AddEntity(_) => EventKind::AddEntity,
            Event::BlockUpdate(_) => EventKind::BlockUpdate,
            Event::TakeItem(_) => EventKind::TakeItem,
            Event::Damage(_) => EventKind::Damage,
            Event::Explosion(_) => EventKind::Explosion,
            Event::Chunk(_) => EventKind::Chunk,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            Event::Key(e) => e.time,
            Event::Mouse(e) => e.time,
            Event::Chat(e) => e.time,
            Event::OutgoingChat(e) => e.time,
            Event::AddEntity(e) => e.time,
            Event::BlockUpdate(e) => e.time,
            Event::TakeItem(e) => e.time,
            Event::Damage(e) => e.time,
            Event::Explosion(e) => e.time,
            Event::Chunk(e) => e.time,
        }
    }

    /// Decodes a payload delivered to a handler registered for `kind`.
    pub fn from_payload(kind: EventKind, payload: Value) -> Result<Event> {
        if let Some(tag) = payload.get(EVENT_TYPE_FIELD).and_then(Value::as_str) {
            let named: EventKind = tag.parse()?;
            if named != kind {
                return Err(Error::MalformedEvent {
                    kind: kind.to_string(),
                    details: format!("payload is tagged '{}'", named),
                });
            }
        }

        let malformed = |e: bridgerpc::RpcError| Error::MalformedEvent {
            kind: kind.to_string(),
            details: e.to_string(),
        };
        let event = match kind {
            EventKind::Key => Event::Key(from_value(payload).map_err(malformed)?),
            EventKind::Mouse => Event::Mouse(from_value(payload).map_err(malformed)?),
            EventKind::Chat => Event::Chat(from_value(payload).map_err(malformed)?),
            EventKind::OutgoingChatIntercept => Event::OutgoingChat(from_value(payload).map_err(malformed)?),
            EventKind::AddEntity => Event::AddEntity(from_value(payload).map_err(malformed)?),
            EventKind::BlockUpdate => Event::BlockUpdate(from_value(payload).map_err(malformed)?),
            EventKind::TakeItem => Event::TakeItem(from_value(payload).map_err(malformed)?),
            EventKind::Damage => Event::Damage(from_value(payload).map_err(malformed)?),
            EventKind::Explosion => Event::Explosion(from_value(payload).map_err(malformed)?),
            EventKind::Chunk => Event::Chunk(from_value(payload).map_err(malformed)?),
        };
        Ok(event)
    }
}
