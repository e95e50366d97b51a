//! Typed conversation events.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// The human on this side of the channel.
    User,
    /// The remote agent.
    Agent,
    /// The runtime the agent acts on.
    Environment,
}

impl EventSource {
    /// Parse the wire name of a source.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "environment" => Some(Self::Environment),
            _ => None,
        }
    }
}

/// Event identifier as assigned by the remote side.
///
/// Ids are expected to be integers, but string ids are tolerated on the
/// wire. Only ids that parse as an integer take part in cursor tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Ordinal(i64),
    Opaque(String),
}

impl EventId {
    /// The numeric ordinal of this id, if it has one.
    #[must_use]
    pub fn ordinal(&self) -> Option<i64> {
        match self {
            Self::Ordinal(n) => Some(*n),
            Self::Opaque(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for EventId {
    fn from(n: i64) -> Self {
        Self::Ordinal(n)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::Opaque(s.to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinal(n) => write!(f, "{n}"),
            Self::Opaque(s) => f.write_str(s),
        }
    }
}

/// Structural problem with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("unknown event source `{0}`")]
    UnknownSource(String),
}

/// A validated event.
///
/// Events are immutable once accepted; everything beyond the four required
/// fields travels in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: EventId,
    source: EventSource,
    #[serde(rename = "type")]
    kind: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Event {
    /// Build an event from its required fields.
    #[must_use]
    pub fn new(
        id: impl Into<EventId>,
        source: EventSource,
        kind: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            kind: kind.into(),
            timestamp: timestamp.into(),
            message: None,
            payload: Map::new(),
        }
    }

    /// Attach a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach an extra payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Validate a raw inbound frame.
    ///
    /// A frame with no `type` falls back to its `action` or `observation`
    /// key, which is how the agent labels its own events.
    ///
    /// # Errors
    /// Returns [`FrameError`] if any of `id`, `source`, `type` or
    /// `timestamp` is missing or has the wrong shape.
    pub fn from_frame(raw: Value) -> Result<Self, FrameError> {
        let Value::Object(mut map) = raw else {
            return Err(FrameError::NotAnObject);
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => return Err(FrameError::MissingField("id")),
            Some(Value::Number(n)) => n
                .as_i64()
                .map_or_else(|| EventId::Opaque(n.to_string()), EventId::Ordinal),
            Some(Value::String(s)) if !s.is_empty() => EventId::Opaque(s),
            Some(_) => {
                return Err(FrameError::InvalidField {
                    field: "id",
                    reason: "expected an integer or a non-empty string",
                });
            }
        };

        let source = match map.remove("source") {
            None | Some(Value::Null) => return Err(FrameError::MissingField("source")),
            Some(Value::String(s)) => EventSource::parse(&s).ok_or(FrameError::UnknownSource(s))?,
            Some(_) => {
                return Err(FrameError::InvalidField {
                    field: "source",
                    reason: "expected a string",
                });
            }
        };

        let kind = match map.remove("type") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Null) | None => ["action", "observation"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(FrameError::MissingField("type"))?,
            Some(_) => {
                return Err(FrameError::InvalidField {
                    field: "type",
                    reason: "expected a non-empty string",
                });
            }
        };

        let timestamp = match map.remove("timestamp") {
            None | Some(Value::Null) => return Err(FrameError::MissingField("timestamp")),
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(_) => {
                return Err(FrameError::InvalidField {
                    field: "timestamp",
                    reason: "expected a non-empty string",
                });
            }
        };

        let message = match map.remove("message") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => {
                map.insert("message".to_string(), other);
                None
            }
        };

        Ok(Self {
            id,
            source,
            kind,
            timestamp,
            message,
            payload: map,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    #[must_use]
    pub const fn source(&self) -> EventSource {
        self.source
    }

    /// The event discriminator (`message`, `run`, `read`, ...).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// ISO-8601 timestamp as sent by the remote side.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Whether this is a chat message exchanged between user and agent.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.kind == "message" && matches!(self.source, EventSource::User | EventSource::Agent)
    }
}
