//! Wire protocol for the conversation channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Cursor value meaning "start of stream".
pub const NO_CURSOR: i64 = -1;

/// Parameters sent when a channel is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenParams {
    /// Last event id already seen, or [`NO_CURSOR`].
    pub latest_event_id: i64,
    pub conversation_id: String,
    pub auth: String,
    /// `"shared"` for read-only viewers of a published conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Additional query parameters, appended verbatim.
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

impl OpenParams {
    /// Build parameters resuming after `cursor`.
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        auth: impl Into<String>,
        cursor: Option<i64>,
    ) -> Self {
        Self {
            latest_event_id: cursor.unwrap_or(NO_CURSOR),
            conversation_id: conversation_id.into(),
            auth: auth.into(),
            mode: None,
            extra: Vec::new(),
        }
    }

    /// Mark the channel as a shared (viewer) connection.
    #[must_use]
    pub fn shared(mut self) -> Self {
        self.mode = Some("shared".to_string());
        self
    }

    /// Append an extra query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Resume cursor, if any.
    #[must_use]
    pub const fn cursor(&self) -> Option<i64> {
        if self.latest_event_id < 0 {
            None
        } else {
            Some(self.latest_event_id)
        }
    }

    /// Query pairs in the order they go on the wire.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("latest_event_id".to_string(), self.latest_event_id.to_string()),
            ("conversation_id".to_string(), self.conversation_id.clone()),
            ("auth".to_string(), self.auth.clone()),
        ];
        if let Some(mode) = &self.mode {
            pairs.push(("mode".to_string(), mode.clone()));
        }
        pairs.extend(self.extra.iter().cloned());
        pairs
    }

    /// Endpoint URL carrying these parameters in its query string.
    #[must_use]
    pub fn to_url(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        url.query_pairs_mut().extend_pairs(self.query_pairs());
        url
    }
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application command, forwarded verbatim.
    #[serde(rename = "oh_user_action")]
    UserAction { data: Map<String, Value> },
}

impl ClientMessage {
    /// Wrap an application command.
    #[must_use]
    pub const fn user_action(data: Map<String, Value>) -> Self {
        Self::UserAction { data }
    }
}

/// Error reported by the remote side about the conversation itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum DomainError {
    #[error("Conversation not found")]
    ConversationNotFound,
    #[error("Conversation not published")]
    ConversationNotPublished,
    #[error("{0}")]
    Other(String),
}

impl DomainError {
    /// Map a known server message to its variant.
    #[must_use]
    pub fn recognize(message: &str) -> Option<Self> {
        let message = message.trim();
        if message.eq_ignore_ascii_case("conversation not found") {
            Some(Self::ConversationNotFound)
        } else if message.eq_ignore_ascii_case("conversation not published") {
            Some(Self::ConversationNotPublished)
        } else {
            None
        }
    }

    /// Classify any server error message.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        Self::recognize(message).unwrap_or_else(|| Self::Other(message.to_string()))
    }

    /// Whether the conversation cannot be viewed at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConversationNotFound | Self::ConversationNotPublished)
    }
}

/// Progress notice from the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Candidate event, not yet validated.
    Event(Value),
    /// `{ "error": true, "message": ... }`
    Error(DomainError),
    /// `{ "status_update": true, ... }`
    Status(StatusNotice),
}

impl ServerFrame {
    /// Classify a text frame.
    ///
    /// # Errors
    /// Returns error if the text is not JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    /// Classify an already decoded frame.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);

        if flag("error") {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Self::Error(DomainError::from_message(message));
        }
        if flag("status_update") {
            let notice = StatusNotice {
                kind: str_field(&value, "type"),
                id: str_field(&value, "id"),
                message: str_field(&value, "message"),
            };
            return Self::Status(notice);
        }
        Self::Event(value)
    }
}

fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
