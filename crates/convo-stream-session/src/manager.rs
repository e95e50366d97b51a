//! Session manager keeping at most one active conversation stream.

use std::sync::Arc;

use convo_stream_core::EventHandler;
use convo_stream_transport::Connector;

use crate::{config::SessionConfig, session::Session};

/// Owns the current session and replaces it when the target changes.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn EventHandler>,
    template: SessionConfig,
    current: Option<Session>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            connector,
            handler,
            template: SessionConfig::new("", ""),
            current: None,
        }
    }

    /// Settings applied to every session this manager starts. The
    /// conversation id and token are overridden per session.
    #[must_use]
    pub fn with_template(mut self, template: SessionConfig) -> Self {
        self.template = template;
        self
    }

    /// Session for `conversation_id` with `auth_token`.
    ///
    /// Reuses the current session when both match. Otherwise the current
    /// session is closed, and fully torn down, before the new one starts.
    pub async fn ensure(&mut self, conversation_id: &str, auth_token: &str) -> &Session {
        let session = match self.current.take() {
            Some(session)
                if session.conversation_id() == conversation_id
                    && session.auth_token() == auth_token =>
            {
                session
            }
            previous => {
                if let Some(previous) = previous {
                    tracing::info!(
                        from = previous.conversation_id(),
                        to = conversation_id,
                        "Replacing session"
                    );
                    previous.close().await;
                }
                let config = SessionConfig {
                    conversation_id: conversation_id.to_string(),
                    auth_token: auth_token.to_string(),
                    ..self.template.clone()
                };
                Session::start(
                    config,
                    Arc::clone(&self.connector),
                    Arc::clone(&self.handler),
                )
            }
        };
        self.current.insert(session)
    }

    /// The active session, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Close the active session.
    pub async fn close_current(&mut self) {
        if let Some(session) = self.current.take() {
            session.close().await;
        }
    }
}
