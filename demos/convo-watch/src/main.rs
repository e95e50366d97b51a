//! Watch a conversation stream from the terminal.
//!
//! Run with:
//! `cargo run -p convo-watch -- ws://localhost:3000/socket.io <conversation-id>`
//!
//! Settings fall back to `CONVO_ENDPOINT`, `CONVO_CONVERSATION_ID`,
//! `CONVO_AUTH` and `CONVO_MODE` (`live`, `replay` or `shared`).
//!
//! Lines typed on stdin are sent as chat messages. `/skip` and `/reset`
//! control a replay, `/quit` exits.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use convo_stream_core::{Event, HandlerError, SessionMode};
use convo_stream_session::{Notice, Session, SessionConfig};
use convo_stream_transport::WebSocketConnector;
use serde_json::{Map, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

struct Args {
    endpoint: Url,
    conversation_id: String,
    auth: String,
    mode: SessionMode,
    shared: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut positional = std::env::args().skip(1);
        let setting = |arg: Option<String>, var: &str| arg.or_else(|| std::env::var(var).ok());

        let endpoint = setting(positional.next(), "CONVO_ENDPOINT")
            .context("missing endpoint (argument 1 or CONVO_ENDPOINT)")?;
        let endpoint = Url::parse(&endpoint).with_context(|| format!("invalid endpoint {endpoint}"))?;
        let conversation_id = setting(positional.next(), "CONVO_CONVERSATION_ID")
            .context("missing conversation id (argument 2 or CONVO_CONVERSATION_ID)")?;
        let auth = std::env::var("CONVO_AUTH").unwrap_or_default();

        let (mode, shared) = match std::env::var("CONVO_MODE").as_deref() {
            Err(_) | Ok("live") => (SessionMode::Live, false),
            Ok("replay") => (SessionMode::Replay, false),
            Ok("shared") => (SessionMode::Replay, true),
            Ok(other) => bail!("unknown CONVO_MODE {other}"),
        };

        Ok(Self {
            endpoint,
            conversation_id,
            auth,
            mode,
            shared,
        })
    }
}

fn print_event(event: &Event) -> Result<(), HandlerError> {
    let text = event.message().unwrap_or_default();
    println!("[{}] {:?} {}: {text}", event.id(), event.source(), event.kind());
    Ok(())
}

/// Print a notice; returns the delay before leaving, if the conversation is gone.
fn handle_notice(notice: &Notice) -> Option<Duration> {
    match notice {
        Notice::Error {
            error,
            redirect_after,
        } => {
            eprintln!("error: {error}");
            *redirect_after
        }
        Notice::Status(status) => {
            eprintln!("{}: {}", status.id, status.message);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse()?;
    let config = SessionConfig::new(args.conversation_id, args.auth)
        .with_mode(args.mode)
        .shared(args.shared);
    let connector = WebSocketConnector::new(args.endpoint);
    let session = Session::start(config, Arc::new(connector), Arc::new(print_event));

    let mut notices = session.subscribe_notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut redirect = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    redirect = handle_notice(&notice);
                    if redirect.is_some() {
                        break;
                    }
                }
                Err(e) => tracing::debug!("Notice stream: {e}"),
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/skip" => {
                        let count = session.skip_to_results().await?;
                        eprintln!("skipped {count} events");
                    }
                    "/reset" => {
                        let count = session.reset_replay().await?;
                        eprintln!("replaying {count} events");
                    }
                    text => {
                        let mut action = Map::new();
                        action.insert("action".to_string(), json!("message"));
                        action.insert("args".to_string(), json!({ "content": text }));
                        if let Err(e) = session.send(action) {
                            eprintln!("not sent: {e}");
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        latest_event_id = ?session.last_delivered_id(),
        "Closing session"
    );
    session.close().await;

    if let Some(delay) = redirect {
        eprintln!("conversation unavailable, leaving in {}s", delay.as_secs());
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use convo_stream_transport::{DomainError, StatusNotice};

    use super::*;

    #[test]
    fn test_only_unavailable_conversations_leave() {
        let gone = Notice::Error {
            error: DomainError::ConversationNotFound,
            redirect_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(handle_notice(&gone), Some(Duration::from_secs(3)));

        let other = Notice::Error {
            error: DomainError::Other("rate limited".into()),
            redirect_after: None,
        };
        assert_eq!(handle_notice(&other), None);

        let status = Notice::Status(StatusNotice {
            kind: "info".into(),
            id: "STATUS$READY".into(),
            message: "Ready".into(),
        });
        assert_eq!(handle_notice(&status), None);
    }
}
