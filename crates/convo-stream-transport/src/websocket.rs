//! WebSocket connector.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    channel::{ChannelLink, Connector, TransportError, TransportSignal},
    protocol::{ClientMessage, DomainError, OpenParams},
};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens channels over WebSocket, one socket task per channel.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: Url,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    #[must_use]
    pub const fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, params: &OpenParams) -> ChannelLink {
        let url = params.to_url(&self.endpoint);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_socket(
            url,
            self.connect_timeout,
            out_rx,
            in_tx,
            shutdown.clone(),
        ));

        ChannelLink::new(out_tx, in_rx, shutdown)
    }
}

async fn run_socket(
    url: Url,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<TransportSignal>,
    shutdown: CancellationToken,
) {
    let emit = |signal: TransportSignal| {
        // A closed receiver means the link was dropped; nothing to do.
        let _ = inbound.send(signal);
    };

    let ws = tokio::select! {
        () = shutdown.cancelled() => return,
        res = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => match res {
            Err(_) => {
                emit(TransportSignal::Error(TransportError::Timeout));
                return;
            }
            Ok(Err(e)) => {
                emit(TransportSignal::Error(connect_error(e)));
                return;
            }
            Ok(Ok((ws, _response))) => ws,
        },
    };

    emit(TransportSignal::Opened);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!("Failed to send close frame: {e}");
                }
                break;
            }
            Some(msg) = outbound.recv() => {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    emit(TransportSignal::Error(TransportError::Socket(e.to_string())));
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(TransportSignal::Frame(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => emit(TransportSignal::Frame(text)),
                    Err(_) => tracing::warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.into_owned())
                        .filter(|r| !r.is_empty());
                    emit(TransportSignal::Closed { reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportSignal::Error(TransportError::Socket(e.to_string())));
                    break;
                }
                None => {
                    emit(TransportSignal::Closed { reason: None });
                    break;
                }
            },
        }
    }
}

fn connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let domain = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .and_then(|body| DomainError::recognize(&body));
            domain.map_or_else(
                || TransportError::Connect(format!("HTTP {}", response.status())),
                TransportError::Domain,
            )
        }
        WsError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => TransportError::Timeout,
        other => TransportError::Connect(other.to_string()),
    }
}
