// crates/tether-client/src/stream.rs
// Single push-stream connection to the gateway's /ws/events endpoint

use std::time::Duration;

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use tether_types::StreamEvent;

use crate::error::{ClientError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 100;

/// Consumer-side options for one connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Deliver heartbeat frames instead of dropping them in the reader.
    pub include_heartbeats: bool,
}

/// What the connection reports to its consumer.
///
/// `Closed` and `Failed` are terminal for this connection instance; retrying
/// means constructing a new one.
#[derive(Debug)]
pub enum StreamNotice {
    Event(StreamEvent),
    Closed { reason: Option<String> },
    Failed { error: String },
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// One live push-stream connection.
///
/// Owns the socket exclusively; events are decoded on a reader task and
/// delivered in transport order through [`EventStream::next`]. A frame that
/// fails to decode becomes a non-fatal [`StreamEvent::Error`]; one bad
/// frame never tears down the stream.
pub struct EventStream {
    sink: WsSink,
    notices: mpsc::Receiver<StreamNotice>,
    reader: JoinHandle<()>,
    open: bool,
}

impl EventStream {
    /// Open a connection against the gateway's base URL (http/https is
    /// swapped for ws/wss), authenticated like the request client.
    ///
    /// On handshake success the stream is open and a `connected` event is
    /// queued for the consumer ahead of any gateway frame, so the consumer
    /// can reset its failure counter immediately.
    pub async fn connect(
        base_url: &str,
        auth_token: Option<&str>,
        options: StreamOptions,
    ) -> Result<Self> {
        let url = events_url(base_url)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| ClientError::Network(format!("bad stream url {url}: {err}")))?;

        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::Network("auth token is not a valid header value".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = match timeout(HANDSHAKE_TIMEOUT, connect_async(request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => return Err(classify_handshake_error(err)),
            Err(_) => return Err(ClientError::Network(format!("handshake with {url} timed out"))),
        };

        info!("event stream connected: {}", url);

        let (sink, mut source) = ws.split();
        let (tx, notices) = mpsc::channel(EVENT_BUFFER);

        // The gateway pushes its own connected frame, but the consumer must
        // learn about the transition even if that frame is delayed.
        let _ = tx
            .send(StreamNotice::Event(StreamEvent::Connected {
                message: None,
                metrics: None,
            }))
            .await;

        let include_heartbeats = options.include_heartbeats;
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        let notice = match serde_json::from_str::<StreamEvent>(text.as_str()) {
                            Ok(StreamEvent::Heartbeat { .. }) if !include_heartbeats => continue,
                            Ok(event) => StreamNotice::Event(event),
                            Err(err) => {
                                warn!("undecodable stream frame: {}", err);
                                StreamNotice::Event(StreamEvent::Error {
                                    message: format!("undecodable frame: {err}"),
                                })
                            }
                        };
                        if tx.send(notice).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        let _ = tx.send(StreamNotice::Closed { reason }).await;
                        return;
                    }
                    // Ping/pong are answered by tungstenite; binary frames
                    // are not part of the event protocol.
                    Ok(_) => {}
                    Err(err) => {
                        let _ = tx
                            .send(StreamNotice::Failed {
                                error: err.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = tx.send(StreamNotice::Closed { reason: None }).await;
        });

        Ok(Self {
            sink,
            notices,
            reader,
            open: true,
        })
    }

    /// Next notice, in transport order. Returns `None` once the connection
    /// has reported a terminal notice and the buffer is drained.
    pub async fn next(&mut self) -> Option<StreamNotice> {
        let notice = self.notices.recv().await;
        match notice {
            Some(StreamNotice::Closed { .. }) | Some(StreamNotice::Failed { .. }) | None => {
                self.open = false;
            }
            Some(StreamNotice::Event(_)) => {}
        }
        notice
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Close the connection without waiting for the peer. Idempotent.
    pub async fn stop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.sink.send(WsMessage::Close(None)).await {
            debug!("close frame not delivered: {}", err);
        }
        self.reader.abort();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn events_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        return Err(ClientError::Network(format!(
            "unsupported gateway url scheme: {base_url}"
        )));
    };
    Ok(format!("{ws_base}/ws/events"))
}

fn classify_handshake_error(err: WsError) -> ClientError {
    match err {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ClientError::Auth
        }
        WsError::Http(response) => ClientError::HttpStatus(response.status().as_u16()),
        WsError::Io(err) => ClientError::Network(err.to_string()),
        other => ClientError::Network(other.to_string()),
    }
}
