//! WebSocket event channel.
//!
//! Frames are JSON-encoded [`SyncEvent`]s in text messages. Malformed frames
//! are logged and dropped rather than tearing the channel down; a close frame
//! or end-of-stream reads as a clean close.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest, http::header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::channel::EventChannel;
use crate::error::{OutpostError, Result};
use crate::model::SyncEvent;

pub struct WebSocketChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebSocketChannel {
    /// Connect to a `ws://` or `wss://` endpoint, optionally with a bearer
    /// token, bounded by `connect_timeout`.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|err| OutpostError::Channel(format!("invalid channel url: {err}")))?;
        if let Some(token) = token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| OutpostError::Channel("token is not a valid header".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        match timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok((ws, _response))) => {
                debug!(url, "Event channel connected");
                Ok(Self {
                    ws,
                    url: url.to_string(),
                })
            }
            Ok(Err(err)) => Err(OutpostError::Channel(format!("connect failed: {err}"))),
            Err(_) => Err(OutpostError::Timeout(format!(
                "channel connect exceeded {}ms",
                connect_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl EventChannel for WebSocketChannel {
    async fn next_event(&mut self) -> Result<Option<SyncEvent>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(err) => {
                        warn!(error = %err, "Dropping malformed channel frame");
                    }
                },
                Ok(Message::Ping(payload)) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|err| OutpostError::Channel(format!("pong failed: {err}")))?;
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => {}
                Err(err) => {
                    return Err(OutpostError::Channel(format!("receive failed: {err}")));
                }
            }
        }
        Ok(None)
    }

    async fn send(&mut self, event: &SyncEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|err| OutpostError::Channel(format!("send failed: {err}")))
    }

    async fn close(&mut self) -> Result<()> {
        // A close error usually means the peer is already gone.
        if let Err(err) = self.ws.close(None).await {
            debug!(error = %err, "Channel close raced peer shutdown");
        }
        Ok(())
    }
}
