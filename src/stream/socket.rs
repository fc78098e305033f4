//! WebSocket transport for the live stream

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct StreamSocket {
    stream: WsStream,
}

impl StreamSocket {
    /// Open the socket. The access token travels in the URL query, so only
    /// the host is logged.
    pub async fn connect(url: &Url) -> Result<Self> {
        tracing::info!(
            "Connecting stream to {}://{}",
            url.scheme(),
            url.host_str().unwrap_or("?")
        );

        let (stream, response) = connect_async(url.as_str())
            .await
            .context("WebSocket connection failed")?;

        tracing::debug!("WebSocket connected (status={})", response.status());
        Ok(Self { stream })
    }

    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Next text frame, answering transport-level pings. `None` once closed.
    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => return Ok(None),
            }
        }
    }

    /// Best-effort close.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}
