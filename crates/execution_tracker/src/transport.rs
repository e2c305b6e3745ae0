use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::domain::RunId;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{TrackerError, TransportError};

/// One open channel for a run. `next_frame` yields text frames only and
/// returns `None` once the peer closes.
#[async_trait]
pub trait FrameConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn connect(&self, run_id: &RunId) -> Result<Box<dyn FrameConnection>, TransportError>;
}

/// Accepts `ws://`, `wss://`, `http://` or `https://` and returns the
/// websocket form of the base url.
pub fn normalize_ws_base(raw: &str) -> Result<Url, TrackerError> {
    let raw = raw.trim();
    let ws_base = if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else {
        return Err(TrackerError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "must start with ws://, wss://, http:// or https://".to_string(),
        });
    };

    let url = Url::parse(&ws_base).map_err(|err| TrackerError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(TrackerError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "url cannot carry a path".to_string(),
        });
    }
    Ok(url)
}

/// `<ws-base>/ws/executions/<run_id>/`
pub fn execution_endpoint(ws_base: &Url, run_id: &RunId) -> Result<Url, TransportError> {
    let mut url = ws_base.clone();
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidEndpoint(ws_base.to_string()))?
        .pop_if_empty()
        .extend(["ws", "executions", run_id.as_str(), ""]);
    Ok(url)
}

pub struct WsTransport {
    ws_base: Url,
}

impl WsTransport {
    pub fn new(ws_base: &str) -> Result<Self, TrackerError> {
        Ok(Self {
            ws_base: normalize_ws_base(ws_base)?,
        })
    }

    pub fn ws_base(&self) -> &Url {
        &self.ws_base
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn connect(&self, run_id: &RunId) -> Result<Box<dyn FrameConnection>, TransportError> {
        let url = execution_endpoint(&self.ws_base, run_id)?;
        let (stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        debug!(run_id = %run_id, %url, "tracker: websocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "tracker: websocket close did not complete cleanly");
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
