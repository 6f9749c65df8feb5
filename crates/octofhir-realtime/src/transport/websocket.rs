//! WebSocket connector built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use super::{Connection, Connector, TransportFrame, redacted};
use crate::error::TransportError;

/// Production connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::connect(redacted(url), e.to_string()))?;
        debug!(
            endpoint = %redacted(url),
            status = %response.status(),
            "WebSocket handshake completed"
        );
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::receive(e.to_string()))),
            };
            let frame = match msg {
                Message::Text(text) => TransportFrame::Text(text),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => TransportFrame::Text(text),
                    Err(_) => {
                        debug!("Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Ping(_) | Message::Pong(_) => TransportFrame::Heartbeat,
                Message::Close(frame) => TransportFrame::Close(frame.map(|f| u16::from(f.code))),
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}
