//! Websocket Transport
//!
//! tokio-tungstenite adapter behind the transport ports. The rest of
//! the stack only ever sees text frames: control frames are handled
//! here (tungstenite answers pings automatically) and binary frames
//! are dropped with a warning, since the protocol is JSON-over-text.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::application::ports::{Connector, FrameSink, FrameSource, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real websocket connections.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        let (write, read) = stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(_)) => {
                    tracing::warn!("dropping unexpected binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
    }
}
