//! Text-frame transport underneath the connection supervisor.

use async_trait::async_trait;
use futures::stream::{SplitSink, Stream};
use futures::{SinkExt, StreamExt};
use mjlink_core::{Error, Result};
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Inbound text frames. The stream ends when the peer closes; an `Err`
/// item is a transport fault.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::ConnectionFault(format!("send failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| Error::ConnectionFault(format!("close failed: {}", e)))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let url = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid gateway URL: {}", e)))?;
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFault(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        let stream = read.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "Gateway sent close frame");
                    Some(Err(Error::ConnectionFault("closed by gateway".to_string())))
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::ConnectionFault(e.to_string()))),
            }
        });

        Ok(Connection {
            sink: Box::new(WsSink { inner: write }),
            stream: Box::pin(stream),
        })
    }
}
