//! Socket abstraction under the subscription actor.
//!
//! The actor only needs a sink for outbound text frames and a stream of
//! inbound ones. `Connector` produces that pair; `TungsteniteConnector` is
//! the real implementation, tests plug in channel-backed sockets.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WsError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("socket error: {0}")]
    Socket(String),

    /// The peer closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => WsError::Closed(err.to_string()),
            other => WsError::Socket(other.to_string()),
        }
    }
}

pub type WsSink = Pin<Box<dyn Sink<String, Error = WsError> + Send>>;
pub type WsStream = Pin<Box<dyn Stream<Item = Result<String, WsError>> + Send>>;

/// An open connection: text frames out, text frames in.
pub struct WsConnection {
    pub sink: WsSink,
    pub stream: WsStream,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WsConnection, WsError>;
}

/// WebSocket connector over `tokio-tungstenite`.
///
/// Pings are answered by tungstenite itself while the stream is polled;
/// only text (and UTF-8 binary) frames reach the actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WsConnection, WsError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| WsError::Connect(e.to_string()))?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(WsError::from)
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::text(text))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok().map(Ok),
                Ok(Message::Close(frame)) => Some(Err(WsError::Closed(
                    frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string()),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(WsError::from(e))),
            })
        });

        Ok(WsConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
