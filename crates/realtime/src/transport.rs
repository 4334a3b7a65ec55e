//! Websocket transport seam.
//!
//! The manager only sees a [`Connection`]: a sender for outbound text frames and a
//! stream of inbound text frames. Ping/pong is answered by the transport, a close
//! frame or socket error ends the inbound stream with an error.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::StreamError;

/// One open upstream connection.
pub struct Connection {
    /// Outbound text frames. Dropping every sender closes the socket.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Inbound text frames. Ends when the upstream goes away.
    pub inbound: BoxStream<'static, Result<String, StreamError>>,
}

/// Opens upstream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, StreamError>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Connection, StreamError> {
        let (ws, _response) = connect_async(url).await.map_err(|e| StreamError::Connect {
            url: redact(url),
            message: e.to_string(),
        })?;
        debug!("Websocket connected: {}", redact(url));

        let (mut write, read) = ws.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    warn!("Websocket send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let inbound = read
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Close(frame)) => {
                        debug!("Websocket close frame: {:?}", frame);
                        Some(Err(StreamError::Closed))
                    }
                    // Ping is answered by tungstenite, binary frames are not used upstream
                    Ok(_) => None,
                    Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
                }
            })
            .boxed();

        Ok(Connection { outbound, inbound })
    }
}

/// Strip the query string so tokens never reach the logs.
pub(crate) fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}
