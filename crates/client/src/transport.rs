//! Transport seam: anything that can open a bidirectional text-frame link.

use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::auth::{authorize_url, TokenProvider};
use crate::error::TransportError;

/// Frames the driver asks a link to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Close the socket cleanly and stop writing.
    Close,
}

/// What a link reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    /// The peer or the network ended the link.
    Closed { reason: Option<String> },
}

/// An open link. Dropping `events` detaches the driver from it.
pub struct Link {
    pub writer: UnboundedSender<Outgoing>,
    pub events: UnboundedReceiver<LinkEvent>,
}

/// Opens links. The native implementation is [`TungsteniteConnector`];
/// tests substitute a scripted one.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Clone, Default)]
pub struct TungsteniteConnector {
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_provider(mut self, tokens: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let url = authorize_url(url, self.tokens.as_deref())?;
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        tracing::info!(host = url.host_str().unwrap_or_default(), "websocket open");

        let (mut write, mut read) = ws_stream.split();
        let (writer, mut outgoing) = unbounded::<Outgoing>();
        let (events_tx, events) = unbounded::<LinkEvent>();

        let events_for_read = events_tx.clone();
        tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(frame = %text.as_str(), "websocket received");
                        if events_for_read
                            .unbounded_send(LinkEvent::Frame(text.as_str().to_owned()))
                            .is_err()
                        {
                            // Driver detached; nobody is listening.
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| format!("closed by peer ({}): {}", f.code, f.reason.as_str()));
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong, etc.
                    }
                    Some(Err(e)) => break Some(format!("read error: {}", e)),
                    None => break Some("stream ended".to_string()),
                }
            };
            let _ = events_for_read.unbounded_send(LinkEvent::Closed { reason });
        });

        tokio::spawn(async move {
            while let Some(out) = outgoing.next().await {
                match out {
                    Outgoing::Text(frame) => {
                        tracing::debug!(%frame, "websocket send");
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            tracing::warn!(error = %e, "websocket send failed");
                            let _ = events_tx.unbounded_send(LinkEvent::Closed {
                                reason: Some(format!("write error: {}", e)),
                            });
                            return;
                        }
                    }
                    Outgoing::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            // Writer handle dropped without an explicit close.
            let _ = write.close().await;
        });

        Ok(Link { writer, events })
    }
}
