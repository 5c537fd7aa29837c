use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// One push event from the feed transport.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The remote document exists; carries its raw JSON contents.
    Document(serde_json::Value),
    /// The remote document does not exist (deleted or never written).
    Missing,
    /// The transport errored. The subscription degrades to no-data and
    /// keeps listening; the transport reconnects on its own.
    Error(String),
}

/// Opaque push source for the indicator feed. Implementations run until
/// shutdown is requested and deliver events on the given channel.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn run(self: Arc<Self>, events: mpsc::Sender<FeedEvent>);

    fn shutdown(&self);
}

/// WebSocket-backed feed transport watching a single logical document.
/// Reconnects after transport errors; a graceful close ends the stream.
pub struct WsFeedTransport {
    url: String,
    document: String,
    shutdown: Arc<tokio::sync::Notify>,
}

impl WsFeedTransport {
    pub fn new(url: String, document: String) -> Self {
        Self {
            url,
            document,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    async fn connect_and_stream(
        &self,
        events: &mpsc::Sender<FeedEvent>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Connected to indicator feed at {}", self.url);

        let sub_msg = serde_json::json!({"action": "subscribe", "document": self.document});
        write.send(Message::Text(sub_msg.to_string())).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text, events).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Indicator feed connection closed");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(Box::new(e));
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_message(&self, text: &str, events: &mpsc::Sender<FeedEvent>) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                let deleted = value
                    .get("deleted")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let event = if deleted {
                    FeedEvent::Missing
                } else {
                    FeedEvent::Document(value)
                };
                let _ = events.send(event).await;
            }
            Err(e) => {
                tracing::debug!("Unparseable feed message: {}", e);
            }
        }
    }
}

#[async_trait]
impl FeedTransport for WsFeedTransport {
    async fn run(self: Arc<Self>, events: mpsc::Sender<FeedEvent>) {
        loop {
            match self.connect_and_stream(&events).await {
                Ok(()) => {
                    tracing::info!("Indicator feed disconnected gracefully");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Indicator feed error: {}, reconnecting in 5s", e);
                    let _ = events.send(FeedEvent::Error(e.to_string())).await;
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {},
                        _ = self.shutdown.notified() => {
                            tracing::info!("Indicator feed shutdown requested");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
