use std::sync::Arc;

use assessment_core::{Indicator, IndicatorSnapshot};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

pub mod transport;

pub use transport::{FeedEvent, FeedTransport, WsFeedTransport};

/// Wire shape of the indicator feed document. Decoded permissively:
/// unknown fields ignored, alternate field names mapped to canonical ones.
#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    indicators: Vec<WireIndicator>,
    #[serde(default, alias = "collected_at")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireIndicator {
    indicator_name: String,
    #[serde(default)]
    hit_status: bool,
    #[serde(default, alias = "value")]
    current_value: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
}

/// Decode a raw feed document into a snapshot. Returns None when the
/// document does not have the expected shape.
fn decode_snapshot(feed_id: &str, value: &serde_json::Value) -> Option<IndicatorSnapshot> {
    let doc: FeedDocument = serde_json::from_value(value.clone()).ok()?;
    Some(IndicatorSnapshot {
        id: feed_id.to_string(),
        indicators: doc
            .indicators
            .into_iter()
            .map(|i| Indicator {
                name: i.indicator_name,
                hit: i.hit_status,
                current_value: i.current_value,
                threshold: i.threshold,
            })
            .collect(),
        collected_at: doc.timestamp,
    })
}

/// Owns one push subscription to the indicator feed and the latest decoded
/// snapshot. The snapshot is replaced wholesale on every event through a
/// last-write-wins watch cell; concurrent readers see either the old or
/// the new value in full.
pub struct IndicatorSubscription {
    slot: watch::Receiver<Option<IndicatorSnapshot>>,
    transport: Arc<dyn FeedTransport>,
}

impl IndicatorSubscription {
    /// Spawns the transport and the event-consuming task. The subscription
    /// stays alive across transport errors; errors only degrade the
    /// snapshot to None.
    pub fn spawn(feed_id: String, transport: Arc<dyn FeedTransport>) -> Self {
        let (slot_tx, slot_rx) = watch::channel(None);
        let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(64);

        let runner = Arc::clone(&transport);
        tokio::spawn(async move {
            runner.run(event_tx).await;
        });

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    FeedEvent::Document(value) => match decode_snapshot(&feed_id, &value) {
                        Some(snapshot) => {
                            tracing::debug!(
                                "Indicator snapshot updated: {} indicators",
                                snapshot.indicators.len()
                            );
                            let _ = slot_tx.send(Some(snapshot));
                        }
                        None => {
                            tracing::warn!("Indicator document failed to decode, clearing snapshot");
                            let _ = slot_tx.send(None);
                        }
                    },
                    FeedEvent::Missing => {
                        tracing::warn!("Indicator document missing, clearing snapshot");
                        let _ = slot_tx.send(None);
                    }
                    FeedEvent::Error(e) => {
                        tracing::warn!("Indicator feed error: {}, clearing snapshot", e);
                        let _ = slot_tx.send(None);
                    }
                }
            }
            tracing::info!("Indicator subscription event stream ended");
        });

        Self {
            slot: slot_rx,
            transport,
        }
    }

    /// Latest available snapshot, or None when the feed is down or the
    /// document is absent. Eventually consistent with the push stream.
    pub fn current(&self) -> Option<IndicatorSnapshot> {
        self.slot.borrow().clone()
    }

    /// Cancels the underlying subscription. Idempotent.
    pub fn teardown(&self) {
        self.transport.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct ScriptedTransport {
        events: Mutex<Vec<FeedEvent>>,
    }

    impl ScriptedTransport {
        fn new(events: Vec<FeedEvent>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn run(self: Arc<Self>, events: mpsc::Sender<FeedEvent>) {
            let scripted = std::mem::take(&mut *self.events.lock().await);
            for event in scripted {
                let _ = events.send(event).await;
            }
            // Keep the channel open so the slot retains its last value.
            std::future::pending::<()>().await;
        }

        fn shutdown(&self) {}
    }

    fn sample_document() -> serde_json::Value {
        serde_json::json!({
            "indicators": [
                {"indicator_name": "pi_cycle", "hit_status": true, "current_value": 0.92, "threshold": 1.0},
                {"indicator_name": "mvrv_z", "hit_status": false, "value": 2.1, "threshold": 7.0}
            ],
            "collected_at": "2024-03-01T12:00:00Z"
        })
    }

    #[test]
    fn decode_maps_alternate_value_field() {
        let snapshot = decode_snapshot("feed", &sample_document()).unwrap();
        assert_eq!(snapshot.indicators.len(), 2);
        assert_eq!(snapshot.indicators[0].name, "pi_cycle");
        assert!(snapshot.indicators[0].hit);
        assert_eq!(snapshot.indicators[1].current_value, Some(2.1));
        assert!(snapshot.collected_at.is_some());
    }

    #[test]
    fn decode_tolerates_missing_fields() {
        let doc = serde_json::json!({
            "indicators": [{"indicator_name": "puell"}],
            "extra_field": 42
        });
        let snapshot = decode_snapshot("feed", &doc).unwrap();
        assert_eq!(snapshot.indicators.len(), 1);
        assert!(!snapshot.indicators[0].hit);
        assert!(snapshot.indicators[0].current_value.is_none());
        assert!(snapshot.collected_at.is_none());
    }

    #[tokio::test]
    async fn subscription_replaces_snapshot_wholesale() {
        let transport = Arc::new(ScriptedTransport::new(vec![FeedEvent::Document(
            sample_document(),
        )]));
        let sub = IndicatorSubscription::spawn("feed".to_string(), transport);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let snapshot = sub.current().expect("snapshot should be present");
        assert_eq!(snapshot.id, "feed");
        assert_eq!(snapshot.indicators.len(), 2);
    }

    #[tokio::test]
    async fn transport_error_degrades_to_none() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            FeedEvent::Document(sample_document()),
            FeedEvent::Error("connection reset".to_string()),
        ]));
        let sub = IndicatorSubscription::spawn("feed".to_string(), transport);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sub.current().is_none());

        // Teardown is idempotent.
        sub.teardown();
        sub.teardown();
    }

    #[tokio::test]
    async fn missing_document_clears_snapshot() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            FeedEvent::Document(sample_document()),
            FeedEvent::Missing,
        ]));
        let sub = IndicatorSubscription::spawn("feed".to_string(), transport);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sub.current().is_none());
    }
}
