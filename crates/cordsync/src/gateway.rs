//! Gateway payload envelope and the feed task that drives a [`Mirror`].
//!
//! The mirror does not own a connection. Whatever reads the gateway
//! socket pushes decoded payloads into an `mpsc` channel; [`run_feed`]
//! applies them in arrival order, one at a time, so payloads from one
//! connection are never applied concurrently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::differ::DiffOutcome;
use crate::mirror::Mirror;

/// One dispatch payload as received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Event name, e.g. `GUILD_UPDATE`.
    #[serde(rename = "t", default)]
    pub event_type: Option<String>,
    /// Sequence number assigned by the gateway.
    #[serde(rename = "s", default)]
    pub sequence: Option<u64>,
    /// Event data.
    #[serde(rename = "d", default)]
    pub data: Option<Value>,
}

impl GatewayPayload {
    pub fn new(event_type: impl Into<String>, sequence: Option<u64>, data: Value) -> Self {
        Self {
            event_type: Some(event_type.into()),
            sequence,
            data: Some(data),
        }
    }
}

/// Counters reported when a feed stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Payloads taken off the channel.
    pub payloads: usize,
    /// Snapshots applied to a tracked server.
    pub snapshots: usize,
    /// Field changes detected across all snapshots.
    pub changes: usize,
    /// Payloads that were malformed and skipped.
    pub errors: usize,
}

impl FeedSummary {
    fn record(&mut self, outcome: Option<DiffOutcome>) {
        if let Some(DiffOutcome::Applied { changed, .. }) = outcome {
            self.snapshots += 1;
            self.changes += changed;
        }
    }
}

/// Apply payloads from `rx` until the channel closes or shutdown is signalled.
///
/// A payload that fails to parse or apply is logged and skipped.
pub async fn run_feed(
    mirror: Arc<Mirror>,
    mut rx: mpsc::Receiver<GatewayPayload>,
    mut shutdown: watch::Receiver<bool>,
) -> FeedSummary {
    let mut summary = FeedSummary::default();
    info!("gateway feed started");

    loop {
        if *shutdown.borrow() {
            info!("gateway feed shutting down");
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("gateway feed received shutdown signal");
                    break;
                }
            }

            payload = rx.recv() => {
                let Some(payload) = payload else {
                    info!("gateway feed channel closed");
                    break;
                };
                summary.payloads += 1;
                let sequence = payload.sequence;
                match mirror.handle_payload(payload) {
                    Ok(outcome) => summary.record(outcome),
                    Err(e) => {
                        summary.errors += 1;
                        warn!(sequence = ?sequence, error = %e, "failed to handle gateway payload");
                    }
                }
            }
        }
    }

    debug!(
        payloads = summary.payloads,
        snapshots = summary.snapshots,
        changes = summary.changes,
        errors = summary.errors,
        "gateway feed stopped"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;
    use crate::cache::EntityCache;
    use crate::rest::{RequestSink, RestRequest};
    use async_trait::async_trait;
    use serde_json::json;

    struct NullSink;

    #[async_trait]
    impl RequestSink for NullSink {
        async fn execute(&self, _request: RestRequest) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn mirror_with_server(id: u64) -> Arc<Mirror> {
        let cache = EntityCache::new();
        cache.track_server(id);
        Arc::new(Mirror::new(cache, Arc::new(NullSink)))
    }

    #[test]
    fn test_payload_envelope() {
        let payload: GatewayPayload = serde_json::from_value(json!({
            "op": 0,
            "t": "GUILD_UPDATE",
            "s": 12,
            "d": {"id": "1"}
        }))
        .unwrap();
        assert_eq!(payload.event_type.as_deref(), Some("GUILD_UPDATE"));
        assert_eq!(payload.sequence, Some(12));

        let heartbeat: GatewayPayload =
            serde_json::from_value(json!({"op": 11, "t": null, "s": null})).unwrap();
        assert_eq!(heartbeat.event_type, None);
        assert_eq!(heartbeat.data, None);
    }

    #[tokio::test]
    async fn test_feed_runs_until_channel_closes() {
        let mirror = mirror_with_server(1);
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(GatewayPayload::new("GUILD_UPDATE", Some(1), json!({"id": "1", "name": "a"})))
            .await
            .unwrap();
        tx.send(GatewayPayload::new("GUILD_UPDATE", Some(2), json!("not an object")))
            .await
            .unwrap();
        tx.send(GatewayPayload::new("GUILD_UPDATE", Some(3), json!({"id": "1", "name": "b", "afk_timeout": 60})))
            .await
            .unwrap();
        drop(tx);

        let summary = run_feed(Arc::clone(&mirror), rx, shutdown_rx).await;

        assert_eq!(
            summary,
            FeedSummary {
                payloads: 3,
                snapshots: 2,
                changes: 3,
                errors: 1
            }
        );
        assert_eq!(mirror.cache().get(1).unwrap().name(), "b");
    }

    #[tokio::test]
    async fn test_feed_stops_on_shutdown() {
        let mirror = mirror_with_server(1);
        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_feed(mirror, rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.payloads, 0);
    }
}
