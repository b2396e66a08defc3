//! Outbox relay: ships PENDING outbox rows to the message bus
//!
//! A row is marked SENT only after an acknowledged publish, so a publish
//! that succeeds but whose status update is lost gets republished on the
//! next tick. Consumers therefore see at-least-once delivery and must be
//! idempotent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Producer;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            batch_size: 50,
        }
    }
}

pub struct Relay {
    store: Arc<Store>,
    producer: Arc<dyn Producer>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(store: Arc<Store>, producer: Arc<dyn Producer>, config: RelayConfig) -> Self {
        Self {
            store,
            producer,
            config,
        }
    }

    /// Tick until shutdown fires
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval_ms = self.config.interval.as_millis() as u64, "starting outbox relay");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    self.drain_pending().await;
                }
            }
        }
        info!("outbox relay stopped");
        Ok(())
    }

    /// Publish one batch of PENDING rows in id order
    pub async fn drain_pending(&self) {
        let batch = self.store.pending_outbox(self.config.batch_size).await;
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "relaying outbox batch");

        for message in batch {
            let key = partition_key(&message.payload);
            if let Err(e) = self
                .producer
                .publish(&message.topic, &key, &message.payload)
                .await
            {
                // Leave PENDING; the next tick retries
                warn!(id = message.id, topic = %message.topic, "publish failed: {}", e);
                continue;
            }
            if let Err(e) = self.store.mark_outbox_sent(message.id).await {
                // Already published; the consumer side must dedupe
                warn!(id = message.id, "publish acknowledged but status update failed: {}", e);
            }
        }
    }
}

/// Partition by user so per-user ordering survives the bus.
/// Payloads without a user id fall back to the empty key.
fn partition_key(payload: &[u8]) -> String {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|v| v.get("user_id").and_then(Value::as_u64))
        .map(|id| id.to_string())
        .unwrap_or_default()
}
