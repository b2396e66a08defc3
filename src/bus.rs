//! Message bus capability
//!
//! The core publishes through `Producer` and consumes through `Consumer`;
//! any ordered, at-least-once transport (Redis streams, Kafka, ...)
//! satisfies the contract. The in-memory bus fans each topic out to its
//! subscribers and redelivers a message until the handler accepts it, which
//! is the same at-least-once guarantee consumers must already tolerate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::Result;

/// A message in flight
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub topic: String,
    /// Partition key; ordering is only guaranteed per key
    pub key: String,
    pub payload: Vec<u8>,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Message handler. Returning `Err` requeues the message for redelivery;
/// returning `Ok` acknowledges it.
pub type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Deliver messages on `topic` to `handler` until shutdown fires.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// In-process bus for tests and single-node deployments
pub struct InMemoryBus {
    topics: DashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
    retry_delay: Duration,
    sequence: AtomicU64,
}

impl InMemoryBus {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            topics: DashMap::new(),
            retry_delay,
            sequence: AtomicU64::new(0),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl Producer for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let message = Message {
            id: id.to_string(),
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        };

        if let Some(mut senders) = self.topics.get_mut(topic) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        } else {
            debug!(topic, "no subscribers; message dropped");
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for InMemoryBus {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);
        debug!(topic, "subscribed");

        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            // Redeliver until the handler acknowledges or shutdown fires
            loop {
                match handler(message.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(topic, id = %message.id, "handler failed, will retry: {}", e);
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = Arc::new(InMemoryBus::default());
        let (stop_tx, stop_rx) = shutdown_pair();
        let seen = Arc::new(AtomicUsize::new(0));

        let handler_seen = seen.clone();
        let handler: Handler = Arc::new(move |msg: Message| {
            let seen = handler_seen.clone();
            Box::pin(async move {
                assert_eq!(msg.payload, b"hello");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let consumer = bus.clone();
        let task = tokio::spawn(async move {
            consumer.subscribe("t", handler, stop_rx).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.publish("t", "k", b"hello").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_is_redelivered() {
        let bus = Arc::new(InMemoryBus::new(Duration::from_millis(5)));
        let (stop_tx, stop_rx) = shutdown_pair();
        let attempts = Arc::new(AtomicUsize::new(0));

        let handler_attempts = attempts.clone();
        let handler: Handler = Arc::new(move |_msg: Message| {
            let attempts = handler_attempts.clone();
            Box::pin(async move {
                // Fail the first two deliveries
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(crate::error::Error::Bus("transient".into()))
                } else {
                    Ok(())
                }
            })
        });

        let consumer = bus.clone();
        let task = tokio::spawn(async move {
            consumer.subscribe("t", handler, stop_rx).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.publish("t", "", b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::default();
        bus.publish("nobody", "", b"x").await.unwrap();
    }
}
