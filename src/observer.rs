//! Chain observer: turns on-chain transfers into durable domain events
//!
//! One fetcher task walks block heights in order and feeds a bounded queue;
//! a pool of workers drains it and matches each transfer against the known
//! deposit addresses. The queue provides backpressure: when workers lag the
//! fetcher blocks on enqueue. When the fetcher exits it drops the sender,
//! which drains and stops the workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::chain::{eth_to_wei, Block, BlockSource, BlockTx};
use crate::error::Result;
use crate::model::Chain;
use crate::store::{NewDeposit, Store};

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub start_height: u64,
    pub worker_count: usize,
    /// Delay before re-polling when the chain head has not advanced
    pub poll_interval: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            worker_count: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct Observer {
    store: Arc<Store>,
    source: Arc<dyn BlockSource>,
    config: ObserverConfig,
    current_height: Arc<AtomicU64>,
}

impl Observer {
    pub fn new(store: Arc<Store>, source: Arc<dyn BlockSource>, config: ObserverConfig) -> Self {
        let current_height = Arc::new(AtomicU64::new(config.start_height));
        Self {
            store,
            source,
            config,
            current_height,
        }
    }

    /// Next height the fetcher will ask for. Written only by the fetcher.
    pub fn current_height(&self) -> u64 {
        self.current_height.load(Ordering::Relaxed)
    }

    /// Run fetcher and workers until shutdown fires
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let capacity = self.config.worker_count.max(1) * 2;
        let (block_tx, block_rx) = mpsc::channel::<Block>(capacity);
        let block_rx = Arc::new(Mutex::new(block_rx));

        info!(
            start_height = self.config.start_height,
            workers = self.config.worker_count,
            "starting chain observer"
        );

        let mut tasks = Vec::new();
        for worker_id in 0..self.config.worker_count.max(1) {
            let store = self.store.clone();
            let rx = block_rx.clone();
            tasks.push(tokio::spawn(async move {
                worker_loop(worker_id, store, rx).await;
            }));
        }

        let fetcher = {
            let source = self.source.clone();
            let current_height = self.current_height.clone();
            let poll_interval = self.config.poll_interval;
            tokio::spawn(async move {
                fetcher_loop(source, current_height, block_tx, poll_interval, shutdown).await;
            })
        };

        fetcher.await.ok();
        for task in tasks {
            task.await.ok();
        }
        info!("chain observer stopped");
        Ok(())
    }
}

async fn fetcher_loop(
    source: Arc<dyn BlockSource>,
    current_height: Arc<AtomicU64>,
    block_tx: mpsc::Sender<Block>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let height = current_height.load(Ordering::Relaxed);

        let fetched = tokio::select! {
            _ = shutdown.changed() => break,
            fetched = source.fetch_block(height) => fetched,
        };

        match fetched {
            Ok(Some(block)) => {
                debug!(height, txs = block.transactions.len(), "fetched block");
                // Backpressure: blocks here when the workers lag
                tokio::select! {
                    _ = shutdown.changed() => break,
                    sent = block_tx.send(block) => {
                        if sent.is_err() {
                            break;
                        }
                        current_height.store(height + 1, Ordering::Relaxed);
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                warn!(height, "block fetch failed: {}", e);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    // Dropping the sender closes the queue and drains the workers
}

async fn worker_loop(worker_id: usize, store: Arc<Store>, rx: Arc<Mutex<mpsc::Receiver<Block>>>) {
    loop {
        let block = { rx.lock().await.recv().await };
        let Some(block) = block else {
            debug!(worker_id, "queue closed, worker exiting");
            break;
        };

        for transfer in &block.transactions {
            if let Err(e) = process_transaction(&store, block.height, transfer).await {
                error!(
                    worker_id,
                    tx_hash = %transfer.hash,
                    "failed to process transaction: {}", e
                );
            }
        }
        debug!(worker_id, height = block.height, "processed block");
    }
}

async fn process_transaction(store: &Store, block_height: u64, transfer: &BlockTx) -> Result<()> {
    // Filter: only transfers to one of our deposit addresses matter
    let Some(address) = store
        .address_by_chain_address(Chain::Eth, &transfer.to)
        .await
    else {
        return Ok(());
    };

    // Zero-value transfers carry nothing to sweep
    if eth_to_wei(&transfer.value).map(|wei| wei == 0).unwrap_or(true) {
        warn!(tx_hash = %transfer.hash, value = %transfer.value, "skipping non-positive transfer");
        return Ok(());
    }

    let recorded = store
        .record_deposit(NewDeposit {
            user_id: address.user_id,
            address_id: address.id,
            tx_hash: transfer.hash.clone(),
            amount: transfer.value.clone(),
            block_height,
        })
        .await?;

    match recorded {
        Some(deposit) => {
            info!(
                user_id = deposit.user_id,
                tx_hash = %deposit.tx_hash,
                amount = %deposit.amount,
                block_height,
                "deposit recorded"
            );
        }
        None => {
            debug!(tx_hash = %transfer.hash, "deposit already recorded, skipping");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedSource;
    use crate::model::TOPIC_DEPOSIT;

    fn deposit_block(height: u64, to: &str) -> Block {
        Block {
            height,
            hash: format!("0xblock{}", height),
            transactions: vec![
                BlockTx {
                    hash: format!("0xtx{}a", height),
                    from: "0xsomeone".into(),
                    to: to.to_string(),
                    value: "0.5".into(),
                },
                BlockTx {
                    hash: format!("0xtx{}b", height),
                    from: "0xsomeone".into(),
                    to: "0xnobody".into(),
                    value: "100".into(),
                },
            ],
        }
    }

    async fn run_once(store: Arc<Store>, blocks: Vec<Block>) {
        let observer = Observer::new(
            store,
            Arc::new(SimulatedSource::scripted(blocks)),
            ObserverConfig {
                start_height: 0,
                worker_count: 2,
                poll_interval: Duration::from_millis(10),
            },
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(async move { observer.run(stop_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_matching_transfer_becomes_deposit_and_event() {
        let store = Arc::new(Store::new());
        let addr = store
            .insert_address(1, Chain::Eth, "0xdeposit".into(), 1)
            .await
            .unwrap();

        run_once(store.clone(), vec![deposit_block(0, "0xdeposit")]).await;

        let deposit = store.deposit_by_tx("0xtx0a").await.expect("deposit recorded");
        assert_eq!(deposit.user_id, 1);
        assert_eq!(deposit.address_id, addr.id);
        assert_eq!(deposit.amount, "0.5");

        let outbox = store.pending_outbox(10).await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].topic, TOPIC_DEPOSIT);

        // The noise transfer to a foreign address was dropped
        assert_eq!(store.deposit_count().await, 1);
    }

    #[tokio::test]
    async fn test_replayed_blocks_are_idempotent() {
        let store = Arc::new(Store::new());
        store
            .insert_address(1, Chain::Eth, "0xdeposit".into(), 1)
            .await
            .unwrap();

        for _ in 0..3 {
            run_once(store.clone(), vec![deposit_block(0, "0xdeposit")]).await;
        }

        assert_eq!(store.deposit_count().await, 1);
        assert_eq!(store.pending_outbox(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_height_advances_in_order() {
        let store = Arc::new(Store::new());
        let blocks = (0..5).map(|h| deposit_block(h, "0xnothing")).collect();
        let observer = Observer::new(
            store,
            Arc::new(SimulatedSource::scripted(blocks)),
            ObserverConfig {
                start_height: 0,
                worker_count: 1,
                poll_interval: Duration::from_millis(10),
            },
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let current = observer.current_height();
        assert_eq!(current, 0);

        let observer = Arc::new(observer);
        let run_observer = observer.clone();
        let run = tokio::spawn(async move { run_observer.run(stop_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(observer.current_height(), 5);
        stop_tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_value_transfer_is_dropped() {
        let store = Arc::new(Store::new());
        store
            .insert_address(1, Chain::Eth, "0xdeposit".into(), 1)
            .await
            .unwrap();

        let mut block = deposit_block(0, "0xdeposit");
        block.transactions[0].value = "0".into();
        run_once(store.clone(), vec![block]).await;

        assert_eq!(store.deposit_count().await, 0);
    }
}
