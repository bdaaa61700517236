//! Settlement tracking.
//!
//! Settlement returns as soon as a transaction is broadcast. The hash is recorded here and a
//! background task polls each network for the receipt, recording how long the transaction took
//! to land. Entries that never confirm are dropped after a timeout; confirmed ones are kept
//! for a retention window after confirmation.

use alloy_primitives::TxHash;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::{ChainClient, ChainRegistry, ObservedReceipt};
use crate::config::TrackerConfig;
use crate::proto::ReceiptResponse;
use crate::timestamp::UnixTimestamp;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptKey {
    pub tx: TxHash,
    pub network: String,
}

impl ReceiptKey {
    pub fn new(tx: TxHash, network: impl Into<String>) -> Self {
        Self {
            tx,
            network: network.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingReceipt {
    pub submitted_at: SystemTime,
    pub receipt: Option<ObservedReceipt>,
    /// Block time minus submission time, set together with `receipt`.
    pub settle_duration: Option<Duration>,
    /// When the tracker stored the receipt.
    pub confirmed_at: Option<SystemTime>,
}

impl PendingReceipt {
    pub fn new(submitted_at: SystemTime) -> Self {
        Self {
            submitted_at,
            receipt: None,
            settle_duration: None,
            confirmed_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.receipt.is_some()
    }

    fn elapsed(&self, now: SystemTime) -> Duration {
        now.duration_since(self.submitted_at).unwrap_or_default()
    }

    fn is_stale(&self, now: SystemTime, timeout: Duration, retention: Duration) -> bool {
        match self.confirmed_at {
            None => self.elapsed(now) > timeout,
            Some(confirmed_at) => now.duration_since(confirmed_at).unwrap_or_default() > retention,
        }
    }

    pub fn to_response(&self, now: SystemTime) -> ReceiptResponse {
        match &self.receipt {
            None => ReceiptResponse::Pending {
                await_time: self.elapsed(now).as_secs_f64(),
            },
            Some(receipt) => {
                let settle_duration = self.settle_duration.unwrap_or_default();
                ReceiptResponse::Found {
                    settle_time: format!("{} sec", settle_duration.as_secs_f64()),
                    receipt: receipt.body.clone(),
                }
            }
        }
    }
}

/// Shared store of submitted transactions, keyed by hash and network.
#[derive(Debug, Clone, Default)]
pub struct ReceiptStore(Arc<DashMap<ReceiptKey, PendingReceipt>>);

impl ReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `tx`. Resubmitting a hash restarts its clock.
    pub fn submit(&self, tx: TxHash, network: &str) {
        self.submit_at(tx, network, SystemTime::now());
    }

    pub fn submit_at(&self, tx: TxHash, network: &str, submitted_at: SystemTime) {
        self.0
            .insert(ReceiptKey::new(tx, network), PendingReceipt::new(submitted_at));
        tracing::info!(tx = %tx, network, "Tracking submitted transaction");
    }

    pub fn get(&self, tx: TxHash, network: &str) -> Option<PendingReceipt> {
        self.0
            .get(&ReceiptKey::new(tx, network))
            .map(|entry| entry.value().clone())
    }

    pub fn response(&self, tx: TxHash, network: &str, now: SystemTime) -> ReceiptResponse {
        match self.get(tx, network) {
            Some(pending) => pending.to_response(now),
            None => ReceiptResponse::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes unconfirmed entries submitted more than `timeout` ago and confirmed entries
    /// stored more than `retention` ago. Returns each dropped key and whether it was confirmed.
    fn expire(
        &self,
        now: SystemTime,
        timeout: Duration,
        retention: Duration,
    ) -> Vec<(ReceiptKey, bool)> {
        let expired: Vec<(ReceiptKey, bool)> = self
            .0
            .iter()
            .filter(|entry| entry.is_stale(now, timeout, retention))
            .map(|entry| (entry.key().clone(), entry.is_confirmed()))
            .collect();
        for (key, _) in &expired {
            self.0
                .remove_if(key, |_, entry| entry.is_stale(now, timeout, retention));
        }
        expired
    }

    fn unconfirmed(&self) -> Vec<(ReceiptKey, SystemTime)> {
        self.0
            .iter()
            .filter(|entry| !entry.is_confirmed())
            .map(|entry| (entry.key().clone(), entry.submitted_at))
            .collect()
    }

    /// Records the receipt unless the entry was dropped or resubmitted meanwhile.
    fn confirm(
        &self,
        key: &ReceiptKey,
        submitted_at: SystemTime,
        receipt: ObservedReceipt,
        settle_duration: Duration,
        now: SystemTime,
    ) -> bool {
        match self.0.get_mut(key) {
            Some(mut entry) if entry.submitted_at == submitted_at && !entry.is_confirmed() => {
                entry.receipt = Some(receipt);
                entry.settle_duration = Some(settle_duration);
                entry.confirmed_at = Some(now);
                true
            }
            _ => false,
        }
    }
}

/// Polls chains for receipts of the transactions in a [`ReceiptStore`].
#[derive(Debug, Clone)]
pub struct SettlementTracker {
    store: ReceiptStore,
    chains: ChainRegistry,
    poll_interval: Duration,
    timeout: Duration,
    retention: Duration,
}

impl SettlementTracker {
    pub fn new(store: ReceiptStore, chains: ChainRegistry, config: &TrackerConfig) -> Self {
        Self {
            store,
            chains,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            retention: config.retention(),
        }
    }

    pub fn store(&self) -> &ReceiptStore {
        &self.store
    }

    /// One pass over the unconfirmed entries. RPC failures leave an entry for the next pass.
    pub async fn poll_once(&self, now: SystemTime) {
        for (key, confirmed) in self.store.expire(now, self.timeout, self.retention) {
            if confirmed {
                tracing::debug!(tx = %key.tx, network = %key.network, "Receipt retention elapsed, dropping");
            } else {
                tracing::warn!(tx = %key.tx, network = %key.network, timeout = ?self.timeout, "Transaction not confirmed in time, dropping");
            }
        }

        let lookups = self
            .store
            .unconfirmed()
            .into_iter()
            .filter_map(|(key, submitted_at)| match self.chains.by_network(&key.network) {
                Some(client) => Some(async move {
                    let observed = observe(client.as_ref(), key.tx, submitted_at, now).await;
                    (key, submitted_at, observed)
                }),
                None => {
                    tracing::warn!(tx = %key.tx, network = %key.network, "No chain client for network");
                    None
                }
            });

        for (key, submitted_at, observed) in futures_util::future::join_all(lookups).await {
            if let Some((receipt, settle_duration)) = observed
                && self.store.confirm(&key, submitted_at, receipt, settle_duration, now)
            {
                tracing::event!(tracing_core::Level::INFO, status = "confirmed", tx = %key.tx, network = %key.network, settle_secs = settle_duration.as_secs_f64(), "Receipt stored");
            }
        }
    }

    /// Spawns the polling loop on `task_tracker`; it exits when `cancellation_token` fires.
    pub fn spawn(self, task_tracker: &TaskTracker, cancellation_token: CancellationToken) {
        task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        tracing::info!("Settlement tracker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.poll_once(SystemTime::now()).await;
                    }
                }
            }
        });
    }
}

/// Fetches the receipt of `tx`, and how long it took to land if it did.
async fn observe(
    client: &dyn ChainClient,
    tx: TxHash,
    submitted_at: SystemTime,
    now: SystemTime,
) -> Option<(ObservedReceipt, Duration)> {
    let receipt = match client.transaction_receipt(tx).await {
        Ok(Some(receipt)) => receipt,
        Ok(None) => {
            tracing::debug!(tx = %tx, network = client.network(), "Still pending");
            return None;
        }
        Err(error) => {
            tracing::debug!(tx = %tx, network = client.network(), error = %error, "Receipt lookup failed");
            return None;
        }
    };
    let block_time = match receipt.block_number {
        Some(block_number) => client
            .block_timestamp(block_number)
            .await
            .inspect_err(|error| {
                tracing::debug!(block_number, error = %error, "Block timestamp lookup failed");
            })
            .ok()
            .flatten(),
        None => None,
    };
    let settled_at = block_time.map_or(now, |t: UnixTimestamp| t.as_system_time());
    let settle_duration = settled_at
        .duration_since(submitted_at)
        .unwrap_or_default();
    Some((receipt, settle_duration))
}
