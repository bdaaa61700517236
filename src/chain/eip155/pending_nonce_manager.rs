use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out facilitator nonces from a local counter.
///
/// The first nonce for an account is read with `eth_getTransactionCount(.., "pending")` so
/// transactions still in the mempool after a restart are not reused. Later nonces are
/// allocated locally. Permit settlement sends two transactions back to back, which only works
/// if the second one gets the next nonce without waiting for the first to be mined.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    /// Last nonce handed out per account; `None` until fetched or after a reset.
    nonces: Arc<DashMap<Address, Arc<Mutex<Option<u64>>>>>,
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // Clone the slot out so the map shard is not held across the await below.
        let slot = Arc::clone(self.nonces.entry(address).or_default().value());

        let mut last = slot.lock().await;
        let next = match *last {
            Some(last) => {
                tracing::trace!(%address, last, "allocating next nonce locally");
                last + 1
            }
            None => {
                tracing::trace!(%address, "fetching pending nonce");
                provider.get_transaction_count(address).pending().await?
            }
        };
        *last = Some(next);
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forgets the cached nonce of `address`; the next allocation queries the node again.
    pub async fn reset_nonce(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address).map(|slot| Arc::clone(slot.value())) {
            *slot.lock().await = None;
            tracing::debug!(%address, "reset nonce cache");
        }
    }

    /// Last nonce handed out for `address`, if any.
    pub async fn last_nonce(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|slot| Arc::clone(slot.value()))?;
        let last = *slot.lock().await;
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const ACCOUNT: Address = address!("0x1111111111111111111111111111111111111111");

    #[tokio::test]
    async fn reset_clears_the_cached_nonce() {
        let manager = PendingNonceManager::default();
        manager
            .nonces
            .insert(ACCOUNT, Arc::new(Mutex::new(Some(7))));
        assert_eq!(manager.last_nonce(ACCOUNT).await, Some(7));

        manager.reset_nonce(ACCOUNT).await;
        assert_eq!(manager.last_nonce(ACCOUNT).await, None);
    }

    #[tokio::test]
    async fn reset_of_unknown_account_is_a_no_op() {
        let manager = PendingNonceManager::default();
        manager.reset_nonce(ACCOUNT).await;
        assert_eq!(manager.last_nonce(ACCOUNT).await, None);
        assert!(manager.nonces.is_empty());
    }

    #[tokio::test]
    async fn clones_share_the_cache() {
        let manager = PendingNonceManager::default();
        let clone = manager.clone();
        manager
            .nonces
            .insert(ACCOUNT, Arc::new(Mutex::new(Some(3))));
        assert_eq!(clone.last_nonce(ACCOUNT).await, Some(3));
    }
}
