//! C14: Beam Sync — read-through account/storage cache for an executor that
//! needs state before snap/full sync has caught up (spec §4.10). Grounded on
//! the teacher's on-demand `Store` read path, generalized behind a small
//! fetcher trait since the teacher couples this directly to its RocksDB/
//! libmdbx backend.

use crate::types::{AccountData, StorageData};
use async_trait::async_trait;
use ethereum_types::H256;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Narrow network seam for on-demand single-item reads — distinct from
/// `SnapPeer`'s ranged requests, since beam sync fetches one key at a time.
#[async_trait]
pub trait BeamFetcher: Send + Sync {
    async fn fetch_account(&self, hash: H256) -> Result<AccountData, String>;
    async fn fetch_storage(&self, account_hash: H256, slot_hash: H256) -> Result<StorageData, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BeamCacheStats {
    pub account_hits: u64,
    pub account_misses: u64,
    pub storage_hits: u64,
    pub storage_misses: u64,
}

pub struct BeamSync<F: BeamFetcher> {
    fetcher: F,
    accounts: RwLock<FxHashMap<H256, AccountData>>,
    storage: RwLock<FxHashMap<(H256, H256), StorageData>>,
    account_hits: AtomicU64,
    account_misses: AtomicU64,
    storage_hits: AtomicU64,
    storage_misses: AtomicU64,
}

impl<F: BeamFetcher> BeamSync<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            accounts: RwLock::new(FxHashMap::default()),
            storage: RwLock::new(FxHashMap::default()),
            account_hits: AtomicU64::new(0),
            account_misses: AtomicU64::new(0),
            storage_hits: AtomicU64::new(0),
            storage_misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> BeamCacheStats {
        BeamCacheStats {
            account_hits: self.account_hits.load(Ordering::Relaxed),
            account_misses: self.account_misses.load(Ordering::Relaxed),
            storage_hits: self.storage_hits.load(Ordering::Relaxed),
            storage_misses: self.storage_misses.load(Ordering::Relaxed),
        }
    }

    /// Read-through: serves from cache on hit; on miss, fetches over the
    /// network, stores, and returns the fresh value.
    pub async fn get_account(&self, hash: H256) -> Result<AccountData, String> {
        if let Some(account) = self.accounts.read().expect("lock poisoned").get(&hash).cloned() {
            self.account_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(account);
        }
        self.account_misses.fetch_add(1, Ordering::Relaxed);
        let account = self.fetcher.fetch_account(hash).await?;
        self.accounts
            .write()
            .expect("lock poisoned")
            .insert(hash, account.clone());
        Ok(account)
    }

    pub async fn get_storage(
        &self,
        account_hash: H256,
        slot_hash: H256,
    ) -> Result<StorageData, String> {
        let key = (account_hash, slot_hash);
        if let Some(data) = self.storage.read().expect("lock poisoned").get(&key).cloned() {
            self.storage_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data);
        }
        self.storage_misses.fetch_add(1, Ordering::Relaxed);
        let data = self.fetcher.fetch_storage(account_hash, slot_hash).await?;
        self.storage
            .write()
            .expect("lock poisoned")
            .insert(key, data.clone());
        Ok(data)
    }

    /// Best-effort background warm-up: fetch errors are swallowed since a
    /// prefetch miss just means the next `get_account` pays the network cost.
    pub async fn prefetch_accounts(&self, hashes: &[H256]) {
        for &hash in hashes {
            let _ = self.get_account(hash).await;
        }
    }

    pub async fn prefetch_storage(&self, keys: &[(H256, H256)]) {
        for &(account_hash, slot_hash) in keys {
            let _ = self.get_storage(account_hash, slot_hash).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::U256;
    use std::sync::atomic::AtomicU32;

    struct CountingFetcher {
        calls: AtomicU32,
    }

    fn account(hash: H256) -> AccountData {
        AccountData {
            hash,
            address: [0u8; 20],
            nonce: 0,
            balance: U256::zero(),
            storage_root: H256::zero(),
            code_hash: H256::zero(),
        }
    }

    #[async_trait]
    impl BeamFetcher for CountingFetcher {
        async fn fetch_account(&self, hash: H256) -> Result<AccountData, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(account(hash))
        }
        async fn fetch_storage(
            &self,
            account_hash: H256,
            slot_hash: H256,
        ) -> Result<StorageData, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(StorageData {
                account_hash,
                slot_hash,
                value: U256::zero(),
            })
        }
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let beam = BeamSync::new(CountingFetcher {
            calls: AtomicU32::new(0),
        });
        let hash = H256::repeat_byte(1);
        beam.get_account(hash).await.unwrap();
        beam.get_account(hash).await.unwrap();
        let stats = beam.stats();
        assert_eq!(stats.account_misses, 1);
        assert_eq!(stats.account_hits, 1);
    }

    #[tokio::test]
    async fn prefetch_warms_the_cache() {
        let beam = BeamSync::new(CountingFetcher {
            calls: AtomicU32::new(0),
        });
        let hashes = [H256::repeat_byte(1), H256::repeat_byte(2)];
        beam.prefetch_accounts(&hashes).await;
        assert_eq!(beam.stats().account_misses, 2);
        beam.get_account(hashes[0]).await.unwrap();
        assert_eq!(beam.stats().account_hits, 1);
    }
}
