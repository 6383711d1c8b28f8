//! C11: Downloader wrapper — peer ban ledger, per-request timeouts, and the
//! retry loop around `Syncer::run_sync` (spec §4.9). Grounded on the
//! teacher's `PeerTable`/`PeerHandler` failure accounting in
//! `peer_handler.rs` (`RecordPeerFailure`-equivalent bumps on fetch error).

use crate::error::{DownloaderError, PeerTableError};
use crate::types::PeerInfo;
use ethereum_types::U256;
use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

pub struct PeerTable {
    max_peers: usize,
    ban_threshold: u32,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<String, PeerInfo>,
    failures: HashMap<String, u32>,
}

impl PeerTable {
    pub fn new(max_peers: usize, ban_threshold: u32) -> Self {
        Self {
            max_peers,
            ban_threshold,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Inserts a peer, evicting the lowest-`TotalDifficulty` peer at
    /// capacity only if the incoming peer's TD exceeds it.
    pub fn add_peer(&self, peer: PeerInfo) -> bool {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.peers.len() < self.max_peers || inner.peers.contains_key(&peer.id) {
            inner.peers.insert(peer.id.clone(), peer);
            return true;
        }
        let weakest = inner
            .peers
            .values()
            .min_by_key(|p| p.total_difficulty)
            .map(|p| (p.id.clone(), p.total_difficulty));
        match weakest {
            Some((id, td)) if peer.total_difficulty > td => {
                inner.peers.remove(&id);
                inner.peers.insert(peer.id.clone(), peer);
                true
            }
            _ => false,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").peers.len()
    }

    pub fn get(&self, id: &str) -> Option<PeerInfo> {
        self.inner.read().expect("lock poisoned").peers.get(id).cloned()
    }

    pub fn record_peer_failure(&self, id: &str) -> u32 {
        let mut inner = self.inner.write().expect("lock poisoned");
        let count = inner.failures.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn is_banned(&self, id: &str) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        inner.failures.get(id).copied().unwrap_or(0) >= self.ban_threshold
    }

    pub fn reset_peer(&self, id: &str) {
        self.inner.write().expect("lock poisoned").failures.remove(id);
    }

    /// Eligible peers for assignment: present and not banned.
    pub fn eligible_peers(&self) -> Result<Vec<PeerInfo>, PeerTableError> {
        let inner = self.inner.read().expect("lock poisoned");
        let eligible: Vec<PeerInfo> = inner
            .peers
            .values()
            .filter(|p| inner.failures.get(&p.id).copied().unwrap_or(0) < self.ban_threshold)
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(PeerTableError::NoPeers);
        }
        Ok(eligible)
    }
}

/// Runs `fut`, failing with `Timeout` if it does not complete within
/// `timeout`, and recording a peer failure either way on timeout.
pub async fn with_timeout<T>(
    peers: &PeerTable,
    peer_id: &str,
    timeout: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, PeerTableError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(v) => Ok(v),
        Err(_) => {
            peers.record_peer_failure(peer_id);
            Err(PeerTableError::Timeout(peer_id.to_string()))
        }
    }
}

/// Runs `op` with retry up to `max_retries` on transient peer errors. `op`
/// is expected to pick its own (non-banned) peer each call, via
/// `PeerTable::eligible_peers`, so a peer banned mid-retry is naturally
/// skipped on the next attempt.
pub async fn run_with_retries<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T, DownloaderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PeerTableError>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(_) => {
                attempts += 1;
                if attempts >= max_retries {
                    return Err(DownloaderError::MaxRetries);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H256;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn peer(id: &str, td: u64) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            address: String::new(),
            head_hash: H256::zero(),
            head_number: 0,
            total_difficulty: U256::from(td),
            failures: 0,
        }
    }

    #[test]
    fn eviction_only_replaces_weaker_peer() {
        let table = PeerTable::new(2, 5);
        table.add_peer(peer("a", 10));
        table.add_peer(peer("b", 20));
        assert!(!table.add_peer(peer("c", 5)));
        assert_eq!(table.peer_count(), 2);
        assert!(table.add_peer(peer("d", 100)));
        assert!(table.get("a").is_none());
        assert!(table.get("d").is_some());
    }

    #[test]
    fn ban_threshold_bans_after_enough_failures() {
        let table = PeerTable::new(25, 5);
        table.add_peer(peer("a", 10));
        for _ in 0..4 {
            table.record_peer_failure("a");
        }
        assert!(!table.is_banned("a"));
        table.record_peer_failure("a");
        assert!(table.is_banned("a"));
        table.reset_peer("a");
        assert!(!table.is_banned("a"));
    }

    #[test]
    fn eligible_peers_excludes_banned() {
        let table = PeerTable::new(25, 2);
        table.add_peer(peer("a", 10));
        table.add_peer(peer("b", 20));
        table.record_peer_failure("a");
        table.record_peer_failure("a");
        let eligible = table.eligible_peers().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "b");
    }

    #[test]
    fn no_peers_when_all_banned() {
        let table = PeerTable::new(25, 1);
        table.add_peer(peer("a", 10));
        table.record_peer_failure("a");
        assert_eq!(table.eligible_peers().unwrap_err(), PeerTableError::NoPeers);
    }

    #[tokio::test]
    async fn with_timeout_records_failure_on_expiry() {
        let table = PeerTable::new(25, 5);
        table.add_peer(peer("a", 10));
        let result = with_timeout(&table, "a", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            42
        })
        .await;
        assert_eq!(result.unwrap_err(), PeerTableError::Timeout("a".to_string()));
        assert_eq!(table.record_peer_failure("a"), 2);
    }

    #[tokio::test]
    async fn run_with_retries_exhausts_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DownloaderError> = run_with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PeerTableError::Timeout("a".to_string())) }
        })
        .await;
        assert_eq!(result.unwrap_err(), DownloaderError::MaxRetries);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
