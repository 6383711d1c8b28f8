//! C4: Header Downloader — batched header pulls with per-peer scoring
//! (spec §4.4). Grounded on the teacher's `request_block_headers_from_hash`
//! retry loop in `sync/full.rs` and the peer-failure bookkeeping in
//! `peer_handler.rs`.

use crate::collaborators::HeaderSource;
use crate::header_validator::validate_header_chain;
use crate::types::{Header, PeerInfo};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderDownloaderError {
    #[error("no peers available")]
    NoPeers,
    #[error(transparent)]
    Validation(#[from] crate::error::HeaderValidationError),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Tracks per-peer failure counts for `selectPeer` (spec §4.4: "returns the
/// peer with minimum Failures; ties broken arbitrarily").
#[derive(Default)]
pub struct PeerScoreboard {
    failures: RwLock<HashMap<String, u32>>,
}

impl PeerScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, peer_id: &str) {
        let mut failures = self.failures.write().expect("lock poisoned");
        *failures.entry(peer_id.to_string()).or_insert(0) += 1;
    }

    pub fn failures_for(&self, peer_id: &str) -> u32 {
        *self
            .failures
            .read()
            .expect("lock poisoned")
            .get(peer_id)
            .unwrap_or(&0)
    }

    /// Returns the id with the minimum failure count among `peers`.
    pub fn select_peer<'a>(&self, peers: &'a [PeerInfo]) -> Option<&'a PeerInfo> {
        let failures = self.failures.read().expect("lock poisoned");
        peers
            .iter()
            .min_by_key(|p| *failures.get(&p.id).unwrap_or(&0))
    }
}

pub struct HeaderDownloader<S: HeaderSource> {
    source: S,
    retry_limit: u32,
    scoreboard: PeerScoreboard,
}

impl<S: HeaderSource> HeaderDownloader<S> {
    pub fn new(source: S, retry_limit: u32) -> Self {
        Self {
            source,
            retry_limit,
            scoreboard: PeerScoreboard::new(),
        }
    }

    pub fn scoreboard(&self) -> &PeerScoreboard {
        &self.scoreboard
    }

    /// Fetches and validates a single batch starting at `from`, retrying
    /// against (conceptually) different peers up to `retry_limit` times on
    /// fetch or validation failure.
    pub async fn fetch_batch(
        &self,
        peer_id: &str,
        from: u64,
        count: u32,
        prev: Option<&Header>,
    ) -> Result<Vec<Header>, HeaderDownloaderError> {
        let mut attempts = 0;
        loop {
            match self.source.fetch_headers(from, count).await {
                Ok(headers) => match validate_header_chain(&headers, prev) {
                    Ok(()) => return Ok(headers),
                    Err(e) => {
                        self.scoreboard.record_failure(peer_id);
                        attempts += 1;
                        if attempts >= self.retry_limit {
                            return Err(HeaderDownloaderError::Validation(e));
                        }
                    }
                },
                Err(e) => {
                    self.scoreboard.record_failure(peer_id);
                    attempts += 1;
                    if attempts >= self.retry_limit {
                        return Err(HeaderDownloaderError::Fetch(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethereum_types::{H256, U256};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn header(number: u64, hash: u8, parent_hash: u8, time: u64) -> Header {
        Header {
            number,
            hash: H256::from_low_u64_be(hash as u64),
            parent_hash: H256::from_low_u64_be(parent_hash as u64),
            state_root: H256::zero(),
            receipt_root: H256::zero(),
            logs_bloom: [0u8; 256],
            gas_used: 0,
            gas_limit: 0,
            time,
            difficulty: U256::zero(),
        }
    }

    struct FlakySource {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl HeaderSource for FlakySource {
        async fn fetch_headers(&self, from: u64, _count: u32) -> Result<Vec<Header>, String> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err("flaky".to_string());
            }
            Ok(vec![header(from, from as u8, (from - 1) as u8, 100)])
        }
    }

    #[tokio::test]
    async fn retries_on_fetch_error_and_records_failure() {
        let dl = HeaderDownloader::new(
            FlakySource {
                fail_times: AtomicU32::new(1),
            },
            3,
        );
        let prev = header(0, 0, 0, 0);
        let headers = dl.fetch_batch("peer-a", 1, 1, Some(&prev)).await.unwrap();
        assert_eq!(headers[0].number, 1);
        assert_eq!(dl.scoreboard().failures_for("peer-a"), 1);
    }

    #[test]
    fn select_peer_picks_minimum_failures() {
        let scoreboard = PeerScoreboard::new();
        scoreboard.record_failure("p2");
        scoreboard.record_failure("p2");
        scoreboard.record_failure("p3");
        let peers = vec![
            PeerInfo {
                id: "p2".into(),
                address: String::new(),
                head_hash: H256::zero(),
                head_number: 0,
                total_difficulty: U256::zero(),
                failures: 0,
            },
            PeerInfo {
                id: "p3".into(),
                address: String::new(),
                head_hash: H256::zero(),
                head_number: 0,
                total_difficulty: U256::zero(),
                failures: 0,
            },
            PeerInfo {
                id: "p1".into(),
                address: String::new(),
                head_hash: H256::zero(),
                head_number: 0,
                total_difficulty: U256::zero(),
                failures: 0,
            },
        ];
        let selected = scoreboard.select_peer(&peers).unwrap();
        assert_eq!(selected.id, "p1");
    }
}
