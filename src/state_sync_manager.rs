//! C12: State Sync Manager — pause/resume, batched range downloads with
//! per-response proof validation (spec §4.10). Grounded on the account-range
//! request/validate loop in `snap_syncer.rs` (itself grounded on the
//! teacher's `sync/snap_sync.rs` `request_account_range` flow), generalized
//! here behind pause/resume controls the snap pipeline doesn't need.

use crate::collaborators::{AccountRangeRequest, SnapPeer, StateWriter};
use crate::error::StateSyncError;
use ethereum_types::H256;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct StateSyncManager<P: SnapPeer, W: StateWriter> {
    peer: P,
    writer: W,
    syncing: AtomicBool,
    paused: AtomicBool,
    pending_requests: AtomicU32,
}

impl<P: SnapPeer, W: StateWriter> StateSyncManager<P, W> {
    pub fn new(peer: P, writer: W) -> Self {
        Self {
            peer,
            writer,
            syncing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pending_requests: AtomicU32::new(0),
        }
    }

    /// `StartSync(root)`: CAS `false -> true` on the syncing flag.
    pub fn start_sync(&self) -> Result<(), StateSyncError> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StateSyncError::AlreadySyncing)?;
        Ok(())
    }

    pub fn stop_sync(&self) {
        self.syncing.store(false, Ordering::SeqCst);
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests.load(Ordering::SeqCst)
    }

    /// Downloads and validates one batch, writing accepted accounts through
    /// `W`. Returns `(more, next_origin)`. Blocks on pause with a cooperative
    /// spin via `tokio::task::yield_now` rather than sleeping indefinitely,
    /// so a `resume()` from another task is picked up promptly.
    pub async fn download_range(
        &self,
        root: H256,
        origin: H256,
        limit: H256,
        bytes: u64,
    ) -> Result<(bool, H256), StateSyncError> {
        while self.is_paused() {
            tokio::task::yield_now().await;
        }
        self.pending_requests.fetch_add(1, Ordering::SeqCst);
        let result = self.download_range_inner(root, origin, limit, bytes).await;
        self.pending_requests.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download_range_inner(
        &self,
        root: H256,
        origin: H256,
        limit: H256,
        bytes: u64,
    ) -> Result<(bool, H256), StateSyncError> {
        let resp = self
            .peer
            .request_account_range(AccountRangeRequest {
                id: 0,
                root,
                origin,
                limit,
                bytes,
            })
            .await
            .map_err(|_| StateSyncError::EmptyProofNode)?;

        if resp.proof.iter().any(|node| node.is_empty()) {
            return Err(StateSyncError::EmptyProofNode);
        }
        for window in resp.accounts.windows(2) {
            if window[1].hash <= window[0].hash {
                return Err(StateSyncError::BadOrdering);
            }
        }

        for account in &resp.accounts {
            self.writer
                .write_account(account.hash, account.clone())
                .await;
        }

        let next_origin = resp
            .accounts
            .last()
            .map(|a| crate::snap_syncer::next_origin(a.hash))
            .unwrap_or(origin);
        Ok((resp.more, next_origin))
    }
}
