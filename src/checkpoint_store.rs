//! C9: Checkpoint Store — trusted checkpoint registry plus the sync-state
//! machine and range-request ledger (spec §4.6). Grounded on the teacher's
//! checkpoint-driven resume flow implied by `SyncError::SnapshotReadError`
//! handling in `sync.rs` and the throttled range bookkeeping in
//! `peer_handler.rs`.

use crate::error::CheckpointStoreError;
use crate::types::TrustedCheckpoint;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyncState {
    Idle = 0,
    DownloadingHeaders = 1,
    DownloadingBodies = 2,
    DownloadingReceipts = 3,
    Processing = 4,
    Complete = 5,
}

impl SyncState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => SyncState::DownloadingHeaders,
            2 => SyncState::DownloadingBodies,
            3 => SyncState::DownloadingReceipts,
            4 => SyncState::Processing,
            5 => SyncState::Complete,
            _ => SyncState::Idle,
        }
    }
}

struct RangeRequest {
    id: u64,
    from: u64,
    to: u64,
}

pub struct CheckpointStore {
    max_checkpoints: usize,
    max_pending_ranges: usize,
    state: AtomicU32,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    checkpoints: VecDeque<TrustedCheckpoint>,
    pending_ranges: Vec<RangeRequest>,
    next_request_id: u64,
}

impl CheckpointStore {
    pub fn new(max_checkpoints: usize, max_pending_ranges: usize) -> Self {
        Self {
            max_checkpoints,
            max_pending_ranges,
            state: AtomicU32::new(SyncState::Idle as u32),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a checkpoint, evicting the oldest on overflow (FIFO).
    pub fn register_checkpoint(&self, cp: TrustedCheckpoint) {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.checkpoints.len() >= self.max_checkpoints {
            inner.checkpoints.pop_front();
        }
        inner.checkpoints.push_back(cp);
    }

    pub fn checkpoints(&self) -> Vec<TrustedCheckpoint> {
        self.inner
            .read()
            .expect("lock poisoned")
            .checkpoints
            .iter()
            .cloned()
            .collect()
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u32(self.state.load(Ordering::SeqCst))
    }

    /// `StartSync(cp, target)`: compare-and-swap `Idle -> DownloadingHeaders`.
    /// If `target <= cp.BlockNumber`, transitions straight to `Complete`.
    pub fn start_sync(
        &self,
        cp: &TrustedCheckpoint,
        target: u64,
    ) -> Result<(), CheckpointStoreError> {
        let cas = self.state.compare_exchange(
            SyncState::Idle as u32,
            SyncState::DownloadingHeaders as u32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if cas.is_err() {
            return Err(CheckpointStoreError::SyncActive);
        }
        if target <= cp.block_number {
            self.state.store(SyncState::Complete as u32, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn advance(&self, next: SyncState) {
        self.state.store(next as u32, Ordering::SeqCst);
    }

    pub fn mark_complete(&self) {
        self.state.store(SyncState::Complete as u32, Ordering::SeqCst);
    }

    pub fn reset_to_idle(&self) {
        self.state.store(SyncState::Idle as u32, Ordering::SeqCst);
    }

    /// Issues a monotonic range-request id, rejecting overlaps with any
    /// pending request and enforcing `MaxPendingRanges`.
    pub fn issue_range_request(&self, from: u64, to: u64) -> Result<u64, CheckpointStoreError> {
        if to < from || from == 0 {
            return Err(CheckpointStoreError::InvalidRange);
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.pending_ranges.len() >= self.max_pending_ranges {
            return Err(CheckpointStoreError::TooManyPending);
        }
        if inner
            .pending_ranges
            .iter()
            .any(|r| from <= r.to && r.from <= to)
        {
            return Err(CheckpointStoreError::RangeOverlap);
        }
        let id = inner.next_request_id;
        inner.next_request_id += 1;
        inner.pending_ranges.push(RangeRequest { id, from, to });
        Ok(id)
    }

    pub fn complete_range_request(&self, id: u64) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.pending_ranges.retain(|r| r.id != id);
    }

    pub fn pending_range_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").pending_ranges.len()
    }

    /// `elapsed * (total - done) / done` when `done > 0`.
    pub fn eta(elapsed_secs: f64, total: u64, done: u64) -> Option<f64> {
        if done == 0 {
            return None;
        }
        Some(elapsed_secs * (total.saturating_sub(done)) as f64 / done as f64)
    }
}
