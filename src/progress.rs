//! C15: Progress Tracker — aggregated stage/bytes/ETA (spec §3, SPEC_FULL.md
//! §4.15). Grounded on the teacher's `snap_sync_progress.rs`, trimmed to the
//! fields this crate's orchestration actually produces.

use crate::syncer::{SyncMode, SyncStage};
use crate::types::SnapProgress;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
    pub pulled_headers: u64,
    pub pulled_bodies: u64,
    pub mode: Option<SyncMode>,
    pub stage: Option<SyncStage>,
    pub snap_progress: Option<SnapProgress>,
}

impl ProgressSnapshot {
    /// `100 * (current - starting) / (highest - starting)`, clamped to
    /// `[0,100]`; returns 100 when the total span is zero.
    pub fn percentage(&self) -> f64 {
        let total = self.highest_block.saturating_sub(self.starting_block);
        if total == 0 {
            return 100.0;
        }
        let done = self.current_block.saturating_sub(self.starting_block);
        (100.0 * done as f64 / total as f64).clamp(0.0, 100.0)
    }
}

#[derive(Default)]
pub struct ProgressTracker {
    inner: RwLock<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(starting_block: u64, highest_block: u64) -> Self {
        Self {
            inner: RwLock::new(ProgressSnapshot {
                starting_block,
                current_block: starting_block,
                highest_block,
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.read().expect("lock poisoned").clone()
    }

    pub fn set_current_block(&self, block: u64) {
        self.inner.write().expect("lock poisoned").current_block = block;
    }

    pub fn set_highest_block(&self, block: u64) {
        self.inner.write().expect("lock poisoned").highest_block = block;
    }

    pub fn add_pulled_headers(&self, n: u64) {
        self.inner.write().expect("lock poisoned").pulled_headers += n;
    }

    pub fn add_pulled_bodies(&self, n: u64) {
        self.inner.write().expect("lock poisoned").pulled_bodies += n;
    }

    pub fn set_mode(&self, mode: SyncMode) {
        self.inner.write().expect("lock poisoned").mode = Some(mode);
    }

    pub fn set_stage(&self, stage: SyncStage) {
        self.inner.write().expect("lock poisoned").stage = Some(stage);
    }

    pub fn set_snap_progress(&self, snap: SnapProgress) {
        self.inner.write().expect("lock poisoned").snap_progress = Some(snap);
    }
}
