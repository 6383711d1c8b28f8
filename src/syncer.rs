//! C10: Syncer — top-level mode selection, fallback, progress, and
//! cancellation (spec §4.1, SPEC_FULL.md §4.1a). Grounded on the teacher's
//! `Syncer::start_sync` / `sync_cycle` in `sync.rs`, which drives the same
//! full-vs-snap decision and owns the single `{Idle,Syncing,Done}` state cell.

use crate::chain_inserter::ChainInserter;
use crate::collaborators::{
    BlockExecutor, BlockInserter, BodySource, HeaderSource, NoopObserver, SnapPeer, StateWriter,
    SyncObserver,
};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::header_downloader::HeaderDownloader;
use crate::peer_table::PeerTable;
use crate::progress::ProgressTracker;
use crate::snap_syncer::SnapSyncer;
use crate::types::{Block, Header};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Snap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    None,
    Headers,
    SnapAccounts,
    SnapStorage,
    SnapBytecodes,
    SnapHealing,
    Blocks,
    CaughtUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyncState {
    Idle = 0,
    Syncing = 1,
    Done = 2,
}

impl SyncState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => SyncState::Syncing,
            2 => SyncState::Done,
            _ => SyncState::Idle,
        }
    }
}

/// Decides full vs. snap per spec §4.1 rule 1: snap requires the configured
/// mode to be `Snap`, a snap peer/writer pair to exist (the caller passes
/// `snap_available`), and `target >= min_pivot_block`.
fn decide_mode(config: &SyncConfig, snap_available: bool, target: u64) -> SyncMode {
    use crate::config::SyncModeConfig;
    if config.mode == SyncModeConfig::Snap && snap_available && target >= config.min_pivot_block {
        SyncMode::Snap
    } else {
        SyncMode::Full
    }
}

/// `pivot = target - pivot_offset`, clamped to `>= 1`.
fn select_pivot(target: u64, pivot_offset: u64) -> u64 {
    target.saturating_sub(pivot_offset).max(1)
}

pub struct Syncer<H, B, E, I, P, W>
where
    H: HeaderSource,
    B: BodySource,
    E: BlockExecutor,
    I: BlockInserter,
    P: SnapPeer,
    W: StateWriter,
{
    config: SyncConfig,
    state: AtomicU32,
    mode: std::sync::RwLock<Option<SyncMode>>,
    headers: HeaderDownloader<H>,
    bodies: B,
    inserter: ChainInserter<E, I>,
    peers: PeerTable,
    progress: ProgressTracker,
    observer: Arc<dyn SyncObserver>,
    snap: Option<SnapSyncer<P, W>>,
}

impl<H, B, E, I, P, W> Syncer<H, B, E, I, P, W>
where
    H: HeaderSource,
    B: BodySource,
    E: BlockExecutor,
    I: BlockInserter,
    P: SnapPeer,
    W: StateWriter,
{
    pub fn new(
        config: SyncConfig,
        headers: HeaderDownloader<H>,
        bodies: B,
        inserter: ChainInserter<E, I>,
        peers: PeerTable,
        progress: ProgressTracker,
        snap: Option<SnapSyncer<P, W>>,
    ) -> Self {
        Self {
            config,
            state: AtomicU32::new(SyncState::Idle as u32),
            mode: std::sync::RwLock::new(None),
            headers,
            bodies,
            inserter,
            peers,
            progress,
            observer: Arc::new(NoopObserver),
            snap,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u32(self.state.load(Ordering::SeqCst))
    }

    pub fn mode(&self) -> Option<SyncMode> {
        *self.mode.read().expect("lock poisoned")
    }

    fn set_mode(&self, mode: SyncMode) {
        *self.mode.write().expect("lock poisoned") = mode;
        self.progress.set_mode(mode);
    }

    fn set_stage(&self, stage: SyncStage) {
        self.progress.set_stage(stage);
        self.observer.on_stage_changed(match stage {
            SyncStage::None => "none",
            SyncStage::Headers => "headers",
            SyncStage::SnapAccounts => "snap_accounts",
            SyncStage::SnapStorage => "snap_storage",
            SyncStage::SnapBytecodes => "snap_bytecodes",
            SyncStage::SnapHealing => "snap_healing",
            SyncStage::Blocks => "blocks",
            SyncStage::CaughtUp => "caught_up",
        });
        tracing::debug!(?stage, "sync stage changed");
    }

    /// `RunSync(target)` (spec §4.1). `current` is the caller's view of the
    /// local chain head; `root_for_snap` is the state root to request if the
    /// snap path is taken.
    pub async fn run_sync(
        &self,
        current: Header,
        target: u64,
        root_for_snap: ethereum_types::H256,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.state
            .compare_exchange(
                SyncState::Idle as u32,
                SyncState::Syncing as u32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| SyncError::AlreadySyncing)?;

        let result = self.run_sync_inner(current, target, root_for_snap, cancel).await;

        match &result {
            Ok(()) => self.state.store(SyncState::Done as u32, Ordering::SeqCst),
            Err(_) => self.state.store(SyncState::Idle as u32, Ordering::SeqCst),
        }
        result
    }

    async fn run_sync_inner(
        &self,
        current: Header,
        target: u64,
        root_for_snap: ethereum_types::H256,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let mode = decide_mode(&self.config, self.snap.is_some(), target);
        self.set_mode(mode);

        if mode == SyncMode::Snap {
            let pivot = select_pivot(target, self.config.pivot_offset);
            tracing::info!(pivot, target, "starting snap sync");
            match self.run_snap_pipeline(root_for_snap, cancel).await {
                Ok(()) => {
                    // The first post-pivot header batch must validate against
                    // the pivot header — the last known good header — not
                    // the pre-sync `current` head, which sits far behind it.
                    let pivot_header = self.fetch_single_header(pivot).await?;
                    return self
                        .run_full_pipeline(pivot_header, pivot, target, cancel)
                        .await;
                }
                Err(SyncError::Snap(crate::error::SnapSyncError::SnapCancelled)) => {
                    return Err(SyncError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "snap sync failed, falling back to full sync once");
                    self.set_mode(SyncMode::Full);
                    let current_number = current.number;
                    return self
                        .run_full_pipeline(current, current_number, target, cancel)
                        .await;
                }
            }
        }

        let current_number = current.number;
        self.run_full_pipeline(current, current_number, target, cancel)
            .await
    }

    /// Fetches and validates the single header at `number`, used to obtain
    /// the pivot header to link the post-pivot full-sync range against.
    async fn fetch_single_header(&self, number: u64) -> Result<Header, SyncError> {
        let peer = self
            .peers
            .eligible_peers()?
            .into_iter()
            .next()
            .ok_or(SyncError::NoPeers)?;
        let headers = self
            .headers
            .fetch_batch(&peer.id, number, 1, None)
            .await
            .map_err(|e| match e {
                crate::header_downloader::HeaderDownloaderError::Validation(v) => {
                    SyncError::Header(v)
                }
                crate::header_downloader::HeaderDownloaderError::NoPeers => SyncError::NoPeers,
                crate::header_downloader::HeaderDownloaderError::Fetch(_) => SyncError::NoPeers,
            })?;
        headers.into_iter().next().ok_or(SyncError::NoPeers)
    }

    async fn run_snap_pipeline(
        &self,
        root: ethereum_types::H256,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let snap = self.snap.as_ref().ok_or(SyncError::NoPeers)?;
        self.set_stage(SyncStage::SnapAccounts);
        snap.run(root, self.config.account_range_chunks(), cancel)
            .await
            .map_err(SyncError::from)
    }

    /// `last_good` is the header the first fetched batch must link against —
    /// the caller's chain head for a plain full sync, or the pivot header
    /// for a post-snap resume. Its number must equal `from`.
    async fn run_full_pipeline(
        &self,
        last_good: Header,
        from: u64,
        target: u64,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        self.set_stage(SyncStage::Headers);
        self.progress.set_highest_block(target);

        let mut cursor = from;
        let mut prev: Option<Header> = Some(last_good);
        while cursor < target {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let peer = self
                .peers
                .eligible_peers()?
                .into_iter()
                .next()
                .ok_or(SyncError::NoPeers)?;

            let count = (self.config.batch_size as u64).min(target - cursor) as u32;
            let headers = self
                .headers
                .fetch_batch(&peer.id, cursor + 1, count, prev.as_ref())
                .await
                .map_err(|e| match e {
                    crate::header_downloader::HeaderDownloaderError::Validation(v) => {
                        SyncError::Header(v)
                    }
                    crate::header_downloader::HeaderDownloaderError::NoPeers => SyncError::NoPeers,
                    crate::header_downloader::HeaderDownloaderError::Fetch(_) => SyncError::NoPeers,
                })?;
            self.progress.add_pulled_headers(headers.len() as u64);

            self.set_stage(SyncStage::Blocks);
            let hashes: Vec<_> = headers.iter().map(|h| h.hash).collect();
            for chunk in hashes.chunks(self.config.body_batch_size.max(1)) {
                let bodies = self
                    .bodies
                    .fetch_bodies(chunk)
                    .await
                    .map_err(|_| SyncError::NoPeers)?;
                self.progress.add_pulled_bodies(bodies.len() as u64);
                for (header, body) in headers
                    .iter()
                    .filter(|h| chunk.contains(&h.hash))
                    .cloned()
                    .zip(bodies)
                {
                    self.inserter.enqueue(Block { header, body })?;
                }
                let (inserted, err) = self.inserter.process_ready().await;
                self.observer.on_task_completed(inserted as u64);
                if let Some(e) = err {
                    return Err(SyncError::Inserter(e));
                }
            }

            cursor += headers.len() as u64;
            self.progress.set_current_block(cursor);
            prev = headers.last().cloned();
        }

        self.set_stage(SyncStage::CaughtUp);
        Ok(())
    }
}
