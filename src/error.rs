//! Error taxonomy (spec §7). Kinds are stable across components; each
//! component's own error type (e.g. `BlockDownloaderError`) wraps into this
//! top-level `SyncError` so `Syncer::run_sync` has a single error surface.

use ethereum_types::H256;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderValidationError {
    #[error("header chain is empty")]
    EmptyHeaders,
    #[error("expected block number {expected}, got {actual}")]
    BadBlockNumber { expected: u64, actual: u64 },
    #[error("parent hash mismatch at block {number}")]
    BadParentHash { number: u64 },
    #[error("timestamp went backwards at block {number}")]
    TimestampOrder { number: u64 },
    #[error("timestamp too far in the future at block {number}")]
    FutureTimestamp { number: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeProofError {
    #[error("range is empty")]
    EmptyRange,
    #[error("keys/values length mismatch")]
    LengthMismatch,
    #[error("proof does not verify against the given root")]
    VerificationFailed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockDownloaderError {
    #[error("invalid range: from > to")]
    InvalidRange,
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("task not active: {0}")]
    TaskNotActive(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SkeletonError {
    #[error("in-flight throttle limit reached")]
    Throttled,
    #[error("anchors must be strictly ordered by number")]
    OutOfOrderAnchor,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainInserterError {
    #[error("block {got} does not follow expected block {expected}")]
    NotContiguous { expected: u64, got: u64 },
    #[error("parent of block {0} does not match current head")]
    MissingParent(u64),
    #[error("state root mismatch at block {0}")]
    StateRootMismatch(u64),
    #[error("receipt root mismatch at block {0}")]
    BadReceiptRoot(u64),
    #[error("logs bloom mismatch at block {0}")]
    LogsBloomMismatch(u64),
    #[error("cumulative gas used mismatch at block {0}")]
    GasUsedMismatch(u64),
    #[error("block {0} has more than 2 uncles")]
    BadUncleCount(u64),
    #[error("block {0} has a duplicate uncle")]
    DuplicateUncle(u64),
    #[error("queue is full")]
    QueueFull,
    #[error("block with hash {0:#x} is already queued")]
    DuplicateBlock(H256),
    #[error("processor has been closed")]
    ProcessorClosed,
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("block executor failed: {0}")]
pub struct ExecutorError(pub String);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStoreError {
    #[error("a sync is already active")]
    SyncActive,
    #[error("invalid range")]
    InvalidRange,
    #[error("range overlaps a pending request")]
    RangeOverlap,
    #[error("too many pending range requests")]
    TooManyPending,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapSyncError {
    #[error("account range proof failed verification")]
    BadAccountProof,
    #[error("storage range proof failed verification")]
    BadStorageProof,
    #[error("bytecode hash mismatch")]
    BadBytecode,
    #[error("no snap-capable peer available")]
    NoSnapPeer,
    #[error("head block too low for a pivot: {0}")]
    NoPivotBlock(u64),
    #[error("healing exceeded the maximum number of rounds")]
    HealFailed,
    #[error("snap sync was cancelled")]
    SnapCancelled,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerTableError {
    #[error("no eligible peers")]
    NoPeers,
    #[error("peer {0} is banned")]
    PeerBanned(String),
    #[error("request to peer {0} timed out")]
    Timeout(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloaderError {
    #[error(transparent)]
    Peer(#[from] PeerTableError),
    #[error("retries exhausted")]
    MaxRetries,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateSyncError {
    #[error("a sync is already running")]
    AlreadySyncing,
    #[error("proof node was empty")]
    EmptyProofNode,
    #[error("accounts were not strictly ascending by hash")]
    BadOrdering,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobSyncError {
    #[error("blob slot is already complete")]
    SlotComplete,
    #[error("no indices requested")]
    EmptyRequest,
    #[error("duplicate blob index in response")]
    DuplicateIndex,
    #[error("empty blob payload")]
    EmptyBlob,
    #[error("index was not requested")]
    UnrequestedIndex,
    #[error("blob set is inconsistent")]
    Inconsistent,
}

/// Session-level error surfaced once from `Syncer::run_sync` (spec §7).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync is already in progress")]
    AlreadySyncing,
    #[error("sync was cancelled")]
    Cancelled,
    #[error(transparent)]
    Header(#[from] HeaderValidationError),
    #[error(transparent)]
    RangeProof(#[from] RangeProofError),
    #[error(transparent)]
    Downloader(#[from] BlockDownloaderError),
    #[error(transparent)]
    Skeleton(#[from] SkeletonError),
    #[error(transparent)]
    Inserter(#[from] ChainInserterError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointStoreError),
    #[error(transparent)]
    Snap(#[from] SnapSyncError),
    #[error(transparent)]
    PeerTable(#[from] PeerTableError),
    #[error(transparent)]
    Dl(#[from] DownloaderError),
    #[error("no peers available for this operation")]
    NoPeers,
}

impl SyncError {
    /// Mirrors the teacher's `SyncError::is_recoverable`: consensus-level
    /// corruption is fatal, everything else (peer misbehavior, throttling,
    /// transient network failure) can be retried by the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::Inserter(ChainInserterError::StateRootMismatch(_))
                | SyncError::Inserter(ChainInserterError::BadReceiptRoot(_))
                | SyncError::Inserter(ChainInserterError::LogsBloomMismatch(_))
                | SyncError::Inserter(ChainInserterError::GasUsedMismatch(_))
        )
    }
}
