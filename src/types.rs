//! Core data types shared across the sync engine (spec §3).

use ethereum_types::{H256, U256};
use std::time::{Instant, SystemTime};

/// A block header, identified by its fields; `Hash` is always re-derived
/// locally from the header bytes and is never trusted from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub state_root: H256,
    pub receipt_root: H256,
    pub logs_bloom: [u8; 256],
    pub gas_used: u64,
    pub gas_limit: u64,
    pub time: u64,
    pub difficulty: U256,
}

/// Transaction/uncle payload accompanying a `Header`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub transactions: Vec<Vec<u8>>,
    pub uncles: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub body: Body,
}

impl Block {
    pub fn hash(&self) -> H256 {
        self.header.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

/// Receipt fields needed to verify the receipt/bloom/gas invariants of C6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub cumulative_gas_used: u64,
    pub logs_bloom: [u8; 256],
}

// ---------------------------------------------------------------------
// C3: download tasks
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub start_block: u64,
    pub end_block: u64,
    pub status: TaskStatus,
    pub peer_id: Option<String>,
    pub attempts: u32,
    pub created_at: Instant,
    pub completed_at: Option<Instant>,
    pub block_hashes: Vec<H256>,
}

impl DownloadTask {
    pub fn new(id: String, start_block: u64, end_block: u64) -> Self {
        Self {
            id,
            start_block,
            end_block,
            status: TaskStatus::Pending,
            peer_id: None,
            attempts: 0,
            created_at: Instant::now(),
            completed_at: None,
            block_hashes: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.end_block - self.start_block + 1
    }
}

// ---------------------------------------------------------------------
// C5: skeleton chain
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonAnchor {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapSegment {
    pub start: u64,
    pub end: u64,
    pub filled: bool,
}

// ---------------------------------------------------------------------
// C9: trusted checkpoints
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCheckpoint {
    pub epoch: u64,
    pub block_number: u64,
    pub block_hash: H256,
    pub state_root: H256,
    pub source: String,
    pub added_at: u64,
}

impl TrustedCheckpoint {
    /// `CheckpointID = Keccak256(Epoch || BlockNumber || BlockHash || StateRoot)`.
    /// Pure function of the four identifying fields (invariant 9) — `source`
    /// and `added_at` never enter the hash.
    pub fn id(&self) -> H256 {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update(self.epoch.to_be_bytes());
        hasher.update(self.block_number.to_be_bytes());
        hasher.update(self.block_hash.as_bytes());
        hasher.update(self.state_root.as_bytes());
        H256::from_slice(&hasher.finalize())
    }
}

// ---------------------------------------------------------------------
// Snap sync: accounts / storage / heal tasks
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountData {
    pub hash: H256,
    pub address: [u8; 20],
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageData {
    pub account_hash: H256,
    pub slot_hash: H256,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealTask {
    pub path: Vec<u8>,
    /// Zero for the main state trie; the owning account's hash for a storage trie.
    pub account_hash: H256,
    pub root: H256,
    pub depth: u32,
    pub retries: u32,
    pub created_at: u64,
}

impl HealTask {
    pub fn is_storage(&self) -> bool {
        !self.account_hash.is_zero()
    }
}

/// Persisted healer checkpoint (spec §6, encoding resolved in SPEC_FULL.md §4.17).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealCheckpoint {
    pub state_root: H256,
    pub nodes_healed: u64,
    pub nodes_failed: u64,
    pub bytes_downloaded: u64,
    pub pending_paths: Vec<PendingHealPath>,
    pub account_roots: Vec<(H256, H256)>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingHealPath {
    pub path: Vec<u8>,
    pub account_hash: H256,
    pub root: H256,
    pub depth: u32,
}

// ---------------------------------------------------------------------
// Peer table
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub address: String,
    pub head_hash: H256,
    pub head_number: u64,
    pub total_difficulty: U256,
    pub failures: u32,
}

// ---------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapProgress {
    pub accounts_done: u64,
    pub storage_accounts_done: u64,
    pub bytecodes_done: u64,
    pub heal_nodes_done: u64,
    pub heal_nodes_failed: u64,
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
