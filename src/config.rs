//! Configuration (spec §6 table). Every tunable is a named constant with a
//! documented default (teacher's `sync/constants.rs` pattern), collected into
//! one `SyncConfig` built explicitly — no process-global state.

use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 192;
pub const DEFAULT_BODY_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_BLOCK_BATCH_SIZE: u64 = 10;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_MAX_PEERS: usize = 25;
pub const DEFAULT_BAN_THRESHOLD: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MIN_PIVOT_BLOCK: u64 = 128;
pub const DEFAULT_PIVOT_OFFSET: u64 = 64;
pub const DEFAULT_SKELETON_STRIDE: u64 = 2048;
pub const DEFAULT_MAX_IN_FLIGHT_TASKS: u32 = 8;
pub const DEFAULT_MAX_IN_FLIGHT_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_ACCOUNT_RANGE_CHUNKS: u32 = 4;
pub const MAX_ACCOUNT_RANGE_CHUNKS_CAP: u32 = 256;
pub const DEFAULT_ACCOUNT_RANGE_BYTES: u64 = 512 * 1024;
pub const DEFAULT_STORAGE_BATCH_ACCOUNTS: usize = 8;
pub const DEFAULT_BYTECODE_ITEMS: usize = 64;
pub const DEFAULT_HEAL_NODES: usize = 128;
pub const DEFAULT_HEAL_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1000;
pub const DEFAULT_MAX_HEAL_ROUNDS: u32 = 1024;
pub const DEFAULT_MAX_CHECKPOINTS: usize = 64;
pub const DEFAULT_MAX_PENDING_RANGES: usize = 16;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_DOWNLOADER_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncModeConfig {
    Full,
    Snap,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: SyncModeConfig,
    pub batch_size: usize,
    pub body_batch_size: usize,
    pub max_concurrent: usize,
    pub block_batch_size: u64,
    pub retry_limit: u32,
    pub max_peers: usize,
    pub ban_threshold: u32,
    pub request_timeout: Duration,
    pub min_pivot_block: u64,
    pub pivot_offset: u64,
    pub skeleton_stride: u64,
    pub max_in_flight_tasks: u32,
    pub max_in_flight_bytes: u64,
    pub account_range_chunks: u32,
    pub account_range_bytes: u64,
    pub storage_batch_accounts: usize,
    pub bytecode_items: usize,
    pub heal_nodes: usize,
    pub heal_max_retries: u32,
    pub checkpoint_interval: u64,
    pub max_heal_rounds: u32,
    pub max_checkpoints: usize,
    pub max_pending_ranges: usize,
    pub max_queue_size: usize,
    pub downloader_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncModeConfig::Snap,
            batch_size: DEFAULT_BATCH_SIZE,
            body_batch_size: DEFAULT_BODY_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            max_peers: DEFAULT_MAX_PEERS,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_pivot_block: DEFAULT_MIN_PIVOT_BLOCK,
            pivot_offset: DEFAULT_PIVOT_OFFSET,
            skeleton_stride: DEFAULT_SKELETON_STRIDE,
            max_in_flight_tasks: DEFAULT_MAX_IN_FLIGHT_TASKS,
            max_in_flight_bytes: DEFAULT_MAX_IN_FLIGHT_BYTES,
            account_range_chunks: DEFAULT_MAX_ACCOUNT_RANGE_CHUNKS,
            account_range_bytes: DEFAULT_ACCOUNT_RANGE_BYTES,
            storage_batch_accounts: DEFAULT_STORAGE_BATCH_ACCOUNTS,
            bytecode_items: DEFAULT_BYTECODE_ITEMS,
            heal_nodes: DEFAULT_HEAL_NODES,
            heal_max_retries: DEFAULT_HEAL_MAX_RETRIES,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_heal_rounds: DEFAULT_MAX_HEAL_ROUNDS,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            max_pending_ranges: DEFAULT_MAX_PENDING_RANGES,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            downloader_max_retries: DEFAULT_DOWNLOADER_MAX_RETRIES,
        }
    }
}

impl SyncConfig {
    pub fn account_range_chunks(&self) -> u32 {
        self.account_range_chunks.clamp(1, MAX_ACCOUNT_RANGE_CHUNKS_CAP)
    }
}
