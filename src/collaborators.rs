//! External collaborator interfaces (spec §6). Everything the core engine
//! consumes but does not own — transport, state database, EVM execution —
//! is expressed as a narrow trait, the same way the teacher expresses the
//! boundary to `ethrex-storage`/`ethrex-vm` through `Store`/`BlockExecutor`
//! style handles rather than concrete coupling.

use crate::error::ExecutorError;
use crate::types::{AccountData, Block, Body, Header, Receipt, StorageData};
use async_trait::async_trait;
use ethereum_types::H256;

#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Returns up to `count` contiguous headers starting at `from`. An empty
    /// result is itself an error, not an empty `Vec`.
    async fn fetch_headers(&self, from: u64, count: u32) -> Result<Vec<Header>, String>;
}

#[async_trait]
pub trait BodySource: Send + Sync {
    /// Positional correspondence with `hashes` is required.
    async fn fetch_bodies(&self, hashes: &[H256]) -> Result<Vec<Body>, String>;
}

#[async_trait]
pub trait BlockInserter: Send + Sync {
    async fn insert_chain(&self, blocks: Vec<Block>) -> Result<(u32, Option<String>), String>;
    async fn current_block(&self) -> Block;
}

#[async_trait]
pub trait BlockExecutor: Send + Sync {
    async fn execute_block(&self, block: &Block) -> Result<(H256, Vec<Receipt>), ExecutorError>;
}

#[async_trait]
pub trait StateWriter: Send + Sync {
    async fn write_account(&self, hash: H256, data: AccountData);
    async fn write_storage(&self, account_hash: H256, slot_hash: H256, data: StorageData);
    async fn write_bytecode(&self, hash: H256, code: Vec<u8>);
    async fn write_trie_node(&self, path: Vec<u8>, data: Vec<u8>);
    async fn has_bytecode(&self, hash: H256) -> bool;
    async fn has_trie_node(&self, path: &[u8]) -> bool;
    async fn missing_trie_nodes(&self, root: H256, limit: usize) -> Vec<Vec<u8>>;
}

// ---------------------------------------------------------------------
// Snap protocol wire shapes
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccountRangeRequest {
    pub id: u64,
    pub root: H256,
    pub origin: H256,
    pub limit: H256,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct AccountRangeResponse {
    pub id: u64,
    pub accounts: Vec<AccountData>,
    pub proof: Vec<Vec<u8>>,
    pub more: bool,
}

#[derive(Debug, Clone)]
pub struct StorageRangeRequest {
    pub id: u64,
    pub root: H256,
    pub accounts: Vec<H256>,
    pub origin: H256,
    pub limit: H256,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StorageRangeResponse {
    pub id: u64,
    /// One slot list per requested account, in request order.
    pub slots: Vec<Vec<StorageData>>,
    pub proof: Vec<Vec<u8>>,
    pub more: bool,
}

#[derive(Debug, Clone)]
pub struct BytecodeRequest {
    pub id: u64,
    pub hashes: Vec<H256>,
}

#[derive(Debug, Clone)]
pub struct BytecodeEntry {
    pub hash: H256,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BytecodeResponse {
    pub id: u64,
    pub codes: Vec<BytecodeEntry>,
}

#[async_trait]
pub trait SnapPeer: Send + Sync {
    fn id(&self) -> String;
    async fn request_account_range(
        &self,
        req: AccountRangeRequest,
    ) -> Result<AccountRangeResponse, String>;
    async fn request_storage_range(
        &self,
        req: StorageRangeRequest,
    ) -> Result<StorageRangeResponse, String>;
    async fn request_bytecodes(&self, req: BytecodeRequest) -> Result<BytecodeResponse, String>;
    async fn request_trie_nodes(
        &self,
        root: H256,
        paths: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, String>;
}

#[derive(Debug, Clone)]
pub struct BeaconBlock {
    pub slot: u64,
    pub body_root: H256,
}

#[derive(Debug, Clone)]
pub struct BlobSidecar {
    pub index: u64,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait BeaconFetcher: Send + Sync {
    async fn fetch_beacon_block(&self, slot: u64) -> Result<BeaconBlock, String>;
    async fn fetch_blob_sidecars(&self, slot: u64) -> Result<Vec<BlobSidecar>, String>;
}

/// Ambient observability seam (SPEC_FULL.md §4.16): the engine calls into
/// this on every externally-interesting transition. The default no-op
/// implementation means embedders who don't care about metrics pay nothing.
pub trait SyncObserver: Send + Sync {
    fn on_stage_changed(&self, _stage: &str) {}
    fn on_peer_banned(&self, _peer_id: &str) {}
    fn on_task_completed(&self, _blocks: u64) {}
    fn on_nodes_healed(&self, _count: u64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
