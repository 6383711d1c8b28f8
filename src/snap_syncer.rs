//! C7: Snap Syncer — four ordered phases (accounts, storage, bytecodes,
//! healing) with proof verification and key-space partitioning (spec §4.7).
//! Grounded on the teacher's `sync_cycle_snap` phase sequencing in
//! `sync/snap_sync.rs` (account-range chunking, storage-queue draining,
//! bytecode deduplication, heal-round loop).

use crate::collaborators::{
    AccountRangeRequest, BytecodeRequest, SnapPeer, StateWriter, StorageRangeRequest,
};
use crate::error::SnapSyncError;
use ethereum_types::{H256, U256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EMPTY_ROOT_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);
const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SnapPhase {
    Idle = 0,
    Accounts = 1,
    Storage = 2,
    Bytecodes = 3,
    Healing = 4,
    Complete = 5,
}

impl SnapPhase {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => SnapPhase::Accounts,
            2 => SnapPhase::Storage,
            3 => SnapPhase::Bytecodes,
            4 => SnapPhase::Healing,
            5 => SnapPhase::Complete,
            _ => SnapPhase::Idle,
        }
    }
}

/// `SelectPivot(head) = head - 64`, requires `head >= 128`.
pub fn select_pivot(head: u64, min_pivot_block: u64, pivot_offset: u64) -> Result<u64, SnapSyncError> {
    if head < min_pivot_block {
        return Err(SnapSyncError::NoPivotBlock(head));
    }
    Ok(head - pivot_offset)
}

/// Partitions the 256-bit key space into `n` contiguous inclusive ranges;
/// the last range is extended to `2^256 - 1`.
pub fn partition_key_space(n: u32) -> Vec<(H256, H256)> {
    let n = n.max(1) as u128;
    let max = U256::MAX;
    let step = max / U256::from(n) + U256::one();
    let mut ranges = Vec::with_capacity(n as usize);
    for i in 0..n {
        let start = step
            .checked_mul(U256::from(i))
            .unwrap_or(max)
            .min(max);
        let end = if i + 1 == n {
            max
        } else {
            step.checked_mul(U256::from(i + 1))
                .and_then(|v| v.checked_sub(U256::one()))
                .unwrap_or(max)
                .min(max)
        };
        ranges.push((u256_to_h256(start), u256_to_h256(end)));
    }
    ranges
}

fn u256_to_h256(v: U256) -> H256 {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    H256(buf)
}

fn h256_to_u256(v: H256) -> U256 {
    U256::from_big_endian(v.as_bytes())
}

/// `last.Hash + 1`, saturating at the top of the key space.
pub(crate) fn next_origin(last: H256) -> H256 {
    let v = h256_to_u256(last);
    u256_to_h256(v.saturating_add(U256::one()))
}

pub struct SnapSyncer<P: SnapPeer, W: StateWriter> {
    peer: P,
    writer: W,
    phase: AtomicU32,
    account_range_bytes: u64,
    storage_batch_accounts: usize,
    bytecode_items: usize,
    heal_nodes: usize,
    max_heal_rounds: u32,
    pending_storage: RwLock<Vec<(H256, H256)>>, // (account_hash, storage_root)
    pending_code: RwLock<HashSet<H256>>,
    accounts_done: AtomicU32,
}

impl<P: SnapPeer, W: StateWriter> SnapSyncer<P, W> {
    pub fn new(
        peer: P,
        writer: W,
        account_range_bytes: u64,
        storage_batch_accounts: usize,
        bytecode_items: usize,
        heal_nodes: usize,
        max_heal_rounds: u32,
    ) -> Self {
        Self {
            peer,
            writer,
            phase: AtomicU32::new(SnapPhase::Idle as u32),
            account_range_bytes,
            storage_batch_accounts,
            bytecode_items,
            heal_nodes,
            max_heal_rounds,
            pending_storage: RwLock::new(Vec::new()),
            pending_code: RwLock::new(HashSet::new()),
            accounts_done: AtomicU32::new(0),
        }
    }

    pub fn phase(&self) -> SnapPhase {
        SnapPhase::from_u32(self.phase.load(Ordering::SeqCst))
    }

    fn advance_phase(&self, phase: SnapPhase) {
        self.phase.store(phase as u32, Ordering::SeqCst);
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<(), SnapSyncError> {
        if cancel.is_cancelled() {
            return Err(SnapSyncError::SnapCancelled);
        }
        Ok(())
    }

    /// Runs all four phases in order (spec §4.7). `account_range_chunks`
    /// partitions the key space for phase 1 (spec §3: "default 4, max 256").
    pub async fn run(
        &self,
        root: H256,
        account_range_chunks: u32,
        cancel: &CancellationToken,
    ) -> Result<(), SnapSyncError> {
        self.advance_phase(SnapPhase::Accounts);
        self.run_accounts_phase(root, account_range_chunks, cancel).await?;

        self.advance_phase(SnapPhase::Storage);
        self.run_storage_phase(root, cancel).await?;

        self.advance_phase(SnapPhase::Bytecodes);
        self.run_bytecodes_phase(cancel).await?;

        self.advance_phase(SnapPhase::Healing);
        self.run_healing_phase(root, cancel).await?;

        self.advance_phase(SnapPhase::Complete);
        Ok(())
    }

    async fn run_accounts_phase(
        &self,
        root: H256,
        chunks: u32,
        cancel: &CancellationToken,
    ) -> Result<(), SnapSyncError> {
        for (start, limit) in partition_key_space(chunks) {
            let mut origin = start;
            loop {
                self.check_cancel(cancel)?;
                let req = AccountRangeRequest {
                    id: 0,
                    root,
                    origin,
                    limit,
                    bytes: self.account_range_bytes,
                };
                let resp = self
                    .peer
                    .request_account_range(req)
                    .await
                    .map_err(|_| SnapSyncError::BadAccountProof)?;

                for window in resp.accounts.windows(2) {
                    if window[1].hash <= window[0].hash {
                        return Err(SnapSyncError::BadAccountProof);
                    }
                }
                if let Some(first_node) = resp.proof.first() {
                    use sha3::{Digest, Keccak256};
                    let hashed = H256::from_slice(&Keccak256::digest(first_node));
                    if hashed != root {
                        return Err(SnapSyncError::BadAccountProof);
                    }
                }

                let accounts_len = resp.accounts.len();
                for account in &resp.accounts {
                    self.writer
                        .write_account(account.hash, account.clone())
                        .await;
                    if account.storage_root != EMPTY_ROOT_HASH {
                        self.pending_storage
                            .write()
                            .expect("lock poisoned")
                            .push((account.hash, account.storage_root));
                    }
                    if account.code_hash != EMPTY_CODE_HASH {
                        self.pending_code
                            .write()
                            .expect("lock poisoned")
                            .insert(account.code_hash);
                    }
                }
                self.accounts_done
                    .fetch_add(accounts_len as u32, Ordering::SeqCst);

                if resp.more && !resp.accounts.is_empty() {
                    let last = resp.accounts.last().expect("non-empty checked above");
                    origin = next_origin(last.hash);
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_storage_phase(
        &self,
        root: H256,
        cancel: &CancellationToken,
    ) -> Result<(), SnapSyncError> {
        let pending: Vec<(H256, H256)> =
            self.pending_storage.write().expect("lock poisoned").drain(..).collect();
        for batch in pending.chunks(self.storage_batch_accounts) {
            self.check_cancel(cancel)?;
            let accounts: Vec<H256> = batch.iter().map(|(a, _)| *a).collect();
            let mut origin = H256::zero();
            loop {
                self.check_cancel(cancel)?;
                let req = StorageRangeRequest {
                    id: 0,
                    root,
                    accounts: accounts.clone(),
                    origin,
                    limit: H256::repeat_byte(0xff),
                    bytes: self.account_range_bytes,
                };
                let resp = self
                    .peer
                    .request_storage_range(req)
                    .await
                    .map_err(|_| SnapSyncError::BadStorageProof)?;

                let mut last_slot = None;
                for slots in &resp.slots {
                    for window in slots.windows(2) {
                        if window[1].slot_hash <= window[0].slot_hash {
                            return Err(SnapSyncError::BadStorageProof);
                        }
                    }
                    for slot in slots {
                        self.writer
                            .write_storage(slot.account_hash, slot.slot_hash, slot.clone())
                            .await;
                        last_slot = Some(slot.slot_hash);
                    }
                }

                if resp.more {
                    match last_slot {
                        Some(last) => origin = next_origin(last),
                        None => break,
                    }
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_bytecodes_phase(&self, cancel: &CancellationToken) -> Result<(), SnapSyncError> {
        let pending: Vec<H256> = {
            let mut to_fetch = Vec::new();
            let guard = self.pending_code.read().expect("lock poisoned");
            for hash in guard.iter() {
                if !self.writer.has_bytecode(*hash).await {
                    to_fetch.push(*hash);
                }
            }
            to_fetch
        };

        for batch in pending.chunks(self.bytecode_items) {
            self.check_cancel(cancel)?;
            let req = BytecodeRequest {
                id: 0,
                hashes: batch.to_vec(),
            };
            let resp = self
                .peer
                .request_bytecodes(req)
                .await
                .map_err(|_| SnapSyncError::BadBytecode)?;
            for entry in resp.codes {
                use sha3::{Digest, Keccak256};
                let computed = H256::from_slice(&Keccak256::digest(&entry.code));
                if computed != entry.hash {
                    return Err(SnapSyncError::BadBytecode);
                }
                self.writer.write_bytecode(entry.hash, entry.code).await;
                self.pending_code.write().expect("lock poisoned").remove(&entry.hash);
            }
        }
        Ok(())
    }

    async fn run_healing_phase(
        &self,
        root: H256,
        cancel: &CancellationToken,
    ) -> Result<(), SnapSyncError> {
        for round in 0..self.max_heal_rounds {
            self.check_cancel(cancel)?;
            let missing = self.writer.missing_trie_nodes(root, self.heal_nodes).await;
            if missing.is_empty() {
                debug!(rounds = round, "healing converged");
                return Ok(());
            }
            let nodes = self
                .peer
                .request_trie_nodes(root, missing.clone())
                .await
                .map_err(|_| SnapSyncError::HealFailed)?;
            for (path, data) in missing.into_iter().zip(nodes.into_iter()) {
                if !data.is_empty() {
                    self.writer.write_trie_node(path, data).await;
                }
            }
        }
        warn!("healing exceeded max rounds with nodes still missing");
        Err(SnapSyncError::HealFailed)
    }

    pub fn accounts_done(&self) -> u32 {
        self.accounts_done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        AccountRangeResponse, BytecodeResponse, StorageRangeResponse,
    };
    use crate::types::AccountData;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn account(hash: u64, storage_root: H256, code_hash: H256) -> AccountData {
        AccountData {
            hash: H256::from_low_u64_be(hash),
            address: [0u8; 20],
            nonce: 0,
            balance: U256::zero(),
            storage_root,
            code_hash,
        }
    }

    struct FakePeer {
        accounts: Vec<AccountData>,
    }

    #[async_trait]
    impl SnapPeer for FakePeer {
        fn id(&self) -> String {
            "fake".into()
        }
        async fn request_account_range(
            &self,
            req: AccountRangeRequest,
        ) -> Result<AccountRangeResponse, String> {
            Ok(AccountRangeResponse {
                id: req.id,
                accounts: self.accounts.clone(),
                proof: vec![ROOT_NODE_FIXTURE.to_vec()],
                more: false,
            })
        }
        async fn request_storage_range(
            &self,
            req: StorageRangeRequest,
        ) -> Result<StorageRangeResponse, String> {
            Ok(StorageRangeResponse {
                id: req.id,
                slots: vec![],
                proof: vec![],
                more: false,
            })
        }
        async fn request_bytecodes(&self, req: BytecodeRequest) -> Result<BytecodeResponse, String> {
            Ok(BytecodeResponse {
                id: req.id,
                codes: vec![],
            })
        }
        async fn request_trie_nodes(
            &self,
            _root: H256,
            _paths: Vec<Vec<u8>>,
        ) -> Result<Vec<Vec<u8>>, String> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct FakeWriter {
        written_accounts: Mutex<Vec<H256>>,
    }

    #[async_trait]
    impl StateWriter for FakeWriter {
        async fn write_account(&self, hash: H256, _data: AccountData) {
            self.written_accounts.lock().expect("lock poisoned").push(hash);
        }
        async fn write_storage(&self, _a: H256, _s: H256, _data: crate::types::StorageData) {}
        async fn write_bytecode(&self, _hash: H256, _code: Vec<u8>) {}
        async fn write_trie_node(&self, _path: Vec<u8>, _data: Vec<u8>) {}
        async fn has_bytecode(&self, _hash: H256) -> bool {
            true
        }
        async fn has_trie_node(&self, _path: &[u8]) -> bool {
            true
        }
        async fn missing_trie_nodes(&self, _root: H256, _limit: usize) -> Vec<Vec<u8>> {
            vec![]
        }
    }

    const ROOT_NODE_FIXTURE: &[u8] = b"test-root-node";

    fn fixture_root() -> H256 {
        use sha3::{Digest, Keccak256};
        H256::from_slice(&Keccak256::digest(ROOT_NODE_FIXTURE))
    }

    #[tokio::test]
    async fn s4_snap_accounts_happy_path() {
        let accounts: Vec<AccountData> = (0..6)
            .map(|i| account(i + 1, EMPTY_ROOT_HASH, EMPTY_CODE_HASH))
            .collect();
        let peer = FakePeer {
            accounts: accounts.clone(),
        };
        let root = fixture_root();
        let writer = FakeWriter::default();
        let syncer = SnapSyncer::new(peer, writer, 512 * 1024, 8, 64, 128, 1024);
        let cancel = CancellationToken::new();

        syncer
            .run_accounts_phase(root, 1, &cancel)
            .await
            .unwrap();
        assert_eq!(syncer.accounts_done(), 6);
        assert_eq!(syncer.writer.written_accounts.lock().expect("lock poisoned").len(), 6);
    }

    #[test]
    fn phase_is_monotonic_order() {
        assert!(SnapPhase::Idle < SnapPhase::Accounts);
        assert!(SnapPhase::Accounts < SnapPhase::Storage);
        assert!(SnapPhase::Storage < SnapPhase::Bytecodes);
        assert!(SnapPhase::Bytecodes < SnapPhase::Healing);
        assert!(SnapPhase::Healing < SnapPhase::Complete);
    }

    #[test]
    fn select_pivot_requires_min_block() {
        assert_eq!(select_pivot(50, 128, 64), Err(SnapSyncError::NoPivotBlock(50)));
        assert_eq!(select_pivot(200, 128, 64), Ok(136));
    }

    #[test]
    fn partition_covers_full_key_space_without_gaps() {
        let ranges = partition_key_space(4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].0, H256::zero());
        assert_eq!(ranges[3].1, H256::repeat_byte(0xff));
        for window in ranges.windows(2) {
            assert_eq!(next_origin(window[0].1), window[1].0);
        }
    }

    #[test]
    fn partition_n_one_covers_everything() {
        let ranges = partition_key_space(1);
        assert_eq!(ranges, vec![(H256::zero(), H256::repeat_byte(0xff))]);
    }
}
