//! C8: Trie Healer — priority queue over missing nodes, per-account storage
//! healing, retries, and checkpointing (spec §4.8). Grounded on the
//! teacher's `sync/healing.rs` + `sync/healing/{state,types}.rs` split
//! between main-trie and storage-trie healing, and the periodic checkpoint
//! callback implied by `SyncError::SnapshotReadError` resume handling.

use crate::collaborators::StateWriter;
use crate::types::{HealCheckpoint, HealTask, PendingHealPath};
use ethereum_types::H256;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    depth: u32,
    task: HealTask,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.depth.cmp(&other.depth)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TrieHealer<W: StateWriter> {
    writer: W,
    max_retries: u32,
    checkpoint_interval: u64,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: BinaryHeap<Reverse<HeapEntry>>,
    seen: HashSet<(H256, Vec<u8>)>,
    failed: HashMap<(H256, Vec<u8>), HealTask>,
    storage_roots: Vec<(H256, H256)>,
    nodes_healed: u64,
    nodes_failed: u64,
    bytes_downloaded: u64,
    since_checkpoint: u64,
}

impl<W: StateWriter> TrieHealer<W> {
    pub fn new(writer: W, max_retries: u32, checkpoint_interval: u64) -> Self {
        Self {
            writer,
            max_retries,
            checkpoint_interval,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn push(&self, task: HealTask) {
        let mut inner = self.inner.write().expect("lock poisoned");
        let key = (task.account_hash, task.path.clone());
        if inner.seen.contains(&key) {
            return;
        }
        inner.seen.insert(key);
        inner.queue.push(Reverse(HeapEntry {
            depth: task.depth,
            task,
        }));
    }

    pub fn pop(&self) -> Option<HealTask> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.queue.pop().map(|Reverse(e)| e.task)
    }

    pub fn add_storage_trie(&self, account_hash: H256, storage_root: H256) {
        self.inner
            .write()
            .expect("lock poisoned")
            .storage_roots
            .push((account_hash, storage_root));
    }

    pub fn storage_roots(&self) -> Vec<(H256, H256)> {
        self.inner.read().expect("lock poisoned").storage_roots.clone()
    }

    /// Heals a single popped task: fetches the node via the writer's
    /// `has_trie_node` gate (actual network fetch is the caller's
    /// responsibility through a `SnapPeer`; here we model success/failure by
    /// whether `data` was supplied non-empty), retrying up to `max_retries`
    /// before moving the task to `failed`.
    pub fn record_result(&self, task: HealTask, data: Option<Vec<u8>>) -> bool {
        let mut inner = self.inner.write().expect("lock poisoned");
        match data {
            Some(bytes) if !bytes.is_empty() => {
                inner.nodes_healed += 1;
                inner.bytes_downloaded += bytes.len() as u64;
                inner.since_checkpoint += 1;
                true
            }
            _ => {
                let key = (task.account_hash, task.path.clone());
                if task.retries + 1 >= self.max_retries {
                    inner.nodes_failed += 1;
                    inner.failed.insert(
                        key,
                        HealTask {
                            retries: task.retries + 1,
                            ..task
                        },
                    );
                } else {
                    let retried = HealTask {
                        retries: task.retries + 1,
                        ..task
                    };
                    inner.seen.remove(&key);
                    drop(inner);
                    self.push(retried);
                    return false;
                }
                false
            }
        }
    }

    pub async fn write_node(&self, path: Vec<u8>, data: Vec<u8>) {
        self.writer.write_trie_node(path, data).await;
    }

    pub fn should_checkpoint(&self) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        inner.since_checkpoint >= self.checkpoint_interval
    }

    /// Builds a checkpoint and resets the since-last-checkpoint counter.
    pub fn checkpoint(&self, state_root: H256, now: u64) -> HealCheckpoint {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.since_checkpoint = 0;
        let pending_paths = inner
            .queue
            .iter()
            .map(|Reverse(e)| PendingHealPath {
                path: e.task.path.clone(),
                account_hash: e.task.account_hash,
                root: e.task.root,
                depth: e.task.depth,
            })
            .collect();
        HealCheckpoint {
            state_root,
            nodes_healed: inner.nodes_healed,
            nodes_failed: inner.nodes_failed,
            bytes_downloaded: inner.bytes_downloaded,
            pending_paths,
            account_roots: inner.storage_roots.clone(),
            timestamp: now,
        }
    }

    /// Restores counters and re-pushes pending paths, ordered by `Depth`
    /// ascending per spec §6.
    pub fn resume_from_checkpoint(&self, cp: HealCheckpoint) {
        {
            let mut inner = self.inner.write().expect("lock poisoned");
            inner.nodes_healed = cp.nodes_healed;
            inner.nodes_failed = cp.nodes_failed;
            inner.bytes_downloaded = cp.bytes_downloaded;
            inner.storage_roots = cp.account_roots;
        }
        let mut sorted = cp.pending_paths;
        sorted.sort_by_key(|p| p.depth);
        for p in sorted {
            self.push(HealTask {
                path: p.path,
                account_hash: p.account_hash,
                root: p.root,
                depth: p.depth,
                retries: 0,
                created_at: 0,
            });
        }
    }

    pub fn nodes_healed(&self) -> u64 {
        self.inner.read().expect("lock poisoned").nodes_healed
    }

    pub fn nodes_failed(&self) -> u64 {
        self.inner.read().expect("lock poisoned").nodes_failed
    }

    pub fn is_queue_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").queue.is_empty()
    }

    /// Completion check (spec §4.8): the queue is empty AND the writer
    /// reports no missing nodes for the state root or any registered
    /// storage root.
    pub async fn is_complete(&self, state_root: H256) -> bool {
        if !self.is_queue_empty() {
            return false;
        }
        if !self.writer.missing_trie_nodes(state_root, 1).await.is_empty() {
            return false;
        }
        for (_, root) in self.storage_roots() {
            if !self.writer.missing_trie_nodes(root, 1).await.is_empty() {
                return false;
            }
        }
        true
    }
}
