//! C6: Chain Inserter / Block Processor — sequential validate+insert
//! pipeline (spec §4.5). Grounded on the teacher's `Blockchain::add_blocks`
//! / `BatchBlockProcessingFailure` flow referenced from `sync/full.rs`,
//! generalized into an explicit FIFO queue keyed by block number so
//! contiguity (invariant 3) is independently testable without a real EVM.

use crate::collaborators::{BlockExecutor, BlockInserter};
use crate::error::ChainInserterError;
use crate::types::{Block, Header, Receipt};
use ethereum_types::H256;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct ValidationFlags {
    pub verify_state_root: bool,
    pub verify_receipts: bool,
    pub verify_bloom: bool,
    pub verify_gas_used: bool,
}

impl Default for ValidationFlags {
    fn default() -> Self {
        Self {
            verify_state_root: true,
            verify_receipts: true,
            verify_bloom: true,
            verify_gas_used: true,
        }
    }
}

/// `DeriveSha` over the receipt list — RLP encoding is out of this crate's
/// hard core (spec §1), so the "wire bytes" of a receipt are its raw
/// in-memory representation; only the composition (a root committing to the
/// ordered list) matters to the invariant being tested.
fn derive_receipts_root(receipts: &[Receipt]) -> H256 {
    let mut hasher = Keccak256::new();
    for r in receipts {
        hasher.update(r.cumulative_gas_used.to_be_bytes());
        hasher.update(r.logs_bloom);
    }
    H256::from_slice(&hasher.finalize())
}

fn derive_bloom(receipts: &[Receipt]) -> [u8; 256] {
    let mut bloom = [0u8; 256];
    for r in receipts {
        for (b, rb) in bloom.iter_mut().zip(r.logs_bloom.iter()) {
            *b |= rb;
        }
    }
    bloom
}

fn count_duplicate_hashes(hashes: &[H256]) -> bool {
    let mut seen = std::collections::HashSet::new();
    !hashes.iter().all(|h| seen.insert(*h))
}

/// Per-block validation described in spec §4.5: contiguity, execution,
/// receipts, and uncles.
pub fn validate_block(
    block: &Block,
    head: &Header,
    expected_number: u64,
    computed_state_root: H256,
    receipts: &[Receipt],
    flags: ValidationFlags,
) -> Result<(), ChainInserterError> {
    if block.header.number != expected_number {
        return Err(ChainInserterError::NotContiguous {
            expected: expected_number,
            got: block.header.number,
        });
    }
    if block.header.parent_hash != head.hash {
        return Err(ChainInserterError::MissingParent(block.header.number));
    }
    if flags.verify_state_root && computed_state_root != block.header.state_root {
        return Err(ChainInserterError::StateRootMismatch(block.header.number));
    }
    if flags.verify_receipts {
        if derive_receipts_root(receipts) != block.header.receipt_root {
            return Err(ChainInserterError::BadReceiptRoot(block.header.number));
        }
        if flags.verify_bloom && derive_bloom(receipts) != block.header.logs_bloom {
            return Err(ChainInserterError::LogsBloomMismatch(block.header.number));
        }
        if flags.verify_gas_used {
            let last_gas = receipts.last().map(|r| r.cumulative_gas_used).unwrap_or(0);
            if last_gas != block.header.gas_used {
                return Err(ChainInserterError::GasUsedMismatch(block.header.number));
            }
        }
    }
    if block.body.uncles.len() > 2 {
        return Err(ChainInserterError::BadUncleCount(block.header.number));
    }
    let uncle_hashes: Vec<H256> = block.body.uncles.iter().map(|u| u.hash).collect();
    if count_duplicate_hashes(&uncle_hashes) {
        return Err(ChainInserterError::DuplicateUncle(block.header.number));
    }
    Ok(())
}

pub struct ChainInserter<E: BlockExecutor, I: BlockInserter> {
    executor: E,
    inserter: I,
    flags: ValidationFlags,
    max_queue_size: usize,
    batch_size: usize,
    state: RwLock<State>,
}

struct State {
    queue: BTreeMap<u64, Block>,
    queued_hashes: std::collections::HashSet<H256>,
    next_expected: u64,
    head: Header,
    closed: bool,
}

impl<E: BlockExecutor, I: BlockInserter> ChainInserter<E, I> {
    pub fn new(
        executor: E,
        inserter: I,
        head: Header,
        max_queue_size: usize,
        batch_size: usize,
        flags: ValidationFlags,
    ) -> Self {
        let next_expected = head.number + 1;
        Self {
            executor,
            inserter,
            flags,
            max_queue_size,
            batch_size,
            state: RwLock::new(State {
                queue: BTreeMap::new(),
                queued_hashes: std::collections::HashSet::new(),
                next_expected,
                head,
                closed: false,
            }),
        }
    }

    pub fn enqueue(&self, block: Block) -> Result<(), ChainInserterError> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Err(ChainInserterError::ProcessorClosed);
        }
        if state.queue.len() >= self.max_queue_size {
            return Err(ChainInserterError::QueueFull);
        }
        if state.queued_hashes.contains(&block.hash()) {
            return Err(ChainInserterError::DuplicateBlock(block.hash()));
        }
        state.queued_hashes.insert(block.hash());
        state.queue.insert(block.number(), block);
        Ok(())
    }

    pub fn next_expected(&self) -> u64 {
        self.state.read().expect("lock poisoned").next_expected
    }

    pub fn close(&self) {
        self.state.write().expect("lock poisoned").closed = true;
    }

    /// Drains the queue while the head equals `NextExpected`, up to
    /// `batch_size` blocks, validating each against its predecessor.
    /// Returns `(inserted_so_far, error)`; halts the batch on first failure.
    ///
    /// Blocks are only peeked (cloned), never removed from `state.queue`,
    /// until `insert_chain` has confirmed they were actually inserted — a
    /// failed or partially-inserted batch leaves every un-inserted block
    /// (including anything after the failure point) sitting in the queue at
    /// its original number, so `NextExpected` always points at a block that
    /// is still there for the next call to pick up (spec §7).
    pub async fn process_ready(&self) -> (u32, Option<ChainInserterError>) {
        let ready: Vec<Block> = {
            let state = self.state.read().expect("lock poisoned");
            let mut cursor = state.next_expected;
            let mut ready = Vec::new();
            while ready.len() < self.batch_size {
                match state.queue.get(&cursor) {
                    Some(block) => {
                        ready.push(block.clone());
                        cursor += 1;
                    }
                    None => break,
                }
            }
            ready
        };
        if ready.is_empty() {
            return (0, None);
        }

        let mut head = self.state.read().expect("lock poisoned").head.clone();
        let mut to_insert = Vec::with_capacity(ready.len());
        let mut failure = None;
        for block in ready {
            let exec_result = self.executor.execute_block(&block).await;
            let (state_root, receipts) = match exec_result {
                Ok(v) => v,
                Err(e) => {
                    failure = Some(ChainInserterError::Executor(e));
                    break;
                }
            };
            let expected_number = head.number + 1;
            if let Err(e) = validate_block(
                &block,
                &head,
                expected_number,
                state_root,
                &receipts,
                self.flags,
            ) {
                failure = Some(e);
                break;
            }
            head = block.header.clone();
            to_insert.push(block);
        }

        if to_insert.is_empty() {
            return (0, failure);
        }

        match self.inserter.insert_chain(to_insert.clone()).await {
            Ok((n, insert_err)) => {
                let n = (n as usize).min(to_insert.len());
                let mut state = self.state.write().expect("lock poisoned");
                for block in to_insert.iter().take(n) {
                    state.queue.remove(&block.number());
                    state.queued_hashes.remove(&block.hash());
                }
                state.next_expected += n as u64;
                if n > 0 {
                    state.head = to_insert[n - 1].header.clone();
                }
                let next_expected = state.next_expected;
                drop(state);
                let err = if n < to_insert.len() {
                    Some(
                        insert_err
                            .map(|_| ChainInserterError::MissingParent(next_expected))
                            .unwrap_or(ChainInserterError::MissingParent(next_expected)),
                    )
                } else {
                    failure
                };
                (n as u32, err)
            }
            Err(_) => (0, Some(ChainInserterError::MissingParent(head.number))),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.read().expect("lock poisoned").queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethereum_types::U256;

    fn header(number: u64, hash: u8, parent_hash: u8) -> Header {
        Header {
            number,
            hash: H256::from_low_u64_be(hash as u64),
            parent_hash: H256::from_low_u64_be(parent_hash as u64),
            state_root: H256::zero(),
            receipt_root: derive_receipts_root(&[]),
            logs_bloom: [0u8; 256],
            gas_used: 0,
            gas_limit: 0,
            time: 100,
            difficulty: U256::zero(),
        }
    }

    fn block(number: u64, hash: u8, parent_hash: u8) -> Block {
        Block {
            header: header(number, hash, parent_hash),
            body: Default::default(),
        }
    }

    struct StubExecutor;
    #[async_trait]
    impl BlockExecutor for StubExecutor {
        async fn execute_block(
            &self,
            _block: &Block,
        ) -> Result<(H256, Vec<Receipt>), crate::error::ExecutorError> {
            Ok((H256::zero(), vec![]))
        }
    }

    struct StubInserter;
    #[async_trait]
    impl BlockInserter for StubInserter {
        async fn insert_chain(&self, blocks: Vec<Block>) -> Result<(u32, Option<String>), String> {
            Ok((blocks.len() as u32, None))
        }
        async fn current_block(&self) -> Block {
            block(0, 0, 0)
        }
    }

    /// Fails execution for one specific block number, succeeds otherwise.
    struct FlakyExecutor {
        fail_on: u64,
    }
    #[async_trait]
    impl BlockExecutor for FlakyExecutor {
        async fn execute_block(
            &self,
            block: &Block,
        ) -> Result<(H256, Vec<Receipt>), crate::error::ExecutorError> {
            if block.header.number == self.fail_on {
                return Err(crate::error::ExecutorError("boom".into()));
            }
            Ok((H256::zero(), vec![]))
        }
    }

    /// Only inserts the first `n` blocks of whatever batch it's handed.
    struct PartialInserter {
        n: u32,
    }
    #[async_trait]
    impl BlockInserter for PartialInserter {
        async fn insert_chain(&self, blocks: Vec<Block>) -> Result<(u32, Option<String>), String> {
            Ok((self.n.min(blocks.len() as u32), None))
        }
        async fn current_block(&self) -> Block {
            block(0, 0, 0)
        }
    }

    #[tokio::test]
    async fn contiguity_invariant_3() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            StubExecutor,
            StubInserter,
            genesis,
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(1, 1, 0)).unwrap();
        inserter.enqueue(block(2, 2, 1)).unwrap();
        inserter.enqueue(block(3, 3, 2)).unwrap();

        let (inserted, err) = inserter.process_ready().await;
        assert!(err.is_none());
        assert_eq!(inserted, 3);
        assert_eq!(inserter.next_expected(), 4);
    }

    #[test]
    fn duplicate_block_rejected() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            StubExecutor,
            StubInserter,
            genesis,
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(1, 1, 0)).unwrap();
        assert!(matches!(
            inserter.enqueue(block(1, 1, 0)),
            Err(ChainInserterError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn queue_full_rejected() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            StubExecutor,
            StubInserter,
            genesis,
            1,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(1, 1, 0)).unwrap();
        assert!(matches!(
            inserter.enqueue(block(2, 2, 1)),
            Err(ChainInserterError::QueueFull)
        ));
    }

    #[test]
    fn closed_processor_rejects_enqueue() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            StubExecutor,
            StubInserter,
            genesis,
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.close();
        assert!(matches!(
            inserter.enqueue(block(1, 1, 0)),
            Err(ChainInserterError::ProcessorClosed)
        ));
    }

    #[test]
    fn rejects_too_many_uncles() {
        let head = header(0, 0, 0);
        let mut b = block(1, 1, 0);
        b.body.uncles = vec![header(1, 10, 0), header(1, 11, 0), header(1, 12, 0)];
        let err = validate_block(&b, &head, 1, H256::zero(), &[], ValidationFlags::default())
            .unwrap_err();
        assert_eq!(err, ChainInserterError::BadUncleCount(1));
    }

    #[test]
    fn rejects_duplicate_uncles() {
        let head = header(0, 0, 0);
        let mut b = block(1, 1, 0);
        b.body.uncles = vec![header(1, 10, 0), header(1, 10, 0)];
        let err = validate_block(&b, &head, 1, H256::zero(), &[], ValidationFlags::default())
            .unwrap_err();
        assert_eq!(err, ChainInserterError::DuplicateUncle(1));
    }

    #[test]
    fn state_root_mismatch_is_fatal_kind() {
        let head = header(0, 0, 0);
        let b = block(1, 1, 0);
        let err = validate_block(
            &b,
            &head,
            1,
            H256::repeat_byte(1),
            &[],
            ValidationFlags::default(),
        )
        .unwrap_err();
        assert_eq!(err, ChainInserterError::StateRootMismatch(1));
    }

    #[tokio::test]
    async fn exec_failure_requeues_unprocessed_tail() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            FlakyExecutor { fail_on: 2 },
            StubInserter,
            genesis,
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(1, 1, 0)).unwrap();
        inserter.enqueue(block(2, 2, 1)).unwrap();
        inserter.enqueue(block(3, 3, 2)).unwrap();

        let (inserted, err) = inserter.process_ready().await;
        assert_eq!(inserted, 1);
        assert!(matches!(err, Some(ChainInserterError::Executor(_))));
        assert_eq!(inserter.next_expected(), 2);
        assert_eq!(inserter.queue_len(), 2);

        let inserter = ChainInserter::new(
            StubExecutor,
            StubInserter,
            header(1, 1, 0),
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(2, 2, 1)).unwrap();
        inserter.enqueue(block(3, 3, 2)).unwrap();
        let (inserted, err) = inserter.process_ready().await;
        assert!(err.is_none());
        assert_eq!(inserted, 2);
        assert_eq!(inserter.next_expected(), 4);
    }

    #[tokio::test]
    async fn partial_insert_caps_head_and_requeues_tail() {
        let genesis = header(0, 0, 0);
        let inserter = ChainInserter::new(
            StubExecutor,
            PartialInserter { n: 2 },
            genesis,
            4096,
            10,
            ValidationFlags::default(),
        );
        inserter.enqueue(block(1, 1, 0)).unwrap();
        inserter.enqueue(block(2, 2, 1)).unwrap();
        inserter.enqueue(block(3, 3, 2)).unwrap();

        let (inserted, err) = inserter.process_ready().await;
        assert_eq!(inserted, 2);
        assert!(err.is_some());
        assert_eq!(inserter.next_expected(), 3);
        assert_eq!(inserter.queue_len(), 1);
    }
}
