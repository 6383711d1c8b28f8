//! C5: Skeleton Chain — sparse anchors plus derived gap segments, and the
//! in-flight throttle accounting for receipt tasks (spec §4.4, §3). Grounded
//! on the teacher's anchor-stride pulls and the receipt-throttling fields
//! threaded through `sync/full.rs`/`peer_handler.rs`.

use crate::error::SkeletonError;
use crate::types::{GapSegment, Header, SkeletonAnchor};
use ethereum_types::H256;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

pub struct SkeletonChain {
    stride: u64,
    max_in_flight_tasks: u32,
    max_in_flight_bytes: u64,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    anchors: BTreeMap<u64, SkeletonAnchor>,
    gaps: Vec<GapSegment>,
    filled_headers: HashMap<u64, H256>,
    in_flight_tasks: u32,
    in_flight_bytes: u64,
}

impl SkeletonChain {
    pub fn new(stride: u64, max_in_flight_tasks: u32, max_in_flight_bytes: u64) -> Self {
        Self {
            stride: stride.max(1),
            max_in_flight_tasks,
            max_in_flight_bytes,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Inserts an anchor; anchors must be strictly ordered by `Number`.
    /// Recomputes the gap list (spec §3: "Gaps are recomputed on every
    /// anchor insert").
    pub fn add_anchor(&self, anchor: SkeletonAnchor) -> Result<(), SkeletonError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if let Some((&last_number, _)) = inner.anchors.iter().next_back() {
            if anchor.number <= last_number {
                return Err(SkeletonError::OutOfOrderAnchor);
            }
        }
        inner.anchors.insert(anchor.number, anchor);
        Self::recompute_gaps(&mut inner);
        Ok(())
    }

    fn recompute_gaps(inner: &mut Inner) {
        let anchors: Vec<&SkeletonAnchor> = inner.anchors.values().collect();
        let mut gaps = Vec::new();
        for pair in anchors.windows(2) {
            let start = pair[0].number + 1;
            let end = pair[1].number.saturating_sub(1);
            if start <= end {
                let filled = (start..=end).all(|n| inner.filled_headers.contains_key(&n));
                gaps.push(GapSegment { start, end, filled });
            }
        }
        inner.gaps = gaps;
    }

    pub fn gaps(&self) -> Vec<GapSegment> {
        self.inner.read().expect("lock poisoned").gaps.clone()
    }

    pub fn anchors(&self) -> Vec<SkeletonAnchor> {
        self.inner
            .read()
            .expect("lock poisoned")
            .anchors
            .values()
            .cloned()
            .collect()
    }

    /// Validates intra-batch parent linkage and writes headers into the
    /// filled map; marks any gap Filled iff every number in its range is
    /// now present.
    pub fn fill_headers(&self, headers: &[Header]) -> Result<(), crate::error::HeaderValidationError> {
        crate::header_validator::validate_header_chain(headers, None)?;
        let mut inner = self.inner.write().expect("lock poisoned");
        for h in headers {
            inner.filled_headers.insert(h.number, h.hash);
        }
        Self::recompute_gaps(&mut inner);
        Ok(())
    }

    /// `highest_anchor − 64`, clamped ≥ 1.
    pub fn select_pivot_block(&self, pivot_offset: u64) -> Option<u64> {
        let inner = self.inner.read().expect("lock poisoned");
        let highest = *inner.anchors.keys().next_back()?;
        Some(highest.saturating_sub(pivot_offset).max(1))
    }

    /// The stride positions a skeleton walks: `start, start+S, ..., end`.
    pub fn anchor_positions(start: u64, end: u64, stride: u64) -> Vec<u64> {
        let stride = stride.max(1);
        let mut positions: Vec<u64> = (start..end).step_by(stride as usize).collect();
        if positions.last() != Some(&end) {
            positions.push(end);
        }
        positions
    }

    pub fn queue_receipt_task(&self, bytes: u64) -> Result<(), SkeletonError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.in_flight_tasks >= self.max_in_flight_tasks
            || inner.in_flight_bytes + bytes > self.max_in_flight_bytes
        {
            return Err(SkeletonError::Throttled);
        }
        inner.in_flight_tasks += 1;
        inner.in_flight_bytes += bytes;
        Ok(())
    }

    pub fn complete_receipt_task(&self, bytes: u64) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.in_flight_tasks = inner.in_flight_tasks.saturating_sub(1);
        inner.in_flight_bytes = inner.in_flight_bytes.saturating_sub(bytes);
    }

    pub fn in_flight_tasks(&self) -> u32 {
        self.inner.read().expect("lock poisoned").in_flight_tasks
    }

    pub fn in_flight_bytes(&self) -> u64 {
        self.inner.read().expect("lock poisoned").in_flight_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::U256;

    fn header(number: u64, hash: u8, parent_hash: u8, time: u64) -> Header {
        Header {
            number,
            hash: H256::from_low_u64_be(hash as u64),
            parent_hash: H256::from_low_u64_be(parent_hash as u64),
            state_root: H256::zero(),
            receipt_root: H256::zero(),
            logs_bloom: [0u8; 256],
            gas_used: 0,
            gas_limit: 0,
            time,
            difficulty: U256::zero(),
        }
    }

    fn anchor(number: u64) -> SkeletonAnchor {
        SkeletonAnchor {
            number,
            hash: H256::from_low_u64_be(number),
            parent_hash: H256::from_low_u64_be(number.saturating_sub(1)),
            timestamp: 100,
        }
    }

    #[test]
    fn gaps_are_derived_between_anchors() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.add_anchor(anchor(100)).unwrap();
        skel.add_anchor(anchor(105)).unwrap();
        let gaps = skel.gaps();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0], GapSegment { start: 101, end: 104, filled: false });
    }

    #[test]
    fn adjacent_anchors_produce_no_gap() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.add_anchor(anchor(1)).unwrap();
        skel.add_anchor(anchor(2)).unwrap();
        assert!(skel.gaps().is_empty());
    }

    #[test]
    fn anchors_must_be_strictly_ordered() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.add_anchor(anchor(10)).unwrap();
        assert_eq!(
            skel.add_anchor(anchor(10)).unwrap_err(),
            SkeletonError::OutOfOrderAnchor
        );
        assert_eq!(
            skel.add_anchor(anchor(5)).unwrap_err(),
            SkeletonError::OutOfOrderAnchor
        );
    }

    #[test]
    fn gap_marked_filled_once_every_number_present() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.add_anchor(anchor(1)).unwrap();
        skel.add_anchor(anchor(4)).unwrap();
        assert!(!skel.gaps()[0].filled);

        let headers = vec![header(2, 2, 1, 100), header(3, 3, 2, 100)];
        skel.fill_headers(&headers).unwrap();
        assert!(skel.gaps()[0].filled);
    }

    #[test]
    fn select_pivot_clamped_to_one() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.add_anchor(anchor(10)).unwrap();
        assert_eq!(skel.select_pivot_block(64), Some(1));

        let skel2 = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel2.add_anchor(anchor(200)).unwrap();
        assert_eq!(skel2.select_pivot_block(64), Some(136));
    }

    #[test]
    fn throttle_rejects_over_task_limit() {
        let skel = SkeletonChain::new(2048, 2, 1_000_000);
        skel.queue_receipt_task(10).unwrap();
        skel.queue_receipt_task(10).unwrap();
        assert_eq!(skel.queue_receipt_task(10).unwrap_err(), SkeletonError::Throttled);
        skel.complete_receipt_task(10);
        assert_eq!(skel.in_flight_tasks(), 1);
        skel.queue_receipt_task(10).unwrap();
        assert_eq!(skel.in_flight_tasks(), 2);
    }

    #[test]
    fn throttle_rejects_over_byte_limit() {
        let skel = SkeletonChain::new(2048, 100, 20);
        skel.queue_receipt_task(15).unwrap();
        assert_eq!(skel.queue_receipt_task(10).unwrap_err(), SkeletonError::Throttled);
    }

    #[test]
    fn complete_does_not_underflow_below_zero() {
        let skel = SkeletonChain::new(2048, 8, 64 * 1024 * 1024);
        skel.complete_receipt_task(10);
        assert_eq!(skel.in_flight_tasks(), 0);
        assert_eq!(skel.in_flight_bytes(), 0);
    }

    #[test]
    fn anchor_positions_walks_stride_and_includes_end() {
        let positions = SkeletonChain::anchor_positions(0, 10, 4);
        assert_eq!(positions, vec![0, 4, 8, 10]);
    }
}
