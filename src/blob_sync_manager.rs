//! C13: Blob Sync Manager — per-slot blob sidecar requests and consistency
//! checks (spec §4.10). Grounded on the teacher's peer-scoped request/response
//! accounting in `peer_handler.rs`, adapted to the beacon `BlobSidecar` shape
//! in `collaborators.rs` rather than an execution-layer body.

use crate::collaborators::BlobSidecar;
use crate::error::BlobSyncError;
use rustc_hash::FxHashSet;
use sha3::{Digest, Keccak256};
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct SlotState {
    requested_indices: FxHashSet<u64>,
    blobs: Vec<BlobSidecar>,
    verified: bool,
    complete: bool,
    peer_id: Option<String>,
}

/// Tracks one beacon slot's in-flight blob download.
pub struct BlobSyncManager {
    inner: RwLock<SlotState>,
}

impl Default for BlobSyncManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobSyncManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SlotState::default()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.read().expect("lock poisoned").complete
    }

    pub fn is_verified(&self) -> bool {
        self.inner.read().expect("lock poisoned").verified
    }

    /// `RequestBlobs`: rejects if the slot is already complete or the index
    /// set is empty.
    pub fn request_blobs(
        &self,
        peer_id: &str,
        indices: &[u64],
    ) -> Result<(), BlobSyncError> {
        if indices.is_empty() {
            return Err(BlobSyncError::EmptyRequest);
        }
        let mut state = self.inner.write().expect("lock poisoned");
        if state.complete {
            return Err(BlobSyncError::SlotComplete);
        }
        state.requested_indices = indices.iter().copied().collect();
        state.peer_id = Some(peer_id.to_string());
        Ok(())
    }

    /// `ProcessBlobResponse`: rejects duplicate indices, empty payloads, and
    /// indices outside the requested set.
    pub fn process_blob_response(&self, sidecars: Vec<BlobSidecar>) -> Result<(), BlobSyncError> {
        let mut state = self.inner.write().expect("lock poisoned");
        let mut seen: FxHashSet<u64> = state.blobs.iter().map(|b| b.index).collect();
        for sidecar in &sidecars {
            if sidecar.data.is_empty() {
                return Err(BlobSyncError::EmptyBlob);
            }
            if !state.requested_indices.contains(&sidecar.index) {
                return Err(BlobSyncError::UnrequestedIndex);
            }
            if !seen.insert(sidecar.index) {
                return Err(BlobSyncError::DuplicateIndex);
            }
        }
        state.blobs.extend(sidecars);
        if state.blobs.len() >= state.requested_indices.len() {
            state.complete = true;
        }
        Ok(())
    }

    /// `VerifyBlobConsistency`: every requested index must be present and
    /// every blob's content must be distinct by Keccak256 hash.
    pub fn verify_blob_consistency(&self) -> Result<(), BlobSyncError> {
        let mut state = self.inner.write().expect("lock poisoned");
        let have: FxHashSet<u64> = state.blobs.iter().map(|b| b.index).collect();
        if have != state.requested_indices {
            return Err(BlobSyncError::Inconsistent);
        }
        let mut hashes = FxHashSet::default();
        for blob in &state.blobs {
            let digest = Keccak256::digest(&blob.data);
            if !hashes.insert(digest.to_vec()) {
                return Err(BlobSyncError::Inconsistent);
            }
        }
        state.verified = true;
        Ok(())
    }
}
