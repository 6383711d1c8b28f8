//! C3: Block Downloader — partitions a block range into batches and serves
//! them to peers (spec §4.3). Grounded on the teacher's batched body-fetch
//! loop in `sync/full.rs` (`FULLSYNC_BODY_INFLIGHT` pipelining), generalized
//! here into an explicit task queue so assignment/retry/completion are
//! independently testable.

use crate::error::BlockDownloaderError;
use ethereum_types::H256;
use std::sync::RwLock;
use std::time::Instant;

use crate::types::{DownloadTask, TaskStatus};

pub struct BlockDownloader {
    batch_size: u64,
    retry_limit: u32,
    max_concurrent: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: Vec<DownloadTask>,
    next_id: u64,
    completed_blocks: u64,
}

impl BlockDownloader {
    pub fn new(batch_size: u64, retry_limit: u32, max_concurrent: usize) -> Self {
        Self {
            // spec: "treats 0 as 1"
            batch_size: batch_size.max(1),
            retry_limit,
            max_concurrent,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Partitions `[from, to]` into `Pending` batches of `batch_size`.
    pub fn queue_range(&self, from: u64, to: u64) -> Result<Vec<String>, BlockDownloaderError> {
        if from > to {
            return Err(BlockDownloaderError::InvalidRange);
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        let mut ids = Vec::new();
        let mut start = from;
        while start <= to {
            let end = (start + self.batch_size - 1).min(to);
            let id = format!("task-{}", inner.next_id);
            inner.next_id += 1;
            inner.tasks.push(DownloadTask::new(id.clone(), start, end));
            ids.push(id);
            start = end + 1;
        }
        Ok(ids)
    }

    /// Returns the lowest-`StartBlock` `Pending` task (FIFO tie-break),
    /// assigns it to `peer_id`, or `None` if there is no eligible task.
    pub fn assign_task(&self, peer_id: &str) -> Option<DownloadTask> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let active_count = inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Active)
            .count();
        if active_count >= self.max_concurrent {
            return None;
        }
        let index = inner
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .min_by_key(|(i, t)| (t.start_block, *i))
            .map(|(i, _)| i)?;
        let task = &mut inner.tasks[index];
        task.status = TaskStatus::Active;
        task.peer_id = Some(peer_id.to_string());
        task.attempts += 1;
        Some(task.clone())
    }

    pub fn complete_task(
        &self,
        id: &str,
        block_hashes: Vec<H256>,
    ) -> Result<(), BlockDownloaderError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| BlockDownloaderError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Active {
            return Err(BlockDownloaderError::TaskNotActive(id.to_string()));
        }
        let span = task.len();
        task.block_hashes = block_hashes;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Instant::now());
        inner.completed_blocks += span;
        Ok(())
    }

    pub fn fail_task(&self, id: &str) -> Result<(), BlockDownloaderError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| BlockDownloaderError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Active {
            return Err(BlockDownloaderError::TaskNotActive(id.to_string()));
        }
        if task.attempts < self.retry_limit {
            task.status = TaskStatus::Pending;
            task.peer_id = None;
        } else {
            task.status = TaskStatus::Failed;
        }
        Ok(())
    }

    pub fn peer_assignments(&self) -> Vec<(String, String)> {
        self.inner
            .read()
            .expect("lock poisoned")
            .tasks
            .iter()
            .filter_map(|t| t.peer_id.clone().map(|p| (t.id.clone(), p)))
            .collect()
    }

    pub fn pending_tasks(&self) -> Vec<DownloadTask> {
        self.filter_by_status(TaskStatus::Pending)
    }

    pub fn active_tasks(&self) -> Vec<DownloadTask> {
        self.filter_by_status(TaskStatus::Active)
    }

    pub fn failed_tasks(&self) -> Vec<DownloadTask> {
        self.filter_by_status(TaskStatus::Failed)
    }

    fn filter_by_status(&self, status: TaskStatus) -> Vec<DownloadTask> {
        self.inner
            .read()
            .expect("lock poisoned")
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub fn completed_blocks(&self) -> u64 {
        self.inner.read().expect("lock poisoned").completed_blocks
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.tasks.clear();
        inner.next_id = 0;
        inner.completed_blocks = 0;
    }

    /// Returns `(pending, active, completed, failed)` counts; their sum is
    /// invariant 1 (task conservation).
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.read().expect("lock poisoned");
        let mut counts = (0, 0, 0, 0);
        for t in &inner.tasks {
            match t.status {
                TaskStatus::Pending => counts.0 += 1,
                TaskStatus::Active => counts.1 += 1,
                TaskStatus::Completed => counts.2 += 1,
                TaskStatus::Failed => counts.3 += 1,
            }
        }
        counts
    }
}
