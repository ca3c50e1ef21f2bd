//! Per-transfer state machine and chunk tracker.
//!
//! Grounded on a `transfer_engine::{execute_streaming_with_receiver,
//! WorkerParams, SchedulerOptions}`-style task-stream/ramp-up shape,
//! generalized from whole-file `TransferTask`s to individual chunk jobs
//! plus the commit step a multipart upload needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::plan_store::{PlanHandle, TransferStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub part_num: u32,
    pub transfer_index: u32,
    pub chunk_ordinal: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum ChunkKind {
    Upload { offset: u64, length: u64 },
    RemoteCopy,
}

#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub chunk_id: ChunkId,
    pub kind: ChunkKind,
    pub src_path: String,
    pub dst_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelLevel {
    None = 0,
    Soft = 1,
    Hard = 2,
}

/// Cooperative cancellation token, checked by workers between I/O calls and
/// at retry wake-up. Soft cancel lets in-flight chunks finish; hard cancel
/// drops them immediately.
#[derive(Clone)]
pub struct CancelToken {
    level: Arc<AtomicU8>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            level: Arc::new(AtomicU8::new(CancelLevel::None as u8)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self, level: CancelLevel) {
        self.level.store(level as u8, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn level(&self) -> CancelLevel {
        match self.level.load(Ordering::SeqCst) {
            2 => CancelLevel::Hard,
            1 => CancelLevel::Soft,
            _ => CancelLevel::None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.level() != CancelLevel::None
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ChunkTracker {
    chunks_total: u32,
    chunks_done: AtomicU32,
    chunks_failed: AtomicU32,
    committing: AtomicBool,
}

impl ChunkTracker {
    fn new(chunks_total: u32) -> Self {
        Self {
            chunks_total,
            chunks_done: AtomicU32::new(0),
            chunks_failed: AtomicU32::new(0),
            committing: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, for whichever caller observes the last
    /// outstanding chunk — that caller owns the commit step.
    fn record_and_claim_commit(&self, ok: bool) -> bool {
        if !ok {
            self.chunks_failed.fetch_add(1, Ordering::AcqRel);
        }
        let done = self.chunks_done.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.chunks_total {
            !self.committing.swap(true, Ordering::AcqRel)
        } else {
            false
        }
    }

    fn any_failed(&self) -> bool {
        self.chunks_failed.load(Ordering::Acquire) > 0
    }
}

/// What a worker should do once it observes the last chunk of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Commit,
    MarkFailed,
    MarkCancelled,
}

pub struct Scheduler {
    plan: Arc<PlanHandle>,
    block_size: u64,
    trackers: Mutex<HashMap<u32, ChunkTracker>>,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(plan: Arc<PlanHandle>, block_size: u64) -> Self {
        Self {
            plan,
            block_size,
            trackers: Mutex::new(HashMap::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The part this scheduler drives, for readbacks like a transfer's
    /// recorded source MD5 at commit time.
    pub fn plan(&self) -> &Arc<PlanHandle> {
        &self.plan
    }

    /// For every transfer in `NotStarted`, initialise its chunk tracker, flip
    /// it to `Started`, and return the chunk jobs to enqueue. Zero-byte
    /// files still get exactly one chunk so creation happens.
    pub fn start_ready_transfers(&self) -> Result<Vec<ChunkJob>> {
        let mut jobs = Vec::new();
        let records = self.plan.iterate()?;
        let part_num = self.plan.header().part_num;

        for record in records {
            if record.status != TransferStatus::NotStarted {
                continue;
            }

            if record.entity_type == crate::plan_store::EntityType::Folder {
                self.plan.set_status(record.index, TransferStatus::FolderCreated)?;
                continue;
            }

            let chunk_count = ((record.size + self.block_size - 1) / self.block_size.max(1))
                .max(1) as u32;

            self.trackers
                .lock()
                .insert(record.index, ChunkTracker::new(chunk_count));
            self.plan.set_status(record.index, TransferStatus::Started)?;

            for ordinal in 0..chunk_count {
                let offset = ordinal as u64 * self.block_size;
                let length = self.block_size.min(record.size.saturating_sub(offset));
                jobs.push(ChunkJob {
                    chunk_id: ChunkId {
                        part_num,
                        transfer_index: record.index,
                        chunk_ordinal: ordinal,
                    },
                    kind: ChunkKind::Upload { offset, length },
                    src_path: record.src_path.clone(),
                    dst_path: record.dst_path.clone(),
                });
            }
        }

        Ok(jobs)
    }

    /// Called by a worker after a chunk I/O attempt. Returns `Some(decision)`
    /// exactly once per transfer, when the caller is responsible for
    /// finishing it (committing, or marking it Failed/Cancelled).
    pub fn on_chunk_complete(&self, transfer_index: u32, ok: bool) -> Result<Option<CommitDecision>> {
        let trackers = self.trackers.lock();
        let tracker = trackers
            .get(&transfer_index)
            .ok_or_else(|| eyre::eyre!("no chunk tracker for transfer {transfer_index}"))?;

        if !tracker.record_and_claim_commit(ok) {
            return Ok(None);
        }

        // Cancel wins over a fatal chunk error if both are in flight.
        if self.cancel.is_cancelled() {
            return Ok(Some(CommitDecision::MarkCancelled));
        }
        if tracker.any_failed() {
            return Ok(Some(CommitDecision::MarkFailed));
        }
        Ok(Some(CommitDecision::Commit))
    }

    pub fn finish_committed(&self, transfer_index: u32) -> Result<()> {
        self.plan.set_status(transfer_index, TransferStatus::Success)
    }

    pub fn finish_failed(&self, transfer_index: u32) -> Result<()> {
        self.plan.set_status(transfer_index, TransferStatus::Failed)
    }

    pub fn finish_cancelled(&self, transfer_index: u32) -> Result<()> {
        self.plan.set_status(transfer_index, TransferStatus::Cancelled)
    }
}
