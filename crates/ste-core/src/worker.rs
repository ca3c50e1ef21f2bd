//! Worker Pool: N tasks pulling chunk jobs off a shared queue and driving
//! them through `RemoteObjectStore`, with retry/backoff, cancellation
//! checks, and Pacer/Buffer Pool backpressure.
//!
//! Grounded on a `local_worker_loop` shape — pull from a shared
//! `Arc<Mutex<Receiver<_>>>`, execute, report a sample, loop until the
//! channel closes — generalized from whole-file copy tasks to chunk I/O
//! through `RemoteObjectStore`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::buffer::BufferPool;
use crate::checksum::CheckMd5Mode;
use crate::errors::{categorize_io_error, TransferError};
use crate::logger::Logger;
use crate::pacer::Pacer;
use crate::remote_store::RemoteObjectStore;
use crate::scheduler::{CancelLevel, ChunkJob, ChunkKind, CommitDecision, Scheduler};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_tries: u8,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Capped exponential backoff with +/-20% jitter, per the Worker Pool
    /// retry contract.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped = exp.min(self.max_delay.as_millis() as u64);
        // +/-20% jitter from a uniform u32, sourced the same way the
        // daemon's data-plane token generator draws randomness.
        let raw = OsRng.next_u32();
        let jitter_frac = (raw as f64 / u32::MAX as f64) * 0.4 - 0.2;
        let jittered = (capped as f64 * (1.0 + jitter_frac)).max(0.0) as u64;
        Duration::from_millis(jittered)
    }
}

/// Shared, per-job context every worker task needs.
pub struct WorkerContext {
    pub src_root: PathBuf,
    pub store: Arc<dyn RemoteObjectStore>,
    pub pacer: Arc<Pacer>,
    pub buffers: Arc<BufferPool>,
    pub scheduler: Arc<Scheduler>,
    pub logger: Arc<dyn Logger>,
    pub retry: RetryPolicy,
    pub check_md5: CheckMd5Mode,
    /// Count of `LogOnly` checksum mismatches, for the job-level
    /// success-with-errors exit code. Shared across every worker and part of
    /// a job.
    pub checksum_warnings: Arc<AtomicU64>,
}

pub async fn spawn_workers(
    ctx: Arc<WorkerContext>,
    receiver: mpsc::Receiver<ChunkJob>,
    concurrency: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let shared_rx = Arc::new(AsyncMutex::new(receiver));
    let mut handles = Vec::with_capacity(concurrency);
    for idx in 0..concurrency {
        let ctx = ctx.clone();
        let rx = shared_rx.clone();
        handles.push(tokio::spawn(worker_loop(idx, ctx, rx)));
    }
    handles
}

async fn worker_loop(
    idx: usize,
    ctx: Arc<WorkerContext>,
    rx: Arc<AsyncMutex<mpsc::Receiver<ChunkJob>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        if let Err(err) = process_chunk(&ctx, &job).await {
            ctx.logger
                .error(Some(job.src_path.as_str()), &format!("worker {idx}: {err}"));
        }
    }
}

async fn process_chunk(ctx: &WorkerContext, job: &ChunkJob) -> eyre::Result<()> {
    let mut attempt: u32 = 0;
    let upload_id = format!("{}:{}", job.chunk_id.part_num, job.chunk_id.transfer_index);

    let outcome = loop {
        if ctx.scheduler.cancel_token().level() == CancelLevel::Hard {
            break Err(TransferError::no_retry("job cancelled", Some(job.src_path.clone())));
        }

        match attempt_chunk(ctx, job, &upload_id).await {
            Ok(()) => break Ok(()),
            Err(mut err) => {
                err.attempts = attempt.min(u8::MAX as u32) as u8;
                if !err.should_retry(ctx.retry.max_tries) {
                    break Err(err);
                }
                let delay = ctx.retry.backoff(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
        }
    };

    let ok = outcome.is_ok();
    if let Err(err) = &outcome {
        ctx.logger.error(Some(job.src_path.as_str()), &err.to_string());
    }

    if let Some(decision) = ctx
        .scheduler
        .on_chunk_complete(job.chunk_id.transfer_index, ok)?
    {
        finish_transfer(ctx, job, &upload_id, decision).await?;
    }

    Ok(())
}

async fn attempt_chunk(
    ctx: &WorkerContext,
    job: &ChunkJob,
    upload_id: &str,
) -> Result<(), TransferError> {
    match job.kind {
        ChunkKind::RemoteCopy => {
            let op = ctx
                .store
                .copy(&job.src_path, &job.dst_path)
                .await
                .map_err(|e| TransferError::retryable(e.to_string(), Some(job.src_path.clone())))?;
            ctx.store
                .poll_copy(&op)
                .await
                .map_err(|e| TransferError::retryable(e.to_string(), Some(job.src_path.clone())))?;
            Ok(())
        }
        ChunkKind::Upload { offset, length } => {
            ctx.pacer.acquire(length).await;
            let mut buf = ctx.buffers.acquire().await;
            if (buf.len() as u64) < length {
                return Err(TransferError::fatal(
                    format!("pooled buffer ({} bytes) smaller than chunk ({length} bytes)", buf.len()),
                    Some(job.src_path.clone()),
                ));
            }

            let abs_src = ctx.src_root.join(&job.src_path);
            read_region(&abs_src, offset, &mut buf.as_mut_slice()[..length as usize])
                .map_err(|e| io_to_transfer_error(&e, &job.src_path))?;

            ctx.store
                .put_chunk(
                    &job.dst_path,
                    &upload_id.to_string(),
                    job.chunk_id.chunk_ordinal,
                    &buf[..length as usize],
                )
                .await
                .map_err(|e| TransferError::retryable(e.to_string(), Some(job.src_path.clone())))?;
            Ok(())
        }
    }
}

fn read_region(path: &std::path::Path, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = std::fs::File::open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)
}

fn io_to_transfer_error(err: &std::io::Error, path: &str) -> TransferError {
    let category = categorize_io_error(err);
    TransferError::new(category, err.to_string(), Some(path.to_string()))
}

async fn finish_transfer(
    ctx: &WorkerContext,
    job: &ChunkJob,
    upload_id: &str,
    decision: CommitDecision,
) -> eyre::Result<()> {
    match decision {
        CommitDecision::Commit => {
            let commit_result = ctx
                .store
                .commit(&job.dst_path, &upload_id.to_string(), &[], &HashMap::new())
                .await;
            match commit_result {
                Ok(()) => match verify_checksum(ctx, job).await {
                    Ok(true) => ctx.scheduler.finish_committed(job.chunk_id.transfer_index),
                    Ok(false) => ctx.scheduler.finish_failed(job.chunk_id.transfer_index),
                    Err(err) => {
                        ctx.logger.error(
                            Some(job.dst_path.as_str()),
                            &format!("checksum verification failed: {err}"),
                        );
                        ctx.scheduler.finish_committed(job.chunk_id.transfer_index)
                    }
                },
                Err(err) => {
                    ctx.logger
                        .error(Some(job.dst_path.as_str()), &format!("commit failed: {err}"));
                    let _ = ctx
                        .store
                        .abort(&job.dst_path, &upload_id.to_string())
                        .await;
                    ctx.scheduler.finish_failed(job.chunk_id.transfer_index)
                }
            }
        }
        CommitDecision::MarkFailed => ctx.scheduler.finish_failed(job.chunk_id.transfer_index),
        CommitDecision::MarkCancelled => {
            let _ = ctx
                .store
                .abort(&job.dst_path, &upload_id.to_string())
                .await;
            ctx.scheduler.finish_cancelled(job.chunk_id.transfer_index)
        }
    }
}

/// Once a transfer has committed, compare the destination object's content
/// MD5 against the source MD5 recorded at plan time, when both are known.
/// All-zero is the Plan Store's "unknown" sentinel (set when the Traverser
/// couldn't hash the source), so it is treated as unverifiable rather than a
/// mismatch.
///
/// Returns `Ok(true)` if the transfer should finish `Success`, `Ok(false)` if
/// a `FailIfDifferent` mismatch should finish it `Failed`.
async fn verify_checksum(ctx: &WorkerContext, job: &ChunkJob) -> eyre::Result<bool> {
    if ctx.check_md5 == CheckMd5Mode::NoCheck {
        return Ok(true);
    }

    let record = ctx.scheduler.plan().record(job.chunk_id.transfer_index)?;
    if record.md5 == [0u8; 16] {
        return Ok(true);
    }

    let props = ctx.store.stat(&job.dst_path).await?;
    let Some(dst_md5) = props.md5 else {
        return Ok(true);
    };

    if dst_md5 == record.md5 {
        return Ok(true);
    }

    let message = format!(
        "checksum mismatch: source {} != destination {}",
        hex(&record.md5),
        hex(&dst_md5)
    );
    match ctx.check_md5 {
        CheckMd5Mode::FailIfDifferent => {
            let err = TransferError::checksum_mismatch(message, Some(job.dst_path.clone()));
            ctx.logger.error(Some(job.dst_path.as_str()), &err.to_string());
            Ok(false)
        }
        CheckMd5Mode::LogOnly | CheckMd5Mode::NoCheck => {
            ctx.logger.error(Some(job.dst_path.as_str()), &message);
            ctx.checksum_warnings.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
