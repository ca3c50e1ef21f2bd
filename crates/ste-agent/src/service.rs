//! Admin RPC service: accepts one JSON `AdminRequest` line per connection
//! over a Unix-domain socket and replies with one JSON `AdminResponse` line.
//! `resumeJob` additionally drives the resumed parts to completion on a
//! spawned background task, since the RPC caller only wants an
//! acknowledgement, not to block on the whole transfer.
//!
//! Grounded on `blit-daemon::service::core::BlitService`'s `impl Blit for
//! BlitService` shape (one async handler per RPC, sharing `Arc` state with
//! spawned work) - generalized from tonic's generated trait to a
//! newline-delimited JSON loop since there is no gRPC schema for this verb
//! set.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use eyre::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use ste_core::buffer::BufferPool;
use ste_core::config;
use ste_core::ipc::{AdminRequest, AdminResponse};
use ste_core::job_id::JobId;
use ste_core::jobs_admin::JobsAdmin;
use ste_core::logger::{FileLogger, Logger};
use ste_core::pacer::Pacer;
use ste_core::plan_store::JobRoots;
use ste_core::remote_store::{LocalFsStore, RemoteObjectStore};
use ste_core::resume::ResumedPart;
use ste_core::worker::{self, RetryPolicy, WorkerContext};

pub async fn serve(admin: Arc<JobsAdmin>, socket_path: PathBuf) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    log::info!("listening on {}", socket_path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let admin = admin.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(admin, stream).await {
                log::error!("connection error: {err}");
            }
        });
    }
}

async fn handle_connection(admin: Arc<JobsAdmin>, stream: UnixStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<AdminRequest>(line.trim_end()) {
        Ok(request) => dispatch(&admin, request).await,
        Err(err) => AdminResponse::Error(format!("malformed request: {err}")),
    };

    let mut out = serde_json::to_string(&response)?;
    out.push('\n');
    write_half.write_all(out.as_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}

async fn dispatch(admin: &Arc<JobsAdmin>, request: AdminRequest) -> AdminResponse {
    match request {
        AdminRequest::ListJobs { filter_status } => match admin.list_jobs(filter_status) {
            Ok(jobs) => AdminResponse::Jobs(jobs),
            Err(err) => AdminResponse::Error(err.to_string()),
        },
        AdminRequest::GetJobDetails { job_id } => match parse_job_id(&job_id) {
            Ok(id) => match admin.get_job_details(id) {
                Ok(detail) => AdminResponse::Job(detail),
                Err(err) => AdminResponse::Error(err.to_string()),
            },
            Err(err) => AdminResponse::Error(err),
        },
        AdminRequest::PauseJob { job_id } => match parse_job_id(&job_id) {
            Ok(id) => match admin.pause_job(id) {
                Ok(()) => AdminResponse::Ok,
                Err(err) => AdminResponse::Error(err.to_string()),
            },
            Err(err) => AdminResponse::Error(err),
        },
        AdminRequest::CancelJob { job_id } => match parse_job_id(&job_id) {
            Ok(id) => match admin.cancel_job(id) {
                Ok(()) => AdminResponse::Ok,
                Err(err) => AdminResponse::Error(err.to_string()),
            },
            Err(err) => AdminResponse::Error(err),
        },
        AdminRequest::RemoveJob { job_id } => match parse_job_id(&job_id) {
            Ok(id) => match admin.remove_job(id) {
                Ok(()) => AdminResponse::Ok,
                Err(err) => AdminResponse::Error(err.to_string()),
            },
            Err(err) => AdminResponse::Error(err),
        },
        AdminRequest::CleanJobs { status } => match admin.clean_jobs(status) {
            Ok(count) => AdminResponse::Removed { count },
            Err(err) => AdminResponse::Error(err.to_string()),
        },
        AdminRequest::ResumeJob {
            job_id,
            include,
            exclude,
        } => match parse_job_id(&job_id) {
            Ok(id) => match admin.resume_job(id, &include, &exclude) {
                Ok((job_id, resumed)) => {
                    let pending_transfers: u64 = resumed
                        .iter()
                        .map(|part| part.chunk_jobs.len() as u64)
                        .sum();
                    let parts = resumed.len();
                    let admin = admin.clone();
                    tokio::spawn(async move {
                        if let Err(err) = drive_resumed(admin, job_id, resumed).await {
                            log::error!("job {job_id} failed to resume: {err}");
                        }
                    });
                    AdminResponse::Resumed {
                        job_id: job_id.to_string(),
                        parts,
                        pending_transfers,
                    }
                }
                Err(err) => AdminResponse::Error(err.to_string()),
            },
            Err(err) => AdminResponse::Error(err),
        },
    }
}

fn parse_job_id(s: &str) -> Result<JobId, String> {
    JobId::from_str(s).map_err(|e| e.to_string())
}

/// Runs every resumed part's chunk jobs to completion through a fresh
/// Worker Pool, in ascending part order, then marks the job finished.
/// The source/destination roots are recovered from the `JobRoots` each
/// part's header carries in its suffix bytes.
async fn drive_resumed(
    admin: Arc<JobsAdmin>,
    job_id: JobId,
    resumed: Vec<ResumedPart>,
) -> Result<()> {
    let logs_dir = config::logs_dir()?;
    let concurrency = config::concurrency();
    let logger: Arc<dyn Logger> = Arc::new(FileLogger::open(&logs_dir, job_id)?);
    let pacer = Arc::new(Pacer::unlimited());
    let check_md5 = config::check_md5_mode();
    let checksum_warnings = Arc::new(AtomicU64::new(0));

    let mut any_failed = false;
    let mut any_skipped = false;
    for part in resumed {
        let roots = JobRoots::decode(&part.plan.header().suffix);
        let (src_root, dst_root) = match roots {
            Some(roots) => (roots.src_root, roots.dst_root),
            None => {
                log::error!("job {job_id} part {}: missing roots, skipping", part.plan.header().part_num);
                any_failed = true;
                continue;
            }
        };

        let store: Arc<dyn RemoteObjectStore> = Arc::new(LocalFsStore::new(dst_root));
        let buffers = Arc::new(BufferPool::new(
            part.plan.header().block_size as usize,
            concurrency * 2,
            Some(config::buffer_memory_budget_bytes() as usize),
        ));
        let ctx = Arc::new(WorkerContext {
            src_root,
            store,
            pacer: pacer.clone(),
            buffers,
            scheduler: part.scheduler.clone(),
            logger: logger.clone(),
            retry: RetryPolicy::default(),
            check_md5,
            checksum_warnings: checksum_warnings.clone(),
        });

        let (tx, rx) = tokio::sync::mpsc::channel(part.chunk_jobs.len().max(1));
        for job in part.chunk_jobs {
            let _ = tx.send(job).await;
        }
        drop(tx);

        let handles = worker::spawn_workers(ctx, rx, concurrency).await;
        for handle in handles {
            handle.await?;
        }

        let totals = ste_core::progress::ProgressAggregator::new(part.plan).snapshot()?;
        if totals.transfers_failed > 0 {
            any_failed = true;
        }
        if totals.transfers_skipped > 0 {
            any_skipped = true;
        }
    }

    let final_status = if any_failed {
        ste_core::jobs_admin::JobStatus::Failed
    } else if any_skipped {
        ste_core::jobs_admin::JobStatus::CompletedWithSkips
    } else {
        ste_core::jobs_admin::JobStatus::Completed
    };
    admin.mark_finished(job_id, final_status)?;
    Ok(())
}
