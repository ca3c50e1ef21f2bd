//! The `copy` verb: builds a plan in-process, drives the Scheduler and
//! Worker Pool directly against the local filesystem, and registers the job
//! with a throwaway `JobsAdmin` purely so this invocation's own status line
//! is consistent with what `ste status`/`ste list` would report once an
//! agent picks up the plan files left behind on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use tokio::sync::mpsc;

use ste_core::buffer::BufferPool;
use ste_core::config;
use ste_core::filter::FilterPipeline;
use ste_core::job_id::JobId;
use ste_core::jobs_admin::{JobsAdmin, JobStatus};
use ste_core::logger::{FileLogger, Logger};
use ste_core::pacer::Pacer;
use ste_core::plan_store::{JobRoots, PartHeader, PlanHandle};
use ste_core::planner::{self, DestInfo, OverwritePolicy, PlannerOptions};
use ste_core::progress::{self, ProgressAggregator};
use ste_core::remote_store::{LocalFsStore, RemoteObjectStore};
use ste_core::scheduler::Scheduler;
use ste_core::traverser::{LocalTraverser, StoredObject};
use ste_core::worker::{self, RetryPolicy, WorkerContext};

use crate::cli::CopyArgs;
use crate::exit_code;

pub async fn run_copy(args: &CopyArgs) -> Result<i32> {
    if !args.source.exists() {
        bail!("source path does not exist: {}", args.source.display());
    }

    let plans_dir = config::plans_dir()?;
    let logs_dir = config::logs_dir()?;
    let job_id = JobId::new();

    let mut filter = FilterPipeline {
        include_patterns: args.include.clone(),
        exclude_patterns: args.exclude.clone(),
        ..Default::default()
    };
    filter.compile()?;

    let mut sources = Vec::new();
    LocalTraverser::new(args.source.clone()).walk(&mut |obj: StoredObject| {
        if filter.matches(&obj) {
            sources.push(obj);
        }
        Ok(())
    })?;

    let mut dest_index: HashMap<String, DestInfo> = HashMap::new();
    if args.destination.exists() {
        LocalTraverser::new(args.destination.clone()).walk(&mut |obj: StoredObject| {
            dest_index.insert(
                obj.relative_path.clone(),
                DestInfo {
                    size: obj.size,
                    lmt: obj.lmt,
                    md5: obj.md5,
                },
            );
            Ok(())
        })?;
    }

    let overwrite = if args.overwrite {
        OverwritePolicy::True
    } else if args.if_source_newer {
        OverwritePolicy::IfSourceNewer
    } else {
        OverwritePolicy::False
    };
    let planned = planner::plan_job(
        &sources,
        &dest_index,
        PlannerOptions {
            overwrite,
            delete_destination: args.mirror,
        },
        None,
    );

    println!(
        "{} to transfer, {} skipped, {} to delete",
        planned.transfers.len(),
        planned.skipped.len(),
        planned.deletions.len()
    );

    if args.dry_run {
        for t in &planned.transfers {
            println!("would transfer: {}", t.relative_path);
        }
        for d in &planned.deletions {
            println!("would delete: {d}");
        }
        return Ok(0);
    }

    std::fs::create_dir_all(&args.destination)?;
    for d in &planned.deletions {
        let path = args.destination.join(d);
        if path.is_dir() {
            let _ = std::fs::remove_dir(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }

    let block_size = args.block_size.unwrap_or(8 * 1024 * 1024);
    let concurrency = args.concurrency.unwrap_or_else(config::concurrency);
    let check_md5 = match &args.check_md5 {
        Some(raw) => config::parse_check_md5_mode(raw)
            .ok_or_else(|| eyre::eyre!("unrecognised --check-md5 value: {raw}"))?,
        None => config::check_md5_mode(),
    };
    let roots = JobRoots {
        src_root: args.source.clone(),
        dst_root: args.destination.clone(),
    }
    .encode();

    let parts = planner::pack_into_parts(&planned.transfers);
    let logger: Arc<dyn Logger> = Arc::new(FileLogger::open(&logs_dir, job_id)?);
    let store: Arc<dyn RemoteObjectStore> = Arc::new(LocalFsStore::new(args.destination.clone()));
    let pacer = Arc::new(match args.max_bytes_per_sec {
        Some(n) => Pacer::new(Some(n), None),
        None => Pacer::unlimited(),
    });
    let buffers = Arc::new(BufferPool::new(
        block_size as usize,
        concurrency * 2,
        Some(config::buffer_memory_budget_bytes() as usize),
    ));

    let admin = JobsAdmin::new(&plans_dir);
    let mut snapshots = Vec::new();
    let checksum_warnings = Arc::new(AtomicU64::new(0));

    for (part_num, (entries, _is_final)) in parts.iter().enumerate() {
        let header = PartHeader {
            job_id,
            part_num: part_num as u32,
            from_to: 1,
            flags: 0,
            block_size,
            suffix: roots.clone(),
        };
        let plan = Arc::new(PlanHandle::create(&plans_dir, header, entries)?);
        let scheduler = Arc::new(Scheduler::new(plan.clone(), block_size));
        if part_num == 0 {
            admin.register_job(
                job_id,
                format!(
                    "copy {} {}",
                    args.source.display(),
                    args.destination.display()
                ),
                scheduler.cancel_token(),
            );
        }

        let jobs = scheduler.start_ready_transfers()?;
        let (tx, rx) = mpsc::channel(jobs.len().max(1));
        for job in jobs {
            let _ = tx.send(job).await;
        }
        drop(tx);

        let ctx = Arc::new(WorkerContext {
            src_root: args.source.clone(),
            store: store.clone(),
            pacer: pacer.clone(),
            buffers: buffers.clone(),
            scheduler: scheduler.clone(),
            logger: logger.clone(),
            retry: RetryPolicy::default(),
            check_md5,
            checksum_warnings: checksum_warnings.clone(),
        });
        let handles = worker::spawn_workers(ctx, rx, concurrency).await;
        for handle in handles {
            handle.await?;
        }

        snapshots.push(ProgressAggregator::new(plan).snapshot()?);
    }

    let total = progress::sum(&snapshots);
    let final_status = if total.transfers_failed > 0 {
        JobStatus::Failed
    } else if total.transfers_skipped > 0 {
        JobStatus::CompletedWithSkips
    } else {
        JobStatus::Completed
    };
    admin.mark_finished(job_id, final_status)?;

    println!("{}", progress::format_text(&total));
    println!("job id: {job_id}");
    Ok(exit_code::exit_code(
        final_status,
        checksum_warnings.load(Ordering::Relaxed),
    ))
}
