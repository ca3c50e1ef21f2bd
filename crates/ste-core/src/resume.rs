//! Resume Controller: reconstructs in-memory scheduling state for a job that
//! already has parts on disk, so a restarted process can continue it.
//!
//! No durable plan existed to resume before this module, since the original
//! whole-file copy loop re-enumerates from scratch on every invocation.
//! Built directly against `plan_store`'s `open`/`iterate` contract and
//! `scheduler::Scheduler`'s "only `NotStarted` transfers get chunk jobs"
//! rule: any transfer still `Started` from an interrupted run is reset to
//! `NotStarted` before the Scheduler sees it, so it gets rechunked and
//! redone from offset 0.

use std::sync::Arc;

use eyre::Result;

use crate::job_id::JobId;
use crate::plan_store::{list_parts, PlanHandle, TransferStatus};
use crate::scheduler::{ChunkJob, Scheduler};

/// One reopened job part plus the chunk jobs ready to redispatch.
pub struct ResumedPart {
    pub plan: Arc<PlanHandle>,
    pub scheduler: Arc<Scheduler>,
    pub chunk_jobs: Vec<ChunkJob>,
}

/// Flip every transfer still sitting in `Started` back to `NotStarted`. Any
/// other terminal status (`Success`, `Failed`, `Skipped`, `Cancelled`,
/// `FolderCreated`, ...) is left untouched so a resumed run skips completed
/// work. Returns how many transfers were reset.
fn reset_in_flight_transfers(plan: &PlanHandle) -> Result<usize> {
    let records = plan.iterate()?;
    let mut reset = 0;
    for record in records {
        if record.status == TransferStatus::Started {
            plan.set_status(record.index, TransferStatus::NotStarted)?;
            reset += 1;
        }
    }
    Ok(reset)
}

/// Open every part of `job_id` in ascending part-number order, reset any
/// in-flight transfer back to `NotStarted`, and build a fresh `Scheduler`
/// plus its ready chunk jobs for each part.
pub fn resume_job(plans_dir: &std::path::Path, job_id: JobId) -> Result<Vec<ResumedPart>> {
    let mut part_nums = list_parts(plans_dir, job_id)?;
    part_nums.sort_unstable();

    let mut resumed = Vec::with_capacity(part_nums.len());
    for part_num in part_nums {
        let plan = Arc::new(PlanHandle::open(plans_dir, job_id, part_num)?);
        reset_in_flight_transfers(&plan)?;

        let block_size = plan.header().block_size;
        let scheduler = Arc::new(Scheduler::new(plan.clone(), block_size));
        let chunk_jobs = scheduler.start_ready_transfers()?;

        resumed.push(ResumedPart {
            plan,
            scheduler,
            chunk_jobs,
        });
    }

    Ok(resumed)
}

/// Total transfers still needing work (not yet in a terminal state) across
/// every part of a job, for the JobsAdmin status view.
pub fn pending_transfer_count(plans_dir: &std::path::Path, job_id: JobId) -> Result<u64> {
    let mut count = 0u64;
    for part_num in list_parts(plans_dir, job_id)? {
        let plan = PlanHandle::open(plans_dir, job_id, part_num)?;
        for record in plan.iterate()? {
            if !record.status.is_terminal() {
                count += 1;
            }
        }
    }
    Ok(count)
}
