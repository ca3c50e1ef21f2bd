//! JobsAdmin: process-wide registry of active jobs, coordinating pause/
//! cancel/resume/list/remove for both in-process callers and whatever IPC
//! transport the host binary wires up.
//!
//! Grounded on the *shape* of `blit-daemon::service::core::BlitService` — a
//! small struct holding `Arc<Mutex<HashMap<String, ModuleConfig>>>` behind
//! which async handlers serialize access to shared state — generalized from
//! a module registry keyed by name to a job registry keyed by `JobId`, and
//! from `tokio::sync::Mutex` to `parking_lot::RwLock` since these operations
//! are synchronous once the lock is held (no `.await` inside the critical
//! section).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{bail, Result};
use globset::{Glob, GlobSetBuilder};
use parking_lot::RwLock;

use crate::job_id::JobId;
use crate::plan_store::{self, TransferStatus};
use crate::progress::{self, ProgressSnapshot};
use crate::resume;
use crate::scheduler::{CancelLevel, CancelToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    Running,
    Paused,
    Completed,
    /// Every transfer reached a terminal state, none failed, but at least
    /// one was `Skipped` (overwrite=false and destination already present,
    /// or excluded by a resume filter) rather than actually copied.
    CompletedWithSkips,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobDetail {
    pub job_id: String,
    pub command: String,
    pub status: JobStatus,
    pub transfer_totals: ProgressSnapshot,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

struct JobHandle {
    command: String,
    status: JobStatus,
    cancel: CancelToken,
    start_time: i64,
    end_time: Option<i64>,
}

/// Shared registry of every job this process knows about. One instance per
/// running agent; in-process callers and the IPC transport both go through
/// the same `Arc<JobsAdmin>`.
pub struct JobsAdmin {
    plans_dir: PathBuf,
    jobs: RwLock<HashMap<JobId, JobHandle>>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl JobsAdmin {
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a job that the orchestrator has just started. `cancel` must
    /// be the same `CancelToken` handed to that job's `Scheduler`, so pause/
    /// cancel here actually reach the running workers.
    pub fn register_job(&self, job_id: JobId, command: String, cancel: CancelToken) {
        self.jobs.write().insert(
            job_id,
            JobHandle {
                command,
                status: JobStatus::Running,
                cancel,
                start_time: now_unix(),
                end_time: None,
            },
        );
    }

    /// Scan the plans directory for jobs this process didn't itself start —
    /// typically every job still on disk when the agent restarts. Status is
    /// inferred from the parts' own terminal/non-terminal transfer counts;
    /// a job with any work left pending is reported `Paused` rather than
    /// `Running`, since nothing in this process is actually driving it until
    /// `resumeJob` is called.
    pub fn discover(&self) -> Result<usize> {
        let mut found = 0;
        for job_id in plan_store::list_job_ids(&self.plans_dir)? {
            if self.jobs.read().contains_key(&job_id) {
                continue;
            }
            let totals = self.snapshot_totals(job_id)?;
            let all_terminal = totals.transfers_done + totals.transfers_failed + totals.transfers_skipped
                == totals.transfers_total;
            let status = if totals.transfers_failed > 0 {
                JobStatus::Failed
            } else if all_terminal && totals.transfers_skipped > 0 {
                JobStatus::CompletedWithSkips
            } else if all_terminal {
                JobStatus::Completed
            } else {
                JobStatus::Paused
            };
            let terminal = matches!(
                status,
                JobStatus::Completed | JobStatus::CompletedWithSkips | JobStatus::Failed
            );
            self.jobs.write().insert(
                job_id,
                JobHandle {
                    command: String::new(),
                    status,
                    cancel: CancelToken::new(),
                    start_time: now_unix(),
                    end_time: if terminal { Some(now_unix()) } else { None },
                },
            );
            found += 1;
        }
        Ok(found)
    }

    /// Called by the orchestrator once every part of a job reaches a
    /// terminal outcome, so `listJobs`/`getJobDetails` report completion.
    pub fn mark_finished(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write();
        let handle = jobs
            .get_mut(&job_id)
            .ok_or_else(|| eyre::eyre!("unknown job {job_id}"))?;
        handle.status = status;
        handle.end_time = Some(now_unix());
        Ok(())
    }

    fn snapshot_totals(&self, job_id: JobId) -> Result<ProgressSnapshot> {
        let mut parts = Vec::new();
        for part_num in plan_store::list_parts(&self.plans_dir, job_id)? {
            let plan = std::sync::Arc::new(plan_store::PlanHandle::open(
                &self.plans_dir,
                job_id,
                part_num,
            )?);
            parts.push(progress::ProgressAggregator::new(plan).snapshot()?);
        }
        Ok(progress::sum(&parts))
    }

    pub fn get_job_details(&self, job_id: JobId) -> Result<JobDetail> {
        let jobs = self.jobs.read();
        let handle = jobs
            .get(&job_id)
            .ok_or_else(|| eyre::eyre!("unknown job {job_id}"))?;
        Ok(JobDetail {
            job_id: job_id.to_string(),
            command: handle.command.clone(),
            status: handle.status,
            transfer_totals: self.snapshot_totals(job_id)?,
            start_time: handle.start_time,
            end_time: handle.end_time,
        })
    }

    pub fn list_jobs(&self, filter_status: Option<JobStatus>) -> Result<Vec<JobDetail>> {
        let ids: Vec<JobId> = {
            let jobs = self.jobs.read();
            jobs.iter()
                .filter(|(_, h)| filter_status.map(|f| f == h.status).unwrap_or(true))
                .map(|(id, _)| *id)
                .collect()
        };
        ids.into_iter().map(|id| self.get_job_details(id)).collect()
    }

    /// Soft-cancel: lets chunks already in flight finish, stops dispatching
    /// new ones. The job can be resumed later exactly like a crash restart.
    pub fn pause_job(&self, job_id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write();
        let handle = jobs
            .get_mut(&job_id)
            .ok_or_else(|| eyre::eyre!("unknown job {job_id}"))?;
        handle.cancel.cancel(CancelLevel::Soft);
        handle.status = JobStatus::Paused;
        Ok(())
    }

    /// Hard-cancel: in-flight chunks are abandoned immediately.
    pub fn cancel_job(&self, job_id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write();
        let handle = jobs
            .get_mut(&job_id)
            .ok_or_else(|| eyre::eyre!("unknown job {job_id}"))?;
        handle.cancel.cancel(CancelLevel::Hard);
        handle.status = JobStatus::Cancelled;
        handle.end_time = Some(now_unix());
        Ok(())
    }

    /// Reconstructs scheduling state for `job_id` from its parts on disk,
    /// optionally narrowing which not-yet-terminal transfers get redone:
    /// anything failing `include` or matching `exclude` is marked `Skipped`
    /// instead of redispatched. Reuses the existing job id rather than
    /// minting a new one.
    pub fn resume_job(
        &self,
        job_id: JobId,
        include: &[String],
        exclude: &[String],
    ) -> Result<(JobId, Vec<resume::ResumedPart>)> {
        {
            let jobs = self.jobs.read();
            if let Some(handle) = jobs.get(&job_id) {
                if handle.status == JobStatus::Running {
                    bail!("job {job_id} is already running");
                }
            }
        }

        let include_set = compile_globs(include)?;
        let exclude_set = compile_globs(exclude)?;

        let mut resumed = resume::resume_job(&self.plans_dir, job_id)?;
        for part in &mut resumed {
            part.chunk_jobs.retain(|job| {
                let keep = include_set
                    .as_ref()
                    .map(|s| s.is_match(&job.src_path))
                    .unwrap_or(true)
                    && !exclude_set
                        .as_ref()
                        .map(|s| s.is_match(&job.src_path))
                        .unwrap_or(false);
                if !keep {
                    let _ = part.plan.set_status(
                        job.chunk_id.transfer_index,
                        TransferStatus::Skipped,
                    );
                }
                keep
            });
        }

        if let Some(handle) = self.jobs.write().get_mut(&job_id) {
            handle.status = JobStatus::Running;
            handle.end_time = None;
        }

        Ok((job_id, resumed))
    }

    /// Deletes every plan file belonging to `job_id` and drops it from the
    /// registry.
    pub fn remove_job(&self, job_id: JobId) -> Result<()> {
        plan_store::delete_job(&self.plans_dir, job_id)?;
        self.jobs.write().remove(&job_id);
        Ok(())
    }

    /// Removes every registered job matching `status`, except one currently
    /// `Running` — its log is kept regardless of the requested filter.
    pub fn clean_jobs(&self, status: JobStatus) -> Result<usize> {
        let targets: Vec<JobId> = {
            let jobs = self.jobs.read();
            jobs.iter()
                .filter(|(_, h)| h.status == status && h.status != JobStatus::Running)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &targets {
            self.remove_job(*id)?;
        }
        Ok(targets.len())
    }
}

fn compile_globs(patterns: &[String]) -> Result<Option<globset::GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p)?);
    }
    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_store::{EntityType, PartHeader, TransferEntry};

    fn make_job(dir: &Path) -> JobId {
        let job_id = JobId::new();
        let header = PartHeader {
            job_id,
            part_num: 0,
            from_to: 1,
            flags: 0,
            block_size: 4,
            suffix: vec![],
        };
        let transfers = vec![
            TransferEntry {
                src_path: "a.txt".into(),
                dst_path: "a.txt".into(),
                size: 10,
                lmt: 0,
                md5: [0u8; 16],
                entity_type: EntityType::File,
            },
            TransferEntry {
                src_path: "b.log".into(),
                dst_path: "b.log".into(),
                size: 10,
                lmt: 0,
                md5: [0u8; 16],
                entity_type: EntityType::File,
            },
        ];
        plan_store::PlanHandle::create(dir, header, &transfers).unwrap();
        job_id
    }

    #[test]
    fn registered_job_reports_running_status_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        admin.register_job(job_id, "copy a b".into(), CancelToken::new());

        let detail = admin.get_job_details(job_id).unwrap();
        assert_eq!(detail.status, JobStatus::Running);
        assert_eq!(detail.transfer_totals.transfers_total, 2);
    }

    #[test]
    fn pause_soft_cancels_the_shared_token() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        let token = CancelToken::new();
        admin.register_job(job_id, "copy".into(), token.clone());

        admin.pause_job(job_id).unwrap();
        assert_eq!(token.level(), CancelLevel::Soft);
        assert_eq!(admin.get_job_details(job_id).unwrap().status, JobStatus::Paused);
    }

    #[test]
    fn cancel_hard_cancels_and_stamps_end_time() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        let token = CancelToken::new();
        admin.register_job(job_id, "copy".into(), token.clone());

        admin.cancel_job(job_id).unwrap();
        assert_eq!(token.level(), CancelLevel::Hard);
        assert!(admin.get_job_details(job_id).unwrap().end_time.is_some());
    }

    #[test]
    fn list_jobs_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let running = make_job(dir.path());
        let cancelled = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        admin.register_job(running, "a".into(), CancelToken::new());
        admin.register_job(cancelled, "b".into(), CancelToken::new());
        admin.cancel_job(cancelled).unwrap();

        let only_running = admin.list_jobs(Some(JobStatus::Running)).unwrap();
        assert_eq!(only_running.len(), 1);
        assert_eq!(only_running[0].job_id, running.to_string());
    }

    #[test]
    fn remove_job_deletes_plan_files_and_registry_entry() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        admin.register_job(job_id, "copy".into(), CancelToken::new());

        admin.remove_job(job_id).unwrap();
        assert!(plan_store::list_parts(dir.path(), job_id).unwrap().is_empty());
        assert!(admin.get_job_details(job_id).is_err());
    }

    #[test]
    fn clean_jobs_preserves_a_currently_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let running = make_job(dir.path());
        let failed = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());
        admin.register_job(running, "a".into(), CancelToken::new());
        admin.register_job(failed, "b".into(), CancelToken::new());
        admin.mark_finished(failed, JobStatus::Failed).unwrap();

        // Even asking to clean Running jobs must never remove one in flight.
        let removed = admin.clean_jobs(JobStatus::Running).unwrap();
        assert_eq!(removed, 0);
        assert!(admin.get_job_details(running).is_ok());

        let removed = admin.clean_jobs(JobStatus::Failed).unwrap();
        assert_eq!(removed, 1);
        assert!(admin.get_job_details(failed).is_err());
    }

    #[test]
    fn discover_finds_unregistered_jobs_on_disk_and_infers_status() {
        let dir = tempfile::tempdir().unwrap();
        let done_job = make_job(dir.path());
        let plan = plan_store::PlanHandle::open(dir.path(), done_job, 0).unwrap();
        plan.set_status(0, TransferStatus::Started).unwrap();
        plan.set_status(0, TransferStatus::Success).unwrap();
        plan.set_status(1, TransferStatus::Started).unwrap();
        plan.set_status(1, TransferStatus::Success).unwrap();
        drop(plan);

        let pending_job = make_job(dir.path());

        let admin = JobsAdmin::new(dir.path());
        let found = admin.discover().unwrap();
        assert_eq!(found, 2);

        assert_eq!(
            admin.get_job_details(done_job).unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            admin.get_job_details(pending_job).unwrap().status,
            JobStatus::Paused
        );
    }

    #[test]
    fn resume_job_skips_transfers_excluded_by_filter() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = make_job(dir.path());
        let admin = JobsAdmin::new(dir.path());

        let (_, resumed) = admin
            .resume_job(job_id, &[], &["*.log".to_string()])
            .unwrap();
        assert_eq!(resumed.len(), 1);
        let paths: Vec<&str> = resumed[0]
            .chunk_jobs
            .iter()
            .map(|j| j.src_path.as_str())
            .collect();
        assert!(!paths.contains(&"b.log"));
        assert!(paths.contains(&"a.txt"));
    }
}
