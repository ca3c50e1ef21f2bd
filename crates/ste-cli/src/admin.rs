//! The admin verbs: `status`, `pause`, `cancel`, `resume`, `list`, `remove`,
//! `clean`. Each is a thin call into `ste_core::ipc` against whatever
//! `ste-agent` is listening on the configured plans directory's socket.

use eyre::{bail, Result};
use ste_core::ipc::AdminResponse;
use ste_core::jobs_admin::{JobDetail, JobStatus};

use crate::cli::{CleanArgs, JobIdArgs, ListArgs, ResumeArgs};
use crate::ipc_client;

fn parse_job_status(s: &str) -> Result<JobStatus> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "running" => JobStatus::Running,
        "paused" => JobStatus::Paused,
        "completed" => JobStatus::Completed,
        "completed-with-skips" | "completedwithskips" => JobStatus::CompletedWithSkips,
        "failed" => JobStatus::Failed,
        "cancelled" | "canceled" => JobStatus::Cancelled,
        other => bail!("unrecognised job status: {other}"),
    })
}

fn print_job(detail: &JobDetail) {
    println!(
        "{}  {:?}  {}  {:.1}%  ({}/{} transfers)",
        detail.job_id,
        detail.status,
        detail.command,
        detail.transfer_totals.percent_complete,
        detail.transfer_totals.transfers_done + detail.transfer_totals.transfers_failed,
        detail.transfer_totals.transfers_total,
    );
}

pub async fn run_list(plans_dir: &std::path::Path, args: &ListArgs) -> Result<()> {
    let filter_status = args.status.as_deref().map(parse_job_status).transpose()?;
    let response = ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::ListJobs { filter_status },
    )
    .await?;
    match response {
        AdminResponse::Jobs(jobs) => {
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in &jobs {
                print_job(job);
            }
        }
        other => bail!("unexpected agent response: {other:?}"),
    }
    Ok(())
}

pub async fn run_status(plans_dir: &std::path::Path, args: &JobIdArgs) -> Result<()> {
    let response = ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::GetJobDetails {
            job_id: args.job_id.clone(),
        },
    )
    .await?;
    match response {
        AdminResponse::Job(detail) => {
            print_job(&detail);
            println!("{}", ste_core::progress::format_text(&detail.transfer_totals));
        }
        other => bail!("unexpected agent response: {other:?}"),
    }
    Ok(())
}

pub async fn run_pause(plans_dir: &std::path::Path, args: &JobIdArgs) -> Result<()> {
    ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::PauseJob {
            job_id: args.job_id.clone(),
        },
    )
    .await?;
    println!("paused {}", args.job_id);
    Ok(())
}

pub async fn run_cancel(plans_dir: &std::path::Path, args: &JobIdArgs) -> Result<()> {
    ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::CancelJob {
            job_id: args.job_id.clone(),
        },
    )
    .await?;
    println!("cancelled {}", args.job_id);
    Ok(())
}

pub async fn run_resume(plans_dir: &std::path::Path, args: &ResumeArgs) -> Result<()> {
    let response = ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::ResumeJob {
            job_id: args.job_id.clone(),
            include: args.include.clone(),
            exclude: args.exclude.clone(),
        },
    )
    .await?;
    match response {
        AdminResponse::Resumed {
            job_id,
            parts,
            pending_transfers,
        } => {
            println!("resumed {job_id}: {parts} part(s), {pending_transfers} transfer(s) pending");
        }
        other => bail!("unexpected agent response: {other:?}"),
    }
    Ok(())
}

pub async fn run_remove(plans_dir: &std::path::Path, args: &JobIdArgs) -> Result<()> {
    ipc_client::call(
        plans_dir,
        ste_core::ipc::AdminRequest::RemoveJob {
            job_id: args.job_id.clone(),
        },
    )
    .await?;
    println!("removed {}", args.job_id);
    Ok(())
}

pub async fn run_clean(plans_dir: &std::path::Path, args: &CleanArgs) -> Result<()> {
    let status = parse_job_status(&args.status)?;
    let response =
        ipc_client::call(plans_dir, ste_core::ipc::AdminRequest::CleanJobs { status }).await?;
    match response {
        AdminResponse::Removed { count } => println!("removed {count} job(s)"),
        other => bail!("unexpected agent response: {other:?}"),
    }
    Ok(())
}
