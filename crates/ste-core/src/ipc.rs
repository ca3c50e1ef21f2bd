//! Wire schema shared by `ste-cli` and `ste-agent`: a Unix-domain-socket,
//! newline-delimited JSON transport carrying the six JobsAdmin operations.
//!
//! Generalized from a fixed tonic/prost request/response contract both
//! client and server compile against, down to this crate's simpler
//! admin-only surface — `serde`/`serde_json` already cover it without
//! pulling in a code-generated RPC stack.

use serde::{Deserialize, Serialize};

use crate::jobs_admin::{JobDetail, JobStatus};

/// Socket file name created under the plans directory, matching the
/// persisted-state layout `{plansDir}/pids/{pid}.pid` already uses for the
/// agent's exclusive lock.
pub const DEFAULT_SOCKET_NAME: &str = "ste-agent.sock";

pub fn default_socket_path(plans_dir: &std::path::Path) -> std::path::PathBuf {
    plans_dir.join(DEFAULT_SOCKET_NAME)
}

pub fn pidfile_path(plans_dir: &std::path::Path, pid: u32) -> std::path::PathBuf {
    plans_dir.join("pids").join(format!("{pid}.pid"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminRequest {
    ListJobs {
        filter_status: Option<JobStatus>,
    },
    GetJobDetails {
        job_id: String,
    },
    ResumeJob {
        job_id: String,
        include: Vec<String>,
        exclude: Vec<String>,
    },
    CancelJob {
        job_id: String,
    },
    PauseJob {
        job_id: String,
    },
    RemoveJob {
        job_id: String,
    },
    CleanJobs {
        status: JobStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminResponse {
    Jobs(Vec<JobDetail>),
    Job(JobDetail),
    Resumed {
        job_id: String,
        parts: usize,
        pending_transfers: u64,
    },
    Ok,
    Removed {
        count: usize,
    },
    Error(String),
}
