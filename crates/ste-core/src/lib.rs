pub mod buffer;
pub mod checksum;
pub mod config;
pub mod errors;
pub mod filter;
pub mod ipc;
pub mod job_id;
pub mod jobs_admin;
pub mod logger;
pub mod pacer;
pub mod plan_store;
pub mod planner;
pub mod progress;
pub mod remote_store;
pub mod resume;
pub mod scheduler;
pub mod traverser;
pub mod worker;

/// Request shape for a Scheduler/Worker Pool driven transfer.
#[derive(Clone)]
pub struct TransferRequest {
    pub concurrency: usize,
    pub block_size: u64,
    pub preserve_times: bool,
    pub dry_run: bool,
    pub checksum: Option<crate::checksum::ChecksumType>,
}

impl Default for TransferRequest {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            block_size: 8 * 1024 * 1024,
            preserve_times: true,
            dry_run: false,
            checksum: None,
        }
    }
}
