use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ste")]
#[command(about = "Scalable transfer engine")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Override the configuration directory for this invocation
    #[arg(long, global = true, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transfer files from a source tree into a destination tree
    Copy(CopyArgs),
    /// List known jobs, optionally filtered by status
    List(ListArgs),
    /// Show full detail for one job
    Status(JobIdArgs),
    /// Soft-cancel a running job: in-flight chunks finish, no new ones start
    Pause(JobIdArgs),
    /// Hard-cancel a running job
    Cancel(JobIdArgs),
    /// Resume a paused, cancelled, or interrupted job
    Resume(ResumeArgs),
    /// Delete a job's plan files and its registry entry
    Remove(JobIdArgs),
    /// Delete every job matching a status
    Clean(CleanArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CopyArgs {
    /// Source directory to read from
    pub source: PathBuf,
    /// Destination directory to write into
    pub destination: PathBuf,

    /// Overwrite existing destination files unconditionally
    #[arg(long)]
    pub overwrite: bool,
    /// Only overwrite a destination file if the source is strictly newer
    #[arg(long, conflicts_with = "overwrite")]
    pub if_source_newer: bool,
    /// Remove destination entries that no longer exist in the source
    #[arg(long)]
    pub mirror: bool,

    #[arg(long)]
    pub include: Vec<String>,
    #[arg(long)]
    pub exclude: Vec<String>,

    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long)]
    pub block_size: Option<u64>,
    /// Cap sustained throughput, in bytes/sec
    #[arg(long)]
    pub max_bytes_per_sec: Option<u64>,
    /// Post-transfer MD5 verification: no-check, log-only, or fail-if-different
    #[arg(long)]
    pub check_md5: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct JobIdArgs {
    pub job_id: String,
}

#[derive(Args, Clone, Debug)]
pub struct ResumeArgs {
    pub job_id: String,
    #[arg(long)]
    pub include: Vec<String>,
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct CleanArgs {
    pub status: String,
}
