//! Maps a finished job's outcome to the CLI's process exit code contract:
//! `0` success, `1` success-with-skipped, `2` success-with-errors, `3`
//! failed, `4` cancelled. `checksum_warnings` is orthogonal to `JobStatus`
//! (a log-only checksum mismatch leaves the transfer `Success`), so it is
//! threaded through separately rather than folded into a new status.
//!
//! Priority when more than one condition holds: a hard failure always wins,
//! then cancellation, then a checksum warning outranks a plain skip since it
//! points at data that may not match the source.

use ste_core::jobs_admin::JobStatus;

pub fn exit_code(status: JobStatus, checksum_warnings: u64) -> i32 {
    match status {
        JobStatus::Failed => 3,
        JobStatus::Cancelled => 4,
        _ if checksum_warnings > 0 => 2,
        JobStatus::CompletedWithSkips => 1,
        _ => 0,
    }
}
