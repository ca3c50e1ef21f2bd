//! Progress & Status Aggregator: turns the Job Plan Store's per-transfer
//! state into a point-in-time snapshot (percent complete, throughput, ETA)
//! and two renderings of it.
//!
//! Grounded on a `print_summary`/`LocalMirrorSummary` throughput math
//! (`total_bytes / duration.as_secs_f64()`), generalized from a one-shot
//! terminal summary to a live, repeatedly-sampled snapshot driven by
//! `plan_store::PlanHandle::iterate` instead of an in-memory counter struct
//! threaded through the planner.

use std::time::{Duration, Instant};

use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::plan_store::{PlanHandle, TransferStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub part_num: u32,
    pub transfers_total: u64,
    pub transfers_done: u64,
    pub transfers_failed: u64,
    pub transfers_skipped: u64,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
    pub percent_complete: f64,
    pub throughput_bytes_per_sec: f64,
    pub eta_seconds: Option<u64>,
    pub elapsed_secs: f64,
}

/// Samples a single job part's `PlanHandle` against a fixed start time.
/// One `ProgressAggregator` per part; a multi-part job sums snapshots
/// across parts before rendering (see `sum`).
pub struct ProgressAggregator {
    plan: std::sync::Arc<PlanHandle>,
    started_at: Instant,
}

impl ProgressAggregator {
    pub fn new(plan: std::sync::Arc<PlanHandle>) -> Self {
        Self {
            plan,
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> Result<ProgressSnapshot> {
        let records = self.plan.iterate()?;
        let header = self.plan.header();

        let mut bytes_total = 0u64;
        let mut bytes_transferred = 0u64;
        let mut done = 0u64;
        let mut failed = 0u64;
        let mut skipped = 0u64;

        for record in &records {
            bytes_total = bytes_total.saturating_add(record.size);
            bytes_transferred = bytes_transferred.saturating_add(record.bytes_transferred);
            match record.status {
                TransferStatus::Success | TransferStatus::FolderCreated => done += 1,
                TransferStatus::Failed
                | TransferStatus::BlobAlreadyExistsFailure
                | TransferStatus::FileCreationFailure => failed += 1,
                TransferStatus::Skipped | TransferStatus::Cancelled => skipped += 1,
                TransferStatus::NotStarted | TransferStatus::Started => {}
            }
        }

        let elapsed = self.started_at.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let throughput = if elapsed_secs > 0.0 {
            bytes_transferred as f64 / elapsed_secs
        } else {
            0.0
        };
        let percent_complete = if bytes_total == 0 {
            if records.is_empty() { 100.0 } else { (done + failed + skipped) as f64 / records.len() as f64 * 100.0 }
        } else {
            (bytes_transferred as f64 / bytes_total as f64 * 100.0).min(100.0)
        };
        let eta_seconds = if throughput > 0.0 && bytes_transferred < bytes_total {
            Some(((bytes_total - bytes_transferred) as f64 / throughput).ceil() as u64)
        } else {
            None
        };

        Ok(ProgressSnapshot {
            job_id: header.job_id.to_string(),
            part_num: header.part_num,
            transfers_total: records.len() as u64,
            transfers_done: done,
            transfers_failed: failed,
            transfers_skipped: skipped,
            bytes_total,
            bytes_transferred,
            percent_complete,
            throughput_bytes_per_sec: throughput,
            eta_seconds,
            elapsed_secs,
        })
    }
}

/// Merge snapshots from every part of a job into one job-level total. ETA is
/// recomputed from the summed throughput rather than averaged per part.
pub fn sum(snapshots: &[ProgressSnapshot]) -> ProgressSnapshot {
    let mut total = ProgressSnapshot {
        job_id: snapshots
            .first()
            .map(|s| s.job_id.clone())
            .unwrap_or_default(),
        part_num: 0,
        transfers_total: 0,
        transfers_done: 0,
        transfers_failed: 0,
        transfers_skipped: 0,
        bytes_total: 0,
        bytes_transferred: 0,
        percent_complete: 0.0,
        throughput_bytes_per_sec: 0.0,
        eta_seconds: None,
        elapsed_secs: 0.0,
    };

    for s in snapshots {
        total.transfers_total += s.transfers_total;
        total.transfers_done += s.transfers_done;
        total.transfers_failed += s.transfers_failed;
        total.transfers_skipped += s.transfers_skipped;
        total.bytes_total = total.bytes_total.saturating_add(s.bytes_total);
        total.bytes_transferred = total.bytes_transferred.saturating_add(s.bytes_transferred);
        total.throughput_bytes_per_sec += s.throughput_bytes_per_sec;
        total.elapsed_secs = total.elapsed_secs.max(s.elapsed_secs);
    }

    total.percent_complete = if total.bytes_total == 0 {
        if total.transfers_total == 0 {
            100.0
        } else {
            (total.transfers_done + total.transfers_failed + total.transfers_skipped) as f64
                / total.transfers_total as f64
                * 100.0
        }
    } else {
        (total.bytes_transferred as f64 / total.bytes_total as f64 * 100.0).min(100.0)
    };

    total.eta_seconds = if total.throughput_bytes_per_sec > 0.0
        && total.bytes_transferred < total.bytes_total
    {
        Some(
            ((total.bytes_total - total.bytes_transferred) as f64 / total.throughput_bytes_per_sec)
                .ceil() as u64,
        )
    } else {
        None
    };

    total
}

/// Human-readable byte count, matching common CLI summary formatting.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

pub fn format_text(snap: &ProgressSnapshot) -> String {
    let eta = match snap.eta_seconds {
        Some(secs) => format!("{}", Duration::from_secs(secs).as_secs()),
        None => "unknown".to_string(),
    };
    format!(
        "{:.1}% complete ({} done, {} failed, {} skipped of {}) | {}/s | ETA {}s",
        snap.percent_complete,
        snap.transfers_done,
        snap.transfers_failed,
        snap.transfers_skipped,
        snap.transfers_total,
        format_bytes(snap.throughput_bytes_per_sec as u64),
        eta,
    )
}

pub fn format_json(snap: &ProgressSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snap)?)
}
