//! Enumerator/Planner: pairs source and destination traversers, decides a
//! transfer/skip/delete outcome per object, and packs the result into job
//! parts.
//!
//! Grounded on a `MirrorPlanner`-style decision logic (size/mtime/checksum
//! comparison with a mtime tolerance, dest-minus-source set difference for
//! deletions) and a compare-mode matrix, generalized from "local mirror
//! only" to the full overwrite-policy table and to producing
//! `plan_store::TransferEntry` rows instead of an in-memory `Plan`.

use std::collections::HashMap;

use crate::plan_store::{TransferEntry, MAX_TRANSFERS_PER_PART};
use crate::traverser::{EntityKind, StoredObject};

/// mtime comparisons tolerate a small skew, the same margin a `MirrorPlanner`
/// applies between a local clock and a remote service's.
const MTIME_TOLERANCE_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    True,
    False,
    IfSourceNewer,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    Yes,
    No,
    YesAll,
    NoAll,
}

/// Delivers an overwrite-prompt query to the external collaborator and
/// returns its decision. A prompter that times out must return `No`.
pub trait OverwritePrompter {
    fn ask(&mut self, relative_path: &str) -> PromptDecision;
}

/// What the destination traverser already found at a given relative path.
#[derive(Debug, Clone)]
pub struct DestInfo {
    pub size: u64,
    pub lmt: i64,
    pub md5: Option<[u8; 16]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    Transfer,
    Skip,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PlannedTransfer {
    pub relative_path: String,
    pub size: u64,
    pub lmt: i64,
    pub md5: [u8; 16],
    pub entity_type: EntityKind,
}

#[derive(Debug, Clone, Default)]
pub struct PlannedJob {
    pub transfers: Vec<PlannedTransfer>,
    pub skipped: Vec<String>,
    pub deletions: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub overwrite: OverwritePolicy,
    pub delete_destination: bool,
}

/// Decide per-object outcome. `YesAll`/`NoAll` from a `Prompt` decision are
/// the prompter's own responsibility to remember across calls — this
/// function only consults it once per object.
pub fn decide(
    src: &StoredObject,
    dest: Option<&DestInfo>,
    opts: PlannerOptions,
    prompter: Option<&mut dyn OverwritePrompter>,
) -> PlanDecision {
    match dest {
        None => PlanDecision::Transfer,
        Some(dest_info) => match opts.overwrite {
            OverwritePolicy::True => PlanDecision::Transfer,
            OverwritePolicy::False => PlanDecision::Skip,
            OverwritePolicy::IfSourceNewer => {
                if src.lmt > dest_info.lmt + MTIME_TOLERANCE_SECS {
                    PlanDecision::Transfer
                } else {
                    PlanDecision::Skip
                }
            }
            OverwritePolicy::Prompt => match prompter {
                Some(p) => match p.ask(&src.relative_path) {
                    PromptDecision::Yes | PromptDecision::YesAll => PlanDecision::Transfer,
                    PromptDecision::No | PromptDecision::NoAll => PlanDecision::Skip,
                },
                None => PlanDecision::Skip,
            },
        },
    }
}

/// Pair a source enumeration against a destination index, computing the
/// per-object plan. `dest_index` keys are relative paths exactly as the
/// destination traverser emitted them.
pub fn plan_job(
    sources: &[StoredObject],
    dest_index: &HashMap<String, DestInfo>,
    opts: PlannerOptions,
    mut prompter: Option<&mut dyn OverwritePrompter>,
) -> PlannedJob {
    let mut job = PlannedJob::default();

    for src in sources {
        let dest = dest_index.get(&src.relative_path);
        match decide(src, dest, opts, prompter.as_deref_mut()) {
            PlanDecision::Transfer => job.transfers.push(PlannedTransfer {
                relative_path: src.relative_path.clone(),
                size: src.size,
                lmt: src.lmt,
                md5: src.md5.unwrap_or([0u8; 16]),
                entity_type: src.kind,
            }),
            PlanDecision::Skip => job.skipped.push(src.relative_path.clone()),
            PlanDecision::Delete => job.deletions.push(src.relative_path.clone()),
        }
    }

    if opts.delete_destination {
        let source_paths: std::collections::HashSet<&str> =
            sources.iter().map(|s| s.relative_path.as_str()).collect();
        let mut extra: Vec<&String> = dest_index
            .keys()
            .filter(|p| !source_paths.contains(p.as_str()))
            .collect();
        extra.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
        job.deletions
            .extend(extra.into_iter().map(|p| p.to_string()));
    }

    job
}

fn entity_type_to_store(kind: EntityKind) -> crate::plan_store::EntityType {
    match kind {
        EntityKind::File => crate::plan_store::EntityType::File,
        EntityKind::Folder => crate::plan_store::EntityType::Folder,
        EntityKind::Symlink => crate::plan_store::EntityType::Symlink,
    }
}

/// Pack scheduled transfers into `MAX_TRANSFERS_PER_PART`-capped chunks,
/// ready to hand to `plan_store::PlanHandle::create`. The last chunk carries
/// `is_final = true`.
pub fn pack_into_parts(transfers: &[PlannedTransfer]) -> Vec<(Vec<TransferEntry>, bool)> {
    if transfers.is_empty() {
        return vec![(Vec::new(), true)];
    }
    let cap = MAX_TRANSFERS_PER_PART as usize;
    let chunks: Vec<&[PlannedTransfer]> = transfers.chunks(cap).collect();
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let entries = chunk
                .iter()
                .map(|t| TransferEntry {
                    src_path: t.relative_path.clone(),
                    dst_path: t.relative_path.clone(),
                    size: t.size,
                    lmt: t.lmt,
                    md5: t.md5,
                    entity_type: entity_type_to_store(t.entity_type),
                })
                .collect();
            (entries, i + 1 == total)
        })
        .collect()
}
