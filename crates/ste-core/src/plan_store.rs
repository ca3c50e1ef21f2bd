//! Durable, memory-mapped, append-only store of job parts.
//!
//! Each job part lives in its own file, named `{jobID}--{partNumber}.steV{PLAN_FORMAT_VERSION}`,
//! in the configured plans directory (see `crate::config::plans_dir`). The file
//! layout, in order, is: a fixed-size header, a variable-length header-suffix
//! blob (root descriptors and job options), a fixed-stride transfer table, and
//! a trailing variable-length area of path strings referenced by the table's
//! offset+length pairs. `status` and `bytesTransferred` are the only fields
//! mutated after the part is created, and both are placed at the front of
//! each stride so that `table_start + i * ENTRY_STRIDE` stays 8-byte aligned,
//! which lets `bytesTransferred` be addressed as a native `AtomicU64`.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use eyre::{bail, eyre, Context, Result};
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::job_id::JobId;

/// Source/destination roots for a job, JSON-encoded into `PartHeader::suffix`
/// so a later `resume`/agent-restart can reconstruct absolute paths without
/// the original command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRoots {
    pub src_root: PathBuf,
    pub dst_root: PathBuf,
}

impl JobRoots {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        serde_json::from_slice(bytes).ok()
    }
}

pub const PLAN_FORMAT_VERSION: u32 = 1;
pub const MAGIC: [u8; 4] = *b"AZCP";

/// Cap on transfer-table rows per job part; the Enumerator/Planner packs
/// scheduled transfers into parts no larger than this.
pub const MAX_TRANSFERS_PER_PART: u32 = 10_000;

const HEADER_FIXED_SIZE: usize = 56;
const ENTRY_STRIDE: usize = 64;
const MD5_LEN: usize = 16;

/// Sentinel status byte for a table entry whose bytes were never written by
/// `create` (only possible if a part file is truncated mid-write).
const STATUS_UNWRITTEN: u8 = 0xFF;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Per-transfer lifecycle. Terminal states never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    NotStarted,
    Started,
    Success,
    Failed,
    Skipped,
    Cancelled,
    FolderCreated,
    BlobAlreadyExistsFailure,
    FileCreationFailure,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Cancelled | Self::FolderCreated
        )
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Started => 1,
            Self::Success => 2,
            Self::Failed => 3,
            Self::Skipped => 4,
            Self::Cancelled => 5,
            Self::FolderCreated => 6,
            Self::BlobAlreadyExistsFailure => 7,
            Self::FileCreationFailure => 8,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::Success,
            3 => Self::Failed,
            4 => Self::Skipped,
            5 => Self::Cancelled,
            6 => Self::FolderCreated,
            7 => Self::BlobAlreadyExistsFailure,
            8 => Self::FileCreationFailure,
            other => bail!("unrecognised transfer status byte {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    File,
    Folder,
    Symlink,
}

impl EntityType {
    fn to_byte(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Folder => 1,
            Self::Symlink => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::File,
            1 => Self::Folder,
            2 => Self::Symlink,
            other => bail!("unrecognised entity type byte {other}"),
        })
    }
}

/// Header fields, immutable once the part file is created.
#[derive(Debug, Clone)]
pub struct PartHeader {
    pub job_id: JobId,
    pub part_num: u32,
    pub from_to: u32,
    pub flags: u32,
    pub block_size: u64,
    /// Root descriptors and job options, opaque to the store.
    pub suffix: Vec<u8>,
}

/// One row to be written into a new part's transfer table.
#[derive(Debug, Clone)]
pub struct TransferEntry {
    pub src_path: String,
    pub dst_path: String,
    pub size: u64,
    pub lmt: i64,
    pub md5: [u8; MD5_LEN],
    pub entity_type: EntityType,
}

/// A decoded, read-only view of a table row, for iteration.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub index: u32,
    pub src_path: String,
    pub dst_path: String,
    pub size: u64,
    pub lmt: i64,
    pub md5: [u8; MD5_LEN],
    pub entity_type: EntityType,
    pub status: TransferStatus,
    pub error_code: i32,
    pub retry_count: u16,
    pub bytes_transferred: u64,
}

pub fn part_file_name(job_id: JobId, part_num: u32) -> String {
    format!("{job_id}--{part_num}.steV{PLAN_FORMAT_VERSION}")
}

pub fn part_file_path(plans_dir: &Path, job_id: JobId, part_num: u32) -> PathBuf {
    plans_dir.join(part_file_name(job_id, part_num))
}

/// A memory-mapped, open job part.
pub struct PlanHandle {
    mmap: MmapMut,
    header: PartHeader,
    transfer_count: u32,
    table_start: usize,
    path: PathBuf,
}

impl PlanHandle {
    /// Create a new part file and map it read/write.
    ///
    /// Fails with a `PlanAlreadyExists`-flavoured error if the file exists and
    /// its header does not match `header`/`transfers` exactly.
    pub fn create(
        plans_dir: &Path,
        header: PartHeader,
        transfers: &[TransferEntry],
    ) -> Result<Self> {
        std::fs::create_dir_all(plans_dir)
            .with_context(|| format!("create plans dir {}", plans_dir.display()))?;
        let path = part_file_path(plans_dir, header.job_id, header.part_num);

        if path.exists() {
            let existing = Self::open(plans_dir, header.job_id, header.part_num)
                .with_context(|| format!("re-opening existing part {}", path.display()))?;
            if existing.header.from_to == header.from_to
                && existing.header.block_size == header.block_size
                && existing.header.suffix == header.suffix
                && existing.transfer_count as usize == transfers.len()
            {
                return Ok(existing);
            }
            bail!(
                "PlanAlreadyExists: part file {} exists with a non-matching header",
                path.display()
            );
        }

        let transfer_count: u32 = transfers
            .len()
            .try_into()
            .context("too many transfers for a single part")?;
        let header_suffix_len: u32 = header
            .suffix
            .len()
            .try_into()
            .context("header suffix too large")?;
        let table_start = align8(HEADER_FIXED_SIZE + header.suffix.len());

        let mut suffix_area = Vec::new();
        let mut table = Vec::with_capacity(transfers.len() * ENTRY_STRIDE);
        for entry in transfers {
            let src_offset = suffix_area.len() as u32;
            suffix_area.extend_from_slice(entry.src_path.as_bytes());
            let src_len: u16 = entry
                .src_path
                .len()
                .try_into()
                .context("source relative path too long")?;

            let dst_offset = suffix_area.len() as u32;
            suffix_area.extend_from_slice(entry.dst_path.as_bytes());
            let dst_len: u16 = entry
                .dst_path
                .len()
                .try_into()
                .context("destination relative path too long")?;

            let mut row = [0u8; ENTRY_STRIDE];
            row[0..8].copy_from_slice(&0u64.to_le_bytes()); // bytesTransferred
            row[8..16].copy_from_slice(&entry.size.to_le_bytes());
            row[16..24].copy_from_slice(&entry.lmt.to_le_bytes());
            row[24..40].copy_from_slice(&entry.md5);
            row[40..44].copy_from_slice(&src_offset.to_le_bytes());
            row[44..46].copy_from_slice(&src_len.to_le_bytes());
            row[46..50].copy_from_slice(&dst_offset.to_le_bytes());
            row[50..52].copy_from_slice(&dst_len.to_le_bytes());
            row[52..56].copy_from_slice(&0i32.to_le_bytes()); // errorCode
            row[56..58].copy_from_slice(&0u16.to_le_bytes()); // retryCount
            row[58] = entry.entity_type.to_byte();
            row[59] = TransferStatus::NotStarted.to_byte();
            table.extend_from_slice(&row);
        }

        let total_len = table_start + table.len() + suffix_area.len();
        let mut buf = vec![0u8; total_len];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&PLAN_FORMAT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&header.job_id.high().to_le_bytes());
        buf[16..24].copy_from_slice(&header.job_id.low().to_le_bytes());
        buf[24..28].copy_from_slice(&header.part_num.to_le_bytes());
        buf[28..32].copy_from_slice(&header.from_to.to_le_bytes());
        buf[32..36].copy_from_slice(&transfer_count.to_le_bytes());
        buf[36..40].copy_from_slice(&header.flags.to_le_bytes());
        buf[40..48].copy_from_slice(&header.block_size.to_le_bytes());
        buf[48..52].copy_from_slice(&header_suffix_len.to_le_bytes());
        buf[52..56].copy_from_slice(&[0u8; 4]); // reserved
        buf[HEADER_FIXED_SIZE..HEADER_FIXED_SIZE + header.suffix.len()]
            .copy_from_slice(&header.suffix);
        buf[table_start..table_start + table.len()].copy_from_slice(&table);
        buf[table_start + table.len()..].copy_from_slice(&suffix_area);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create part file {}", path.display()))?;
        file.write_all(&buf)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        Self::open(plans_dir, header.job_id, header.part_num)
    }

    /// Map an existing part file.
    pub fn open(plans_dir: &Path, job_id: JobId, part_num: u32) -> Result<Self> {
        let path = part_file_path(plans_dir, job_id, part_num);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open part file {}", path.display()))?;
        let file_len = file.metadata()?.len() as usize;

        let mut fixed = [0u8; HEADER_FIXED_SIZE];
        file.read_exact(&mut fixed)
            .with_context(|| format!("truncated header in {}", path.display()))?;
        if fixed[0..4] != MAGIC {
            bail!("not a job plan file: {}", path.display());
        }
        let version = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
        if version != PLAN_FORMAT_VERSION {
            bail!(
                "IncompatiblePlanFormat: {} has version {version}, expected {PLAN_FORMAT_VERSION}",
                path.display()
            );
        }
        let job_id_high = u64::from_le_bytes(fixed[8..16].try_into().unwrap());
        let job_id_low = u64::from_le_bytes(fixed[16..24].try_into().unwrap());
        let part_num_read = u32::from_le_bytes(fixed[24..28].try_into().unwrap());
        let from_to = u32::from_le_bytes(fixed[28..32].try_into().unwrap());
        let transfer_count = u32::from_le_bytes(fixed[32..36].try_into().unwrap());
        let flags = u32::from_le_bytes(fixed[36..40].try_into().unwrap());
        let block_size = u64::from_le_bytes(fixed[40..48].try_into().unwrap());
        let header_suffix_len = u32::from_le_bytes(fixed[48..52].try_into().unwrap()) as usize;

        let mut suffix = vec![0u8; header_suffix_len];
        file.read_exact(&mut suffix)
            .with_context(|| format!("truncated header suffix in {}", path.display()))?;

        let table_start = align8(HEADER_FIXED_SIZE + header_suffix_len);
        let declared_total = table_start + transfer_count as usize * ENTRY_STRIDE;

        let mmap = unsafe {
            MmapMut::map_mut(&file).with_context(|| format!("mmap {}", path.display()))?
        };

        let mut handle = Self {
            mmap,
            header: PartHeader {
                job_id: JobId::from_parts(job_id_high, job_id_low),
                part_num: part_num_read,
                from_to,
                flags,
                block_size,
                suffix,
            },
            transfer_count,
            table_start,
            path: path.clone(),
        };

        // A part file shorter than its declared table was interrupted mid-write;
        // repair by resetting every unwritten row's status to NotStarted.
        if file_len < declared_total {
            handle.repair_unwritten_tail(file_len)?;
        } else {
            handle.repair_unwritten_sentinels()?;
        }

        Ok(handle)
    }

    fn entry_offset(&self, index: u32) -> usize {
        self.table_start + index as usize * ENTRY_STRIDE
    }

    fn repair_unwritten_tail(&mut self, valid_len: usize) -> Result<()> {
        let mmap_len = self.mmap.len();
        if valid_len < mmap_len {
            // The file was zero-extended by the OS on mmap, or truncated by a
            // prior crash; either way bytes beyond `valid_len` are unwritten.
            for i in valid_len..mmap_len {
                self.mmap[i] = 0;
            }
        }
        for idx in 0..self.transfer_count {
            let off = self.entry_offset(idx);
            if off + ENTRY_STRIDE > valid_len {
                self.mmap[off + 59] = TransferStatus::NotStarted.to_byte();
            }
        }
        self.mmap.flush()?;
        Ok(())
    }

    fn repair_unwritten_sentinels(&mut self) -> Result<()> {
        for idx in 0..self.transfer_count {
            let off = self.entry_offset(idx);
            if self.mmap[off + 59] == STATUS_UNWRITTEN {
                self.mmap[off + 59] = TransferStatus::NotStarted.to_byte();
            }
        }
        self.mmap.flush()?;
        Ok(())
    }

    pub fn header(&self) -> &PartHeader {
        &self.header
    }

    pub fn transfer_count(&self) -> u32 {
        self.transfer_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn status_atomic(&self, index: u32) -> &AtomicU8 {
        let off = self.entry_offset(index) + 59;
        let ptr = unsafe { self.mmap.as_ptr().add(off) as *mut u8 };
        unsafe { AtomicU8::from_ptr(ptr) }
    }

    fn bytes_transferred_atomic(&self, index: u32) -> &AtomicU64 {
        let off = self.entry_offset(index);
        let ptr = unsafe { self.mmap.as_ptr().add(off) as *mut u64 };
        unsafe { AtomicU64::from_ptr(ptr) }
    }

    pub fn status(&self, index: u32) -> Result<TransferStatus> {
        self.bounds_check(index)?;
        TransferStatus::from_byte(self.status_atomic(index).load(Ordering::Acquire))
    }

    /// Atomically set a transfer's status. Rejects any transition out of a
    /// terminal state.
    pub fn set_status(&self, index: u32, new_status: TransferStatus) -> Result<()> {
        self.bounds_check(index)?;
        let current = self.status(index)?;
        if current.is_terminal() {
            bail!(
                "cannot transition transfer {index} out of terminal state {current:?} to {new_status:?}"
            );
        }
        self.status_atomic(index)
            .store(new_status.to_byte(), Ordering::Release);
        Ok(())
    }

    pub fn bytes_transferred(&self, index: u32) -> Result<u64> {
        self.bounds_check(index)?;
        Ok(self.bytes_transferred_atomic(index).load(Ordering::Acquire))
    }

    pub fn set_bytes_transferred(&self, index: u32, bytes: u64) -> Result<()> {
        self.bounds_check(index)?;
        self.bytes_transferred_atomic(index)
            .store(bytes, Ordering::Release);
        Ok(())
    }

    pub fn add_bytes_transferred(&self, index: u32, delta: u64) -> Result<u64> {
        self.bounds_check(index)?;
        Ok(self
            .bytes_transferred_atomic(index)
            .fetch_add(delta, Ordering::AcqRel)
            + delta)
    }

    pub fn set_error(&mut self, index: u32, error_code: i32) -> Result<()> {
        self.bounds_check(index)?;
        let off = self.entry_offset(index) + 52;
        self.mmap[off..off + 4].copy_from_slice(&error_code.to_le_bytes());
        Ok(())
    }

    pub fn increment_retry_count(&mut self, index: u32) -> Result<u16> {
        self.bounds_check(index)?;
        let off = self.entry_offset(index) + 56;
        let cur = u16::from_le_bytes(self.mmap[off..off + 2].try_into().unwrap());
        let next = cur.saturating_add(1);
        self.mmap[off..off + 2].copy_from_slice(&next.to_le_bytes());
        Ok(next)
    }

    fn bounds_check(&self, index: u32) -> Result<()> {
        if index >= self.transfer_count {
            bail!(
                "transfer index {index} out of range (part has {} transfers)",
                self.transfer_count
            );
        }
        Ok(())
    }

    fn decode_record(&self, index: u32) -> Result<TransferRecord> {
        let off = self.entry_offset(index);
        let row = &self.mmap[off..off + ENTRY_STRIDE];

        let bytes_transferred = u64::from_le_bytes(row[0..8].try_into().unwrap());
        let size = u64::from_le_bytes(row[8..16].try_into().unwrap());
        let lmt = i64::from_le_bytes(row[16..24].try_into().unwrap());
        let mut md5 = [0u8; MD5_LEN];
        md5.copy_from_slice(&row[24..40]);
        let src_offset = u32::from_le_bytes(row[40..44].try_into().unwrap()) as usize;
        let src_len = u16::from_le_bytes(row[44..46].try_into().unwrap()) as usize;
        let dst_offset = u32::from_le_bytes(row[46..50].try_into().unwrap()) as usize;
        let dst_len = u16::from_le_bytes(row[50..52].try_into().unwrap()) as usize;
        let error_code = i32::from_le_bytes(row[52..56].try_into().unwrap());
        let retry_count = u16::from_le_bytes(row[56..58].try_into().unwrap());
        let entity_type = EntityType::from_byte(row[58])?;
        let status = TransferStatus::from_byte(row[59])?;

        let suffix_start = self.table_start + self.transfer_count as usize * ENTRY_STRIDE;
        let src_path = self.read_suffix_string(suffix_start, src_offset, src_len)?;
        let dst_path = self.read_suffix_string(suffix_start, dst_offset, dst_len)?;

        Ok(TransferRecord {
            index,
            src_path,
            dst_path,
            size,
            lmt,
            md5,
            entity_type,
            status,
            error_code,
            retry_count,
            bytes_transferred,
        })
    }

    fn read_suffix_string(&self, suffix_start: usize, offset: usize, len: usize) -> Result<String> {
        let start = suffix_start + offset;
        let end = start + len;
        if end > self.mmap.len() {
            bail!("path string area reference out of bounds");
        }
        String::from_utf8(self.mmap[start..end].to_vec()).context("non-utf8 path in plan file")
    }

    /// Deterministic iteration in ascending transfer-index order.
    pub fn iterate(&self) -> Result<Vec<TransferRecord>> {
        (0..self.transfer_count)
            .map(|i| self.decode_record(i))
            .collect()
    }

    /// Decode a single transfer's row, e.g. to read back its recorded source
    /// MD5 at commit time without walking the whole table.
    pub fn record(&self, index: u32) -> Result<TransferRecord> {
        self.bounds_check(index)?;
        self.decode_record(index)
    }
}

/// Remove every part file belonging to `job_id`.
pub fn delete_job(plans_dir: &Path, job_id: JobId) -> Result<()> {
    let prefix = format!("{job_id}--");
    let entries = std::fs::read_dir(plans_dir)
        .with_context(|| format!("read plans dir {}", plans_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// List part numbers present on disk for `job_id`, ascending.
pub fn list_parts(plans_dir: &Path, job_id: JobId) -> Result<Vec<u32>> {
    let prefix = format!("{job_id}--");
    let suffix = format!(".steV{PLAN_FORMAT_VERSION}");
    let mut parts = Vec::new();
    if !plans_dir.exists() {
        return Ok(parts);
    }
    for entry in std::fs::read_dir(plans_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(mid) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(&suffix)) {
            if let Ok(n) = mid.parse::<u32>() {
                parts.push(n);
            }
        }
    }
    parts.sort_unstable();
    Ok(parts)
}

/// Every distinct job id with at least one part file on disk, in no
/// particular order. Used at agent startup to rediscover jobs that were
/// submitted by an earlier process.
pub fn list_job_ids(plans_dir: &Path) -> Result<Vec<JobId>> {
    use std::collections::HashSet;
    let mut ids = HashSet::new();
    if !plans_dir.exists() {
        return Ok(Vec::new());
    }
    for entry in std::fs::read_dir(plans_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some((prefix, _)) = name.split_once("--") {
            if let Ok(id) = prefix.parse::<JobId>() {
                ids.insert(id);
            }
        }
    }
    Ok(ids.into_iter().collect())
}

pub fn plan_already_exists_path(plans_dir: &Path, job_id: JobId, part_num: u32) -> Result<bool> {
    Ok(part_file_path(plans_dir, job_id, part_num)
        .try_exists()
        .map_err(|e| eyre!(e))?)
}
