//! Capabilities the transfer core consumes but does not implement:
//! credential acquisition/signing and the remote protocol adapter itself.
//!
//! `RemoteObjectStore` is the seam the Traverser, Worker Pool, and Scheduler
//! call through for every byte that moves; how those calls reach a wire
//! protocol belongs to an external collaborator. `LocalFsStore` is the one
//! concrete implementation this crate ships, backing local-to-local
//! transfers and serving as the fixture for every other module's tests.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use eyre::{bail, Context, Result};

/// Credential acquisition and signing, consumed but never implemented here.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String>;

    /// Invalidate any cached token, forcing the next `token()` call to
    /// re-acquire. Called exactly once per `AuthExpired` retry.
    async fn refresh(&self) -> Result<()>;
}

/// Credential provider for local filesystem stores, which need no auth.
pub struct NoopCredentialProvider;

#[async_trait]
impl CredentialProvider for NoopCredentialProvider {
    async fn token(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ListedItem {
    pub path: String,
    pub size: u64,
    pub lmt: i64,
    pub is_directory: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectProperties {
    pub size: u64,
    pub lmt: i64,
    pub md5: Option<[u8; 16]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
}

/// Opaque identifier for an in-flight multipart upload, one per transfer.
pub type UploadId = String;
/// Opaque identifier returned by the store for a single committed chunk.
pub type ChunkTag = String;
/// Opaque identifier for a server-side copy operation (`RemoteTraverser`/`copy`).
pub type OpToken = String;

/// The capability the core's Worker Pool, Scheduler, and Traverser consume
/// for every remote read/write/list/copy operation. One implementation per
/// storage family lives outside this crate; `LocalFsStore` below is the
/// reference implementation used for local-local transfers and tests.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Page through a flat (non-hierarchical) listing under `prefix`,
    /// starting after `marker`. Returns the page and the marker for the next
    /// page, or `None` once exhausted.
    async fn list_flat(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<(Vec<ListedItem>, Option<String>)>;

    async fn get(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Idempotent: re-uploading the same `(upload_id, chunk_ordinal)` pair
    /// must succeed and return the same tag.
    async fn put_chunk(
        &self,
        path: &str,
        upload_id: &UploadId,
        chunk_ordinal: u32,
        bytes: &[u8],
    ) -> Result<ChunkTag>;

    async fn commit(
        &self,
        path: &str,
        upload_id: &UploadId,
        chunk_tags: &[ChunkTag],
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    async fn abort(&self, path: &str, upload_id: &UploadId) -> Result<()>;

    async fn stat(&self, path: &str) -> Result<ObjectProperties>;

    async fn copy(&self, src_url: &str, dst_path: &str) -> Result<OpToken>;

    async fn poll_copy(&self, op_token: &OpToken) -> Result<CopyStatus>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Reference `RemoteObjectStore` over a local filesystem root. Chunks are
/// written directly at their target offset rather than staged and committed,
/// since a local file has no multipart-upload concept; `commit` only needs
/// to exist to satisfy the trait and is a no-op.
pub struct LocalFsStore {
    root: PathBuf,
    open_uploads: Mutex<HashMap<UploadId, PathBuf>>,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open_uploads: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl RemoteObjectStore for LocalFsStore {
    async fn list_flat(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<(Vec<ListedItem>, Option<String>)> {
        let base = self.resolve(prefix);
        let mut items = Vec::new();
        if base.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(&base)
                .with_context(|| format!("read_dir {}", base.display()))?
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let meta = entry.metadata()?;
                let rel = Path::new(prefix)
                    .join(entry.file_name())
                    .to_string_lossy()
                    .replace('\\', "/");
                if let Some(after) = marker {
                    if rel.as_str() <= after {
                        continue;
                    }
                }
                items.push(ListedItem {
                    path: rel,
                    size: meta.len(),
                    lmt: lmt_of(&meta),
                    is_directory: meta.is_dir(),
                });
            }
        }
        Ok((items, None))
    }

    async fn get(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut f = File::open(self.resolve(path)).with_context(|| format!("open {path}"))?;
        f.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        f.read_exact(&mut buf)
            .with_context(|| format!("read {length} bytes at offset {offset} from {path}"))?;
        Ok(buf)
    }

    async fn put_chunk(
        &self,
        path: &str,
        upload_id: &UploadId,
        chunk_ordinal: u32,
        bytes: &[u8],
    ) -> Result<ChunkTag> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged = {
            let mut uploads = self.open_uploads.lock().unwrap();
            uploads
                .entry(upload_id.clone())
                .or_insert_with(|| dest.clone())
                .clone()
        };
        let chunk_offset = chunk_ordinal as u64 * bytes.len().max(1) as u64;
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&staged)
            .with_context(|| format!("open {} for chunked write", staged.display()))?;
        f.seek(SeekFrom::Start(chunk_offset))?;
        f.write_all(bytes)?;
        Ok(format!("{upload_id}:{chunk_ordinal}"))
    }

    async fn commit(
        &self,
        _path: &str,
        upload_id: &UploadId,
        _chunk_tags: &[ChunkTag],
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.open_uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn abort(&self, _path: &str, upload_id: &UploadId) -> Result<()> {
        if let Some(staged) = self.open_uploads.lock().unwrap().remove(upload_id) {
            let _ = fs::remove_file(staged);
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<ObjectProperties> {
        let resolved = self.resolve(path);
        let meta = fs::metadata(&resolved).with_context(|| format!("stat {path}"))?;
        let md5 = if meta.is_file() {
            Some(crate::checksum::md5_file(&resolved)?)
        } else {
            None
        };
        Ok(ObjectProperties {
            size: meta.len(),
            lmt: lmt_of(&meta),
            md5,
        })
    }

    async fn copy(&self, src_url: &str, dst_path: &str) -> Result<OpToken> {
        let dst = self.resolve(dst_path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src_url, &dst).with_context(|| format!("copy {src_url} -> {dst_path}"))?;
        Ok(format!("done:{dst_path}"))
    }

    async fn poll_copy(&self, op_token: &OpToken) -> Result<CopyStatus> {
        if op_token.starts_with("done:") {
            Ok(CopyStatus::Success)
        } else {
            bail!("unrecognised copy op token {op_token}")
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        }
        .with_context(|| format!("delete {}", target.display()))
    }
}

fn lmt_of(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
