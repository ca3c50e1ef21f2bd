//! Lazy enumerators that walk a source and yield `StoredObject` descriptors.
//!
//! `LocalTraverser` is adapted from a walkdir-based `FileEnumerator`; the
//! remote/list-of-files/wildcard variants are fresh code against the
//! `RemoteObjectStore` contract, since no durable remote-listing traverser
//! existed to adapt from.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{bail, Context, Result};
use walkdir::WalkDir;

use crate::checksum;
use crate::filter::BlobType;
use crate::remote_store::RemoteObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    File,
    Folder,
    Symlink,
}

/// In-memory descriptor produced by a Traverser. Dropped once the Enumerator
/// writes it into a plan record.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub relative_path: String,
    pub size: u64,
    pub lmt: i64,
    pub md5: Option<[u8; 16]>,
    pub kind: EntityKind,
    pub blob_type: Option<BlobType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkPolicy {
    Follow,
    Skip,
    PreserveAsLink,
}

/// Callback invoked once per enumerated object; errors from `visit` abort
/// the walk, matching how the Enumerator treats a failed plan write.
pub type Visit<'a> = dyn FnMut(StoredObject) -> Result<()> + 'a;

/// Depth-first filesystem walk. Unreadable directories become a single
/// emitted error entry and enumeration continues; a missing root is fatal.
pub struct LocalTraverser {
    pub root: PathBuf,
    pub recursive: bool,
    pub symlink_policy: SymlinkPolicy,
}

impl LocalTraverser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            symlink_policy: SymlinkPolicy::Skip,
        }
    }

    pub fn walk(&self, visit: &mut Visit<'_>) -> Result<Vec<String>> {
        if !self.root.exists() {
            bail!("SourceNotFound: enumeration root does not exist: {}", self.root.display());
        }

        let mut warnings = Vec::new();
        let mut visited_inodes: HashSet<(u64, u64)> = HashSet::new();

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let follow = self.symlink_policy == SymlinkPolicy::Follow;
        let mut walker = WalkDir::new(&self.root)
            .follow_links(follow)
            .max_depth(max_depth)
            .into_iter();

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(e) => e,
                Err(err) => {
                    if err.depth() == 0 {
                        bail!("SourceNotFound: {err}");
                    }
                    warnings.push(format!("enumeration error: {err}"));
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path();
            let rel = relative_path(&self.root, path);

            if follow {
                if let Ok(meta) = fs::metadata(path) {
                    if let Some(key) = inode_key(&meta) {
                        if !visited_inodes.insert(key) {
                            continue; // symlink cycle
                        }
                    }
                }
            }

            if entry.file_type().is_dir() {
                visit(StoredObject {
                    relative_path: rel,
                    size: 0,
                    lmt: 0,
                    md5: None,
                    kind: EntityKind::Folder,
                    blob_type: None,
                })?;
            } else if entry.file_type().is_symlink() && !follow {
                if self.symlink_policy == SymlinkPolicy::Skip {
                    continue;
                }
                let meta = fs::symlink_metadata(path)
                    .with_context(|| format!("symlink metadata {}", path.display()))?;
                visit(StoredObject {
                    relative_path: rel,
                    size: meta.len(),
                    lmt: lmt_secs(&meta),
                    md5: None,
                    kind: EntityKind::Symlink,
                    blob_type: None,
                })?;
            } else if entry.file_type().is_file() {
                let meta = entry
                    .metadata()
                    .with_context(|| format!("stat {}", path.display()))?;
                let md5 = match checksum::md5_file(path) {
                    Ok(digest) => Some(digest),
                    Err(err) => {
                        warnings.push(format!("md5 {}: {err}", path.display()));
                        None
                    }
                };
                visit(StoredObject {
                    relative_path: rel,
                    size: meta.len(),
                    lmt: lmt_secs(&meta),
                    md5,
                    kind: EntityKind::File,
                    blob_type: None,
                })?;
            }
        }

        Ok(warnings)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => String::new(),
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}

fn lmt_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn inode_key(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn inode_key(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Pages through a remote container listing via `RemoteObjectStore::list_flat`,
/// concatenating pages and preserving server-returned order within a page.
pub struct RemoteTraverser<'a> {
    pub store: &'a dyn RemoteObjectStore,
    pub prefix: String,
}

impl<'a> RemoteTraverser<'a> {
    pub async fn walk(&self, visit: &mut Visit<'_>) -> Result<()> {
        let mut marker: Option<String> = None;
        loop {
            let (items, next) = self.store.list_flat(&self.prefix, marker.as_deref()).await?;
            for item in items {
                let rel = item
                    .path
                    .strip_prefix(&self.prefix)
                    .unwrap_or(&item.path)
                    .trim_start_matches('/')
                    .to_string();
                visit(StoredObject {
                    relative_path: rel,
                    size: item.size,
                    lmt: item.lmt,
                    md5: None,
                    kind: if item.is_directory {
                        EntityKind::Folder
                    } else {
                        EntityKind::File
                    },
                    blob_type: None,
                })?;
            }
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(())
    }
}

/// Reads a user-supplied file of newline-separated relative paths and
/// resolves each against the root via `RemoteObjectStore::stat`. Entries
/// that don't resolve produce a warning but do not abort the walk.
pub struct ListOfFilesTraverser<'a> {
    pub store: &'a dyn RemoteObjectStore,
    pub list_path: PathBuf,
}

impl<'a> ListOfFilesTraverser<'a> {
    pub async fn walk(&self, visit: &mut Visit<'_>) -> Result<Vec<String>> {
        let contents = std::fs::read_to_string(&self.list_path)
            .with_context(|| format!("read list-of-files {}", self.list_path.display()))?;
        let mut warnings = Vec::new();
        for line in contents.lines() {
            let rel = line.trim();
            if rel.is_empty() {
                continue;
            }
            match self.store.stat(rel).await {
                Ok(props) => visit(StoredObject {
                    relative_path: rel.to_string(),
                    size: props.size,
                    lmt: props.lmt,
                    md5: props.md5,
                    kind: EntityKind::File,
                    blob_type: None,
                })?,
                Err(err) => warnings.push(format!("{rel}: {err}")),
            }
        }
        Ok(warnings)
    }
}

/// Expands a single trailing `*` in the final path segment into a prefix
/// query. A `*` anywhere else is `IllegalPattern`.
pub struct WildcardTraverser<'a> {
    pub store: &'a dyn RemoteObjectStore,
    pub pattern: String,
}

impl<'a> WildcardTraverser<'a> {
    pub async fn walk(&self, visit: &mut Visit<'_>) -> Result<()> {
        let (prefix, suffix) = self.split_pattern()?;
        let mut marker: Option<String> = None;
        loop {
            let (items, next) = self.store.list_flat(&prefix, marker.as_deref()).await?;
            for item in items {
                let name = item.path.rsplit('/').next().unwrap_or(&item.path);
                if !name.starts_with(&suffix) {
                    continue;
                }
                let rel = item
                    .path
                    .strip_prefix(&prefix)
                    .unwrap_or(&item.path)
                    .trim_start_matches('/')
                    .to_string();
                visit(StoredObject {
                    relative_path: rel,
                    size: item.size,
                    lmt: item.lmt,
                    md5: None,
                    kind: if item.is_directory {
                        EntityKind::Folder
                    } else {
                        EntityKind::File
                    },
                    blob_type: None,
                })?;
            }
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(())
    }

    fn split_pattern(&self) -> Result<(String, String)> {
        let (dir, last_segment) = match self.pattern.rsplit_once('/') {
            Some((dir, last)) => (format!("{dir}/"), last),
            None => (String::new(), self.pattern.as_str()),
        };
        if dir.contains('*') {
            bail!("IllegalPattern: wildcards are only supported in the final path segment");
        }
        let star_count = last_segment.matches('*').count();
        if star_count > 1 {
            bail!("IllegalPattern: only a single '*' is supported");
        }
        let prefix_part = last_segment.trim_end_matches('*').to_string();
        Ok((dir, prefix_part))
    }
}
