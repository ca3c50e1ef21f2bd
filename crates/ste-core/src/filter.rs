//! Ordered predicate chain applied to every enumerated object.
//!
//! An object passes the pipeline iff every include predicate matches AND no
//! exclude predicate matches; an empty include list is "always match". Glob
//! compilation is lazy and cached, mirroring the admission check every
//! enumerated entry goes through during a walk.

use std::sync::atomic::{AtomicBool, Ordering};

use eyre::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::traverser::StoredObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    BlockBlob,
    PageBlob,
    AppendBlob,
}

/// Windows file-attribute bits. A no-op predicate on other platforms, which
/// warns exactly once per process if attribute filters are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeMask(pub u32);

static ATTRIBUTE_FILTER_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub include_after: Option<i64>,
    pub include_before: Option<i64>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub include_attributes: Option<AttributeMask>,
    pub exclude_attributes: Option<AttributeMask>,
    pub include_blob_types: Vec<BlobType>,
    pub case_insensitive: bool,

    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
}

impl FilterPipeline {
    fn build_set(patterns: &[String], case_insensitive: bool) -> Result<Option<GlobSet>> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let glob = if case_insensitive {
                globset::GlobBuilder::new(pat)
                    .case_insensitive(true)
                    .build()?
            } else {
                Glob::new(pat)?
            };
            builder.add(glob);
        }
        Ok(Some(builder.build()?))
    }

    /// Compile the include/exclude glob lists. Must be called once before
    /// the first `matches` call; cheap to call again after mutating the
    /// pattern lists.
    pub fn compile(&mut self) -> Result<()> {
        self.include_set = Self::build_set(&self.include_patterns, self.case_insensitive)?;
        self.exclude_set = Self::build_set(&self.exclude_patterns, self.case_insensitive)?;
        Ok(())
    }

    fn file_name_of(obj: &StoredObject) -> String {
        obj.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&obj.relative_path)
            .to_string()
    }

    fn path_has_prefix(path: &str, prefix: &str, case_insensitive: bool) -> bool {
        if case_insensitive {
            path.to_lowercase().starts_with(&prefix.to_lowercase())
        } else {
            path.starts_with(prefix)
        }
    }

    pub fn matches(&self, obj: &StoredObject) -> bool {
        let name = Self::file_name_of(obj);

        if let Some(set) = &self.include_set {
            if !set.is_match(&name) {
                return false;
            }
        }
        if let Some(set) = &self.exclude_set {
            if set.is_match(&name) {
                return false;
            }
        }

        if !self.include_paths.is_empty()
            && !self
                .include_paths
                .iter()
                .any(|p| Self::path_has_prefix(&obj.relative_path, p, self.case_insensitive))
        {
            return false;
        }
        if self
            .exclude_paths
            .iter()
            .any(|p| Self::path_has_prefix(&obj.relative_path, p, self.case_insensitive))
        {
            return false;
        }

        if let Some(after) = self.include_after {
            if obj.lmt < after {
                return false;
            }
        }
        if let Some(before) = self.include_before {
            if obj.lmt > before {
                return false;
            }
        }

        if let Some(min) = self.min_size {
            if obj.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if obj.size > max {
                return false;
            }
        }

        if (self.include_attributes.is_some() || self.exclude_attributes.is_some())
            && cfg!(not(windows))
            && !ATTRIBUTE_FILTER_WARNED.swap(true, Ordering::Relaxed)
        {
            log::warn!("attribute include/exclude filters have no effect on this platform");
        }

        if !self.include_blob_types.is_empty() {
            match obj.blob_type {
                Some(ty) if self.include_blob_types.contains(&ty) => {}
                Some(_) => return false,
                None => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traverser::EntityKind;

    fn object(path: &str, size: u64, lmt: i64) -> StoredObject {
        StoredObject {
            relative_path: path.to_string(),
            size,
            lmt,
            md5: None,
            kind: EntityKind::File,
            blob_type: None,
        }
    }

    #[test]
    fn empty_include_list_matches_everything() {
        let mut f = FilterPipeline::default();
        f.compile().unwrap();
        assert!(f.matches(&object("a.txt", 10, 0)));
    }

    #[test]
    fn exclude_pattern_rejects_matching_names() {
        let mut f = FilterPipeline {
            exclude_patterns: vec!["*.tmp".into()],
            ..Default::default()
        };
        f.compile().unwrap();
        assert!(!f.matches(&object("dir/x.tmp", 10, 0)));
        assert!(f.matches(&object("dir/x.txt", 10, 0)));
    }

    #[test]
    fn include_pattern_rejects_non_matching_names() {
        let mut f = FilterPipeline {
            include_patterns: vec!["*.log".into()],
            ..Default::default()
        };
        f.compile().unwrap();
        assert!(f.matches(&object("a.log", 10, 0)));
        assert!(!f.matches(&object("a.txt", 10, 0)));
    }

    #[test]
    fn size_bounds_are_enforced() {
        let f = FilterPipeline {
            min_size: Some(100),
            max_size: Some(1000),
            ..Default::default()
        };
        assert!(!f.matches(&object("a.txt", 50, 0)));
        assert!(f.matches(&object("a.txt", 500, 0)));
        assert!(!f.matches(&object("a.txt", 5000, 0)));
    }

    #[test]
    fn include_before_after_bound_lmt() {
        let f = FilterPipeline {
            include_after: Some(100),
            include_before: Some(200),
            ..Default::default()
        };
        assert!(!f.matches(&object("a.txt", 1, 50)));
        assert!(f.matches(&object("a.txt", 1, 150)));
        assert!(!f.matches(&object("a.txt", 1, 250)));
    }

    #[test]
    fn exclude_path_prefix_rejects_subtree() {
        let f = FilterPipeline {
            exclude_paths: vec!["node_modules".into()],
            ..Default::default()
        };
        assert!(!f.matches(&object("node_modules/pkg/index.js", 1, 0)));
        assert!(f.matches(&object("src/index.js", 1, 0)));
    }
}
