//! Local directory tree provider.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::{
    Capabilities, ResourceProvider, ResourceReader, ResourceWriter, join_root, pattern_matches,
};
use crate::config::ProviderKind;

/// Full read/write/enumerate access to a directory, watchable.
#[derive(Debug, Clone)]
pub struct FsProvider {
    root: PathBuf,
    location: String,
    read_only: bool,
}

impl FsProvider {
    pub fn new(root: impl Into<PathBuf>, read_only: bool) -> Self {
        let root = root.into();
        // Canonical form when the directory exists, as given otherwise
        let root = root.canonicalize().unwrap_or(root);
        let location = format!("fs:{}", root.display());
        Self {
            root,
            location,
            read_only,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        join_root(&self.root, path)
    }
}

impl ResourceProvider for FsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Filesystem
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::READ | Capabilities::ENUMERATE
        } else {
            Capabilities::all()
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    fn open_read(&self, path: &str) -> io::Result<Option<ResourceReader>> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Ok(None);
        }
        match File::open(&full) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open_write(&self, path: &str) -> io::Result<Option<ResourceWriter>> {
        if self.read_only || path.is_empty() {
            return Ok(None);
        }
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Some(Box::new(File::create(full)?)))
    }

    fn list(
        &self,
        dir: &str,
        pattern: Option<&glob::Pattern>,
        recursive: bool,
    ) -> io::Result<BTreeSet<String>> {
        let base = self.full_path(dir);
        let mut found = BTreeSet::new();
        if !base.is_dir() {
            return Ok(found);
        }

        let walker = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    crate::debug_event!("fs", "skipped entry", "{e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if pattern_matches(pattern, &relative) {
                found.insert(relative);
            }
        }

        Ok(found)
    }

    fn resolve_physical(&self, path: &str) -> Option<PathBuf> {
        Some(self.full_path(path))
    }

    fn child(&self, segment: &str) -> Arc<dyn ResourceProvider> {
        Arc::new(FsProvider::new(self.full_path(segment), self.read_only))
    }
}
