//! Provider over the hosting environment's virtual filesystem.
//!
//! The host decides what exists and whether a resource has a real on-disk
//! path. Only resources with a real path can be watched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Capabilities, ResourceProvider, ResourceReader, ResourceWriter, pattern_matches};
use crate::config::ProviderKind;

/// Resource API offered by a hosting container.
pub trait HostEnvironment: Send + Sync + std::fmt::Debug {
    /// Identifier of the host, used in location strings.
    fn name(&self) -> &str;

    fn get_resource(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store a resource. `Ok(false)` when the host does not accept writes.
    fn put_resource(&self, path: &str, content: &[u8]) -> io::Result<bool>;

    /// Immediate children of `dir`. Directories carry a trailing `/`.
    fn resource_paths(&self, dir: &str) -> io::Result<Vec<String>>;

    /// Real on-disk path of a resource, if the host has one.
    fn real_path(&self, path: &str) -> Option<PathBuf>;

    fn writable(&self) -> bool;
}

/// Host backed by a real directory, as for an unpacked application.
#[derive(Debug)]
pub struct DirectoryHost {
    root: PathBuf,
    name: String,
    read_only: bool,
}

impl DirectoryHost {
    pub fn new(root: impl Into<PathBuf>, read_only: bool) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        let name = root.display().to_string();
        Self {
            root,
            name,
            read_only,
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        super::join_root(&self.root, path)
    }
}

impl HostEnvironment for DirectoryHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.full_path(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if self.full_path(path).is_dir() => {
                crate::debug_event!("host", "directory read", "{path}: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn put_resource(&self, path: &str, content: &[u8]) -> io::Result<bool> {
        if self.read_only {
            return Ok(false);
        }
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)?;
        Ok(true)
    }

    fn resource_paths(&self, dir: &str) -> io::Result<Vec<String>> {
        let base = self.full_path(dir);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                children.push(format!("{name}/"));
            } else {
                children.push(name);
            }
        }
        children.sort();
        Ok(children)
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.full_path(path))
    }

    fn writable(&self) -> bool {
        !self.read_only
    }
}

/// In-memory host with no real paths; resources cannot be watched.
#[derive(Debug, Default)]
pub struct MemoryHost {
    resources: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.resources
            .write()
            .insert(path.trim_start_matches('/').to_string(), content.into());
    }
}

impl HostEnvironment for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.resources.read().get(path).cloned())
    }

    fn put_resource(&self, path: &str, content: &[u8]) -> io::Result<bool> {
        self.insert(path, content);
        Ok(true)
    }

    fn resource_paths(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut children = BTreeSet::new();
        for key in self.resources.read().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child_dir, _)) => children.insert(format!("{child_dir}/")),
                None => children.insert(rest.to_string()),
            };
        }
        Ok(children.into_iter().collect())
    }

    fn real_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    fn writable(&self) -> bool {
        true
    }
}

/// Buffers a write and stores it in the host on flush or drop.
struct HostWriter {
    host: Arc<dyn HostEnvironment>,
    path: String,
    buffer: Cursor<Vec<u8>>,
    dirty: bool,
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dirty = true;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if !self.host.put_resource(&self.path, self.buffer.get_ref())? {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("host {} refused write to {}", self.host.name(), self.path),
            ));
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for HostWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("[host] failed to store {}: {e}", self.path);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostProvider {
    host: Arc<dyn HostEnvironment>,
    prefix: String,
    location: String,
}

impl HostProvider {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        let location = format!("host:{}", host.name());
        Self {
            host,
            prefix: String::new(),
            location,
        }
    }

    fn host_path(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{path}", self.prefix),
        }
    }

    fn collect(
        &self,
        dir: &str,
        relative_base: &str,
        pattern: Option<&glob::Pattern>,
        recursive: bool,
        found: &mut BTreeSet<String>,
    ) -> io::Result<()> {
        for child in self.host.resource_paths(dir)? {
            let (name, is_dir) = match child.strip_suffix('/') {
                Some(name) => (name, true),
                None => (child.as_str(), false),
            };
            let relative = if relative_base.is_empty() {
                name.to_string()
            } else {
                format!("{relative_base}/{name}")
            };
            if is_dir {
                if recursive {
                    let child_dir = if dir.is_empty() {
                        name.to_string()
                    } else {
                        format!("{dir}/{name}")
                    };
                    self.collect(&child_dir, &relative, pattern, recursive, found)?;
                }
            } else if pattern_matches(pattern, &relative) {
                found.insert(relative);
            }
        }
        Ok(())
    }
}

impl ResourceProvider for HostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Host
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn capabilities(&self) -> Capabilities {
        if self.host.writable() {
            Capabilities::all()
        } else {
            Capabilities::READ | Capabilities::ENUMERATE
        }
    }

    fn exists(&self, path: &str) -> bool {
        match self.host.get_resource(&self.host_path(path)) {
            Ok(found) => found.is_some(),
            Err(e) => {
                crate::debug_event!("host", "probe failed", "{path}: {e}");
                false
            }
        }
    }

    fn open_read(&self, path: &str) -> io::Result<Option<ResourceReader>> {
        Ok(self
            .host
            .get_resource(&self.host_path(path))?
            .map(|bytes| Box::new(Cursor::new(bytes)) as ResourceReader))
    }

    fn open_write(&self, path: &str) -> io::Result<Option<ResourceWriter>> {
        if !self.host.writable() || path.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(HostWriter {
            host: Arc::clone(&self.host),
            path: self.host_path(path),
            buffer: Cursor::new(Vec::new()),
            // An empty write still creates the resource
            dirty: true,
        })))
    }

    fn list(
        &self,
        dir: &str,
        pattern: Option<&glob::Pattern>,
        recursive: bool,
    ) -> io::Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        self.collect(&self.host_path(dir), "", pattern, recursive, &mut found)?;
        Ok(found)
    }

    fn resolve_physical(&self, path: &str) -> Option<PathBuf> {
        self.host.real_path(&self.host_path(path))
    }

    fn child(&self, segment: &str) -> Arc<dyn ResourceProvider> {
        let prefix = self.host_path(segment);
        Arc::new(HostProvider {
            host: Arc::clone(&self.host),
            location: format!("host:{}!/{prefix}", self.host.name()),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_memory_host_has_no_physical_handle() {
        let host = Arc::new(MemoryHost::new());
        host.insert("WEB-INF/app.xml", "<app/>");
        let provider = HostProvider::new(host);

        assert!(provider.exists("WEB-INF/app.xml"));
        assert_eq!(provider.resolve_physical("WEB-INF/app.xml"), None);

        let listed = provider.list("", None, true).unwrap();
        assert_eq!(listed.into_iter().collect::<Vec<_>>(), vec!["WEB-INF/app.xml"]);
        assert!(provider.list("", None, false).unwrap().is_empty());
    }

    #[test]
    fn test_writes_land_in_host() {
        let host = Arc::new(MemoryHost::new());
        let provider = HostProvider::new(Arc::clone(&host) as Arc<dyn HostEnvironment>);

        let mut writer = provider.open_write("conf/new.txt").unwrap().unwrap();
        writer.write_all(b"fresh").unwrap();
        drop(writer);

        let mut content = String::new();
        provider
            .child("conf")
            .open_read("new.txt")
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "fresh");
    }

    #[test]
    fn test_directory_host_exposes_real_path() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("index.html"), "hi").unwrap();

        let provider = HostProvider::new(Arc::new(DirectoryHost::new(temp_dir.path(), false)));
        let physical = provider.resolve_physical("index.html").unwrap();
        assert!(physical.is_file());
        assert!(provider.exists("index.html"));
        assert!(!provider.exists("missing.html"));
    }

    #[test]
    fn test_read_only_directory_host() {
        let temp_dir = TempDir::new().unwrap();
        let provider = HostProvider::new(Arc::new(DirectoryHost::new(temp_dir.path(), true)));
        assert!(!provider.can_write());
        assert!(provider.open_write("x.txt").unwrap().is_none());
    }
}
