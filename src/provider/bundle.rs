//! Manifest-driven bundle provider.
//!
//! A bundle is a directory whose visible contents are exactly the entries
//! listed in its manifest file. Several bundles may carry the same entry;
//! the weight registry decides which copy is served.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Capabilities, ResourceProvider, ResourceReader, pattern_matches};
use crate::config::ProviderKind;
use crate::error::{ResolveError, ResolveResult};
use crate::weights::WeightRegistry;

/// Manifest file name used when the declaration names none.
pub const DEFAULT_MANIFEST: &str = "index.list";

#[derive(Debug)]
pub struct Bundle {
    dir: PathBuf,
    location: String,
    entries: BTreeSet<String>,
}

impl Bundle {
    /// Load a bundle from `dir`, reading entries from its manifest.
    ///
    /// The manifest lists one relative path per line; blank lines and lines
    /// starting with `#` are ignored.
    pub fn load(dir: &Path, manifest: &str) -> ResolveResult<Self> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let manifest_path = dir.join(manifest);
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| ResolveError::io(format!("bundle:{}", dir.display()), e))?;

        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.trim_start_matches('/').to_string())
            .collect();

        Ok(Self::from_entries(dir, entries))
    }

    pub fn from_entries(dir: impl Into<PathBuf>, entries: BTreeSet<String>) -> Self {
        let dir = dir.into();
        let location = format!("bundle:{}", dir.display());
        Self {
            dir,
            location,
            entries,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    fn entry_location(&self, entry: &str) -> String {
        format!("{}!/{}", self.location, entry)
    }
}

/// Read/enumerate access over a set of bundles. Not watchable.
#[derive(Debug, Clone)]
pub struct BundleProvider {
    bundles: Vec<Arc<Bundle>>,
    /// Entry prefix for derived providers, empty at the top.
    prefix: String,
    location: String,
    registry: Arc<WeightRegistry>,
}

impl BundleProvider {
    pub fn new(bundles: Vec<Bundle>, registry: Arc<WeightRegistry>) -> Self {
        let bundles: Vec<Arc<Bundle>> = bundles.into_iter().map(Arc::new).collect();
        let location = Self::provider_location(&bundles, "");
        Self {
            bundles,
            prefix: String::new(),
            location,
            registry,
        }
    }

    fn provider_location(bundles: &[Arc<Bundle>], prefix: &str) -> String {
        let dirs: Vec<_> = bundles.iter().map(|b| b.dir.display().to_string()).collect();
        if prefix.is_empty() {
            format!("bundle:{}", dirs.join(","))
        } else {
            format!("bundle:{}!/{prefix}", dirs.join(","))
        }
    }

    fn entry_name(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{path}", self.prefix),
        }
    }

    /// Bundles holding `path`, in precedence order.
    fn holders(&self, path: &str) -> Vec<&Arc<Bundle>> {
        let entry = self.entry_name(path);
        let mut holders: Vec<&Arc<Bundle>> =
            self.bundles.iter().filter(|b| b.contains(&entry)).collect();
        holders.sort_by(|a, b| {
            self.registry
                .compare(&a.entry_location(&entry), &b.entry_location(&entry))
        });
        holders
    }
}

impl ResourceProvider for BundleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bundle
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::ENUMERATE
    }

    fn exists(&self, path: &str) -> bool {
        let entry = self.entry_name(path);
        self.bundles.iter().any(|b| b.contains(&entry))
    }

    fn open_read(&self, path: &str) -> io::Result<Option<ResourceReader>> {
        let entry = self.entry_name(path);
        let Some(bundle) = self.holders(path).into_iter().next() else {
            return Ok(None);
        };
        let file = File::open(bundle.dir.join(&entry))?;
        Ok(Some(Box::new(file)))
    }

    fn list(
        &self,
        dir: &str,
        pattern: Option<&glob::Pattern>,
        recursive: bool,
    ) -> io::Result<BTreeSet<String>> {
        let base = self.entry_name(dir);
        let base_prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        };

        let mut found = BTreeSet::new();
        for bundle in &self.bundles {
            for entry in &bundle.entries {
                let Some(relative) = entry.strip_prefix(&base_prefix) else {
                    continue;
                };
                if !recursive && relative.contains('/') {
                    continue;
                }
                if pattern_matches(pattern, relative) {
                    found.insert(relative.to_string());
                }
            }
        }
        Ok(found)
    }

    fn locations(&self, path: &str) -> Vec<String> {
        let entry = self.entry_name(path);
        self.holders(path)
            .into_iter()
            .map(|bundle| bundle.entry_location(&entry))
            .collect()
    }

    fn child(&self, segment: &str) -> Arc<dyn ResourceProvider> {
        let prefix = self.entry_name(segment);
        Arc::new(BundleProvider {
            bundles: self.bundles.clone(),
            location: Self::provider_location(&self.bundles, &prefix),
            prefix,
            registry: Arc::clone(&self.registry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::WeightRule;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn make_bundle(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = root.join(name);
        let mut manifest = String::from("# generated\n");
        for (entry, content) in files {
            let path = dir.join(entry);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            manifest.push_str(entry);
            manifest.push('\n');
        }
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DEFAULT_MANIFEST), manifest).unwrap();
        dir
    }

    fn read(provider: &dyn ResourceProvider, path: &str) -> String {
        let mut out = String::new();
        provider
            .open_read(path)
            .unwrap()
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_only_manifest_entries_are_visible() {
        let temp_dir = TempDir::new().unwrap();
        let dir = make_bundle(temp_dir.path(), "core", &[("conf/app.xml", "core")]);
        fs::write(dir.join("unlisted.xml"), "hidden").unwrap();

        let bundle = Bundle::load(&dir, DEFAULT_MANIFEST).unwrap();
        let provider = BundleProvider::new(vec![bundle], Arc::new(WeightRegistry::new()));

        assert!(provider.exists("conf/app.xml"));
        assert!(!provider.exists("unlisted.xml"));
        assert!(provider.open_read("unlisted.xml").unwrap().is_none());
        assert!(!provider.can_write());
        assert_eq!(provider.resolve_physical("conf/app.xml"), None);
    }

    #[test]
    fn test_duplicate_entries_follow_weight_rules() {
        let temp_dir = TempDir::new().unwrap();
        let core = make_bundle(temp_dir.path(), "core", &[("app.xml", "core")]);
        let ext = make_bundle(temp_dir.path(), "ext", &[("app.xml", "ext")]);

        let bundles = vec![
            Bundle::load(&core, DEFAULT_MANIFEST).unwrap(),
            Bundle::load(&ext, DEFAULT_MANIFEST).unwrap(),
        ];

        // Without rules the lexicographically smaller location wins
        let plain = BundleProvider::new(bundles, Arc::new(WeightRegistry::new()));
        assert_eq!(read(&plain, "app.xml"), "core");
        let locations = plain.locations("app.xml");
        assert_eq!(locations.len(), 2);
        assert!(locations[0].contains("core"));

        let bundles = vec![
            Bundle::load(&core, DEFAULT_MANIFEST).unwrap(),
            Bundle::load(&ext, DEFAULT_MANIFEST).unwrap(),
        ];
        let registry = WeightRegistry::with_rules(vec![WeightRule::new("/ext!", 10).unwrap()]);
        let ranked = BundleProvider::new(bundles, Arc::new(registry));
        assert_eq!(read(&ranked, "app.xml"), "ext");
        assert!(ranked.locations("app.xml")[0].contains("ext"));
    }

    #[test]
    fn test_list_and_child_use_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let dir = make_bundle(
            temp_dir.path(),
            "core",
            &[("conf/a.xml", "a"), ("conf/deep/b.xml", "b"), ("top.txt", "t")],
        );
        let provider = BundleProvider::new(
            vec![Bundle::load(&dir, DEFAULT_MANIFEST).unwrap()],
            Arc::new(WeightRegistry::new()),
        );

        let flat = provider.list("conf", None, false).unwrap();
        assert_eq!(flat.into_iter().collect::<Vec<_>>(), vec!["a.xml"]);

        let deep = provider.list("conf", None, true).unwrap();
        assert_eq!(
            deep.into_iter().collect::<Vec<_>>(),
            vec!["a.xml", "deep/b.xml"]
        );

        let child = provider.child("conf");
        assert!(child.exists("deep/b.xml"));
        assert_eq!(read(child.as_ref(), "a.xml"), "a");
        assert!(!child.exists("top.txt"));
    }

    #[test]
    fn test_missing_manifest_is_backend_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = Bundle::load(temp_dir.path(), DEFAULT_MANIFEST).unwrap_err();
        assert!(matches!(err, ResolveError::BackendIo { .. }));
    }
}
