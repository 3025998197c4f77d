//! Capability-tagged resource providers.
//!
//! Every backend implements [`ResourceProvider`]. Paths handed to a provider
//! are relative to its own root, already normalized by the namespace. A
//! provider answers "not here" with `false`/`None`/empty and reserves errors
//! for genuine I/O faults.

mod bundle;
mod filesystem;
mod host;
mod naming;
mod null;

pub use bundle::{Bundle, BundleProvider, DEFAULT_MANIFEST};
pub use filesystem::FsProvider;
pub use host::{DirectoryHost, HostEnvironment, HostProvider, MemoryHost};
pub use naming::NamingProvider;
pub use null::NullProvider;

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;

use crate::config::{ProviderDecl, ProviderKind, Settings};
use crate::error::{ResolveError, ResolveResult};
use crate::weights::WeightRegistry;

bitflags! {
    /// What a provider can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const ENUMERATE = 0b100;
    }
}

pub type ResourceReader = Box<dyn Read + Send>;
pub type ResourceWriter = Box<dyn Write + Send>;

/// Contract shared by every backend.
pub trait ResourceProvider: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Canonical identifier of this provider's root, e.g. `fs:/srv/config`.
    ///
    /// Weight rules match against it and it breaks ordering ties.
    fn location(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Whether `path` can be read from this provider.
    fn exists(&self, path: &str) -> bool;

    /// Open `path` for reading, `None` when absent.
    fn open_read(&self, path: &str) -> io::Result<Option<ResourceReader>>;

    /// Open `path` for writing, `None` when this provider cannot write it.
    fn open_write(&self, path: &str) -> io::Result<Option<ResourceWriter>> {
        let _ = path;
        Ok(None)
    }

    /// Relative paths under `dir`, filtered by `pattern`.
    ///
    /// A pattern without `/` matches file names; otherwise it matches the
    /// path relative to `dir`.
    fn list(
        &self,
        dir: &str,
        pattern: Option<&glob::Pattern>,
        recursive: bool,
    ) -> io::Result<BTreeSet<String>> {
        let _ = (dir, pattern, recursive);
        Ok(BTreeSet::new())
    }

    /// On-disk location of `path` for change detection, whether or not it
    /// exists yet. `None` when this backend cannot be watched.
    fn resolve_physical(&self, path: &str) -> Option<PathBuf> {
        let _ = path;
        None
    }

    /// Identifiers of every physical copy of `path` this provider holds, in
    /// precedence order.
    fn locations(&self, path: &str) -> Vec<String> {
        if self.exists(path) {
            vec![join_location(self.location(), path)]
        } else {
            Vec::new()
        }
    }

    /// The same backend rooted one or more segments deeper.
    fn child(&self, segment: &str) -> Arc<dyn ResourceProvider>;

    fn can_read(&self) -> bool {
        self.capabilities().contains(Capabilities::READ)
    }

    fn can_write(&self) -> bool {
        self.capabilities().contains(Capabilities::WRITE)
    }

    fn can_enumerate(&self) -> bool {
        self.capabilities().contains(Capabilities::ENUMERATE)
    }
}

/// A provider with its precedence inside one namespace.
#[derive(Clone)]
pub struct ProviderEntry {
    provider: Arc<dyn ResourceProvider>,
    /// Location of the top-level provider this entry derives from; breaks
    /// ties so derived namespaces keep their parent's order.
    origin: Arc<str>,
    /// Weight given explicitly in the declaration.
    declared: Option<i64>,
    /// Weight derived from declaration order, used when no rule matches.
    fallback: i64,
    weight: i64,
}

impl ProviderEntry {
    /// An entry with an explicit weight that weight rules never override.
    pub fn new(provider: Arc<dyn ResourceProvider>, weight: i64) -> Self {
        Self {
            origin: Arc::from(provider.location()),
            provider,
            declared: Some(weight),
            fallback: weight,
            weight,
        }
    }

    /// An entry whose weight comes from the rule table, or `fallback` when
    /// no rule matches its location.
    pub fn weighted_by_rules(
        provider: Arc<dyn ResourceProvider>,
        fallback: i64,
        registry: &WeightRegistry,
    ) -> Self {
        let weight = registry.lookup(provider.location()).unwrap_or(fallback);
        Self {
            origin: Arc::from(provider.location()),
            provider,
            declared: None,
            fallback,
            weight,
        }
    }

    /// The terminal null entry, ordered after everything else.
    pub fn terminal() -> Self {
        Self::new(Arc::new(NullProvider), i64::MIN)
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn location(&self) -> &str {
        self.provider.location()
    }

    /// Recompute the weight after the rule table changed.
    pub(crate) fn reweigh(&mut self, registry: &WeightRegistry) {
        self.weight = self
            .declared
            .or_else(|| registry.lookup(&self.origin))
            .unwrap_or(self.fallback);
    }

    /// Same weight, provider rooted at `segment`.
    pub(crate) fn derive(&self, segment: &str) -> Self {
        Self {
            provider: self.provider.child(segment),
            ..self.clone()
        }
    }

    pub fn same_provider(&self, other: &ProviderEntry) -> bool {
        Arc::ptr_eq(&self.provider, &other.provider)
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("location", &self.location())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Sort entries into precedence order: weight descending, then origin
/// location.
///
/// The order is total, so re-sorting never moves equal-weight entries.
pub fn sort_entries(entries: &mut [ProviderEntry]) {
    entries.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.origin.cmp(&b.origin))
    });
}

/// Build a provider from its configuration declaration.
pub fn build_provider(
    decl: &ProviderDecl,
    settings: &Settings,
    registry: &Arc<WeightRegistry>,
) -> ResolveResult<Arc<dyn ResourceProvider>> {
    let root = decl.root.as_deref().map(|root| settings.resolve_path(root));
    let require_root = || {
        root.clone().ok_or_else(|| ResolveError::Config {
            reason: format!("{:?} provider requires a root", decl.kind),
        })
    };

    let provider: Arc<dyn ResourceProvider> = match decl.kind {
        ProviderKind::Filesystem => Arc::new(FsProvider::new(require_root()?, decl.read_only)),
        ProviderKind::Bundle => {
            let manifest = decl.manifest.as_deref().unwrap_or(DEFAULT_MANIFEST);
            let bundles = std::env::split_paths(&require_root()?)
                .map(|dir| Bundle::load(&dir, manifest))
                .collect::<ResolveResult<Vec<_>>>()?;
            Arc::new(BundleProvider::new(bundles, Arc::clone(registry)))
        }
        ProviderKind::Host => {
            let host = Arc::new(DirectoryHost::new(require_root()?, decl.read_only));
            Arc::new(HostProvider::new(host))
        }
        ProviderKind::Naming => {
            let prefix = decl.prefix.as_deref().unwrap_or("STRATA_RES");
            Arc::new(NamingProvider::from_env(prefix))
        }
        ProviderKind::Null => Arc::new(NullProvider),
    };
    Ok(provider)
}

/// `location` + `/` + `path`, without doubling separators.
pub(crate) fn join_location(location: &str, path: &str) -> String {
    if path.is_empty() {
        return location.to_string();
    }
    format!("{}/{}", location.trim_end_matches('/'), path)
}

/// Whether `relative` passes the list pattern.
pub(crate) fn pattern_matches(pattern: Option<&glob::Pattern>, relative: &str) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    if pattern.as_str().contains('/') {
        pattern.matches(relative)
    } else {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        pattern.matches(name)
    }
}

/// Join a provider-relative path onto a directory root.
pub(crate) fn join_root(root: &Path, path: &str) -> PathBuf {
    if path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_entries_is_total() {
        let a: Arc<dyn ResourceProvider> = Arc::new(FsProvider::new("/srv/a", false));
        let b: Arc<dyn ResourceProvider> = Arc::new(FsProvider::new("/srv/b", false));
        let c: Arc<dyn ResourceProvider> = Arc::new(FsProvider::new("/srv/c", false));

        let mut entries = vec![
            ProviderEntry::terminal(),
            ProviderEntry::new(Arc::clone(&b), 5),
            ProviderEntry::new(Arc::clone(&c), 10),
            ProviderEntry::new(Arc::clone(&a), 5),
        ];
        sort_entries(&mut entries);

        let order: Vec<_> = entries.iter().map(|e| e.location().to_string()).collect();
        assert_eq!(order, vec!["fs:/srv/c", "fs:/srv/a", "fs:/srv/b", "null:"]);

        let before: Vec<_> = entries.iter().map(|e| Arc::clone(e.provider())).collect();
        sort_entries(&mut entries);
        for (entry, provider) in entries.iter().zip(&before) {
            assert!(Arc::ptr_eq(entry.provider(), provider));
        }
    }

    #[test]
    fn test_declared_weight_survives_rules() {
        let provider: Arc<dyn ResourceProvider> = Arc::new(FsProvider::new("/srv/a", false));
        let registry = WeightRegistry::with_rules(vec![
            crate::weights::WeightRule::new("srv", 42).unwrap(),
        ]);

        let mut explicit = ProviderEntry::new(Arc::clone(&provider), 1);
        explicit.reweigh(&registry);
        assert_eq!(explicit.weight(), 1);

        let ruled = ProviderEntry::weighted_by_rules(Arc::clone(&provider), 7, &registry);
        assert_eq!(ruled.weight(), 42);

        let mut unruled = ProviderEntry::weighted_by_rules(provider, 7, &WeightRegistry::new());
        assert_eq!(unruled.weight(), 7);
        unruled.reweigh(&registry);
        assert_eq!(unruled.weight(), 42);
    }

    #[test]
    fn test_pattern_matches_name_or_path() {
        let name = glob::Pattern::new("*.xml").unwrap();
        assert!(pattern_matches(Some(&name), "conf/app.xml"));
        assert!(!pattern_matches(Some(&name), "conf/app.toml"));

        let path = glob::Pattern::new("conf/*.xml").unwrap();
        assert!(pattern_matches(Some(&path), "conf/app.xml"));
        assert!(!pattern_matches(Some(&path), "other/app.xml"));

        assert!(pattern_matches(None, "anything"));
    }
}
