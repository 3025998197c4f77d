//! Ordered-provider resolver rooted at a logical context.
//!
//! A [`Namespace`] holds its providers sorted by weight (descending) with a
//! deterministic tie-break, always terminated by a [`NullProvider`] entry.
//! Reads go to the first provider holding the path. Writes go to the reader
//! when it can write, otherwise to the nearest writable provider *above* it,
//! so written content is what the next read finds.
//!
//! The provider list is replaced wholesale under a lock on reconfiguration;
//! resolution works on a snapshot and never sees a half-updated list.
//!
//! [`NullProvider`]: crate::provider::NullProvider

use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{NamespaceConfig, ProviderKind, Settings};
use crate::error::{ResolveError, ResolveResult};
use crate::path::LogicalPath;
use crate::provider::{
    ProviderEntry, ResourceProvider, ResourceReader, ResourceWriter, build_provider,
    join_location, sort_entries,
};
use crate::weights::WeightRegistry;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Outcome of resolving a logical path to one provider.
#[derive(Clone)]
pub struct ResolvedBinding {
    entry: ProviderEntry,
    /// Path relative to the provider root.
    path: String,
    logical: LogicalPath,
}

impl ResolvedBinding {
    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        self.entry.provider()
    }

    pub fn weight(&self) -> i64 {
        self.entry.weight()
    }

    pub fn logical_path(&self) -> &LogicalPath {
        &self.logical
    }

    pub fn provider_path(&self) -> &str {
        &self.path
    }

    /// Location identifier of the bound copy.
    pub fn location(&self) -> String {
        self.provider()
            .locations(&self.path)
            .into_iter()
            .next()
            .unwrap_or_else(|| join_location(self.entry.location(), &self.path))
    }

    /// On-disk path of the bound copy, when the provider has one.
    pub fn physical(&self) -> Option<PathBuf> {
        self.provider().resolve_physical(&self.path)
    }

    pub fn same_provider(&self, other: &ResolvedBinding) -> bool {
        self.entry.same_provider(&other.entry)
    }

    pub fn open_read(&self) -> ResolveResult<Option<ResourceReader>> {
        self.provider()
            .open_read(&self.path)
            .map_err(|e| ResolveError::io(self.location(), e))
    }

    pub fn open_write(&self) -> ResolveResult<ResourceWriter> {
        self.provider()
            .open_write(&self.path)
            .map_err(|e| ResolveError::io(self.location(), e))?
            .ok_or_else(|| ResolveError::WriteUnsupported {
                path: self.logical.to_string(),
            })
    }
}

impl fmt::Debug for ResolvedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBinding")
            .field("logical", &self.logical.to_string())
            .field("location", &self.location())
            .field("weight", &self.weight())
            .finish()
    }
}

/// Where a path is served from.
enum Route {
    Local { relative: String, absolute: LogicalPath },
    Parent(Arc<Namespace>, LogicalPath),
}

pub struct Namespace {
    name: String,
    context: LogicalPath,
    providers: RwLock<Arc<Vec<ProviderEntry>>>,
    /// Children hold their parent alive; a parent never holds its children.
    parent: Option<Arc<Namespace>>,
}

impl Namespace {
    /// Create a top-level namespace. Entries are sorted and terminated.
    pub fn new(
        name: impl Into<String>,
        context: &str,
        entries: Vec<ProviderEntry>,
    ) -> ResolveResult<Arc<Self>> {
        let context = LogicalPath::parse(context)?.resolve_against(&LogicalPath::root())?;
        Ok(Arc::new(Self {
            name: name.into(),
            context,
            providers: RwLock::new(Arc::new(prepare(entries))),
            parent: None,
        }))
    }

    /// Build a namespace from its configuration.
    ///
    /// Providers without an explicit weight take the weight of the first
    /// matching rule, or a fallback that decreases with declaration order.
    pub fn from_config(
        name: &str,
        config: &NamespaceConfig,
        settings: &Settings,
        registry: &Arc<WeightRegistry>,
    ) -> ResolveResult<Arc<Self>> {
        let count = config.providers.len() as i64;
        let mut entries = Vec::with_capacity(config.providers.len());

        for (index, decl) in config.providers.iter().enumerate() {
            if decl.kind == ProviderKind::Null {
                continue;
            }
            let provider = build_provider(decl, settings, registry)?;
            let entry = match decl.weight {
                Some(weight) => ProviderEntry::new(provider, weight),
                None => ProviderEntry::weighted_by_rules(provider, count - index as i64, registry),
            };
            crate::debug_event!(
                "namespace",
                "provider",
                "{name}: {} weight {}",
                entry.location(),
                entry.weight()
            );
            entries.push(entry);
        }

        Self::new(name, &config.context, entries)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &LogicalPath {
        &self.context
    }

    /// Snapshot of the ordered provider list.
    pub fn providers(&self) -> Arc<Vec<ProviderEntry>> {
        Arc::clone(&self.providers.read())
    }

    pub fn parent_namespace(&self) -> Option<Arc<Namespace>> {
        self.parent.clone()
    }

    fn route(&self, raw: &str) -> ResolveResult<Route> {
        let absolute = LogicalPath::parse(raw)?.resolve_against(&self.context)?;
        match absolute.relative_to(&self.context) {
            Some(relative) => Ok(Route::Local { relative, absolute }),
            None => match &self.parent {
                Some(parent) => Ok(Route::Parent(Arc::clone(parent), absolute)),
                None => Err(ResolveError::malformed(
                    raw,
                    format!("outside namespace context {}", self.context),
                )),
            },
        }
    }

    fn read_index(providers: &[ProviderEntry], relative: &str) -> Option<usize> {
        providers.iter().position(|entry| {
            let provider = entry.provider();
            provider.can_read() && provider.exists(relative)
        })
    }

    /// First provider holding `path`, or `None` when nobody has it.
    pub fn resolve_for_read(&self, path: &str) -> Option<ResolvedBinding> {
        match self.route(path) {
            Ok(Route::Local { relative, absolute }) => {
                let providers = self.providers();
                let index = Self::read_index(&providers, &relative)?;
                let binding = ResolvedBinding {
                    entry: providers[index].clone(),
                    path: relative,
                    logical: absolute,
                };
                crate::debug_event!("namespace", "resolved", "{path} -> {}", binding.location());
                Some(binding)
            }
            Ok(Route::Parent(parent, absolute)) => parent.resolve_for_read(&absolute.to_string()),
            Err(e) => {
                crate::debug_event!("namespace", "unresolvable", "{e}");
                None
            }
        }
    }

    /// Provider a write to `path` must go to.
    ///
    /// The current reader when it can write; otherwise the nearest writable
    /// provider with higher precedence than the reader. When no such provider
    /// exists the first writable one below the reader is used.
    pub fn resolve_for_write(&self, path: &str) -> ResolveResult<ResolvedBinding> {
        LogicalPath::parse_name(path)?;
        let (relative, absolute) = match self.route(path)? {
            Route::Local { relative, absolute } => (relative, absolute),
            Route::Parent(parent, absolute) => {
                return parent.resolve_for_write(&absolute.to_string());
            }
        };

        let providers = self.providers();
        let reader = Self::read_index(&providers, &relative).unwrap_or(providers.len());

        let writable = |i: &usize| providers[*i].provider().can_write();
        let writer = if reader < providers.len() && writable(&reader) {
            Some(reader)
        } else {
            (0..reader).rev().find(writable).or_else(|| {
                // Nothing at or above the reader can write; the copy written
                // below it stays hidden until the reader's copy goes away
                let below = (reader + 1..providers.len()).find(writable)?;
                tracing::warn!(
                    "[namespace] write to {absolute} goes below the current reader to {}",
                    providers[below].location()
                );
                Some(below)
            })
        };

        match writer {
            Some(index) => Ok(ResolvedBinding {
                entry: providers[index].clone(),
                path: relative,
                logical: absolute,
            }),
            None => Err(ResolveError::WriteUnsupported {
                path: absolute.to_string(),
            }),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve_for_read(path).is_some()
    }

    /// Merged listing of every enumerable provider at the context root.
    pub fn list(&self, pattern: Option<&str>, recursive: bool) -> ResolveResult<Vec<String>> {
        self.list_in("", pattern, recursive)
    }

    /// Merged listing under `dir`, deduplicated and sorted.
    ///
    /// A provider that fails to enumerate is skipped with a warning.
    pub fn list_in(
        &self,
        dir: &str,
        pattern: Option<&str>,
        recursive: bool,
    ) -> ResolveResult<Vec<String>> {
        let pattern = pattern
            .map(|raw| {
                glob::Pattern::new(raw).map_err(|e| ResolveError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let relative = match self.route(dir)? {
            Route::Local { relative, .. } => relative,
            Route::Parent(parent, absolute) => {
                return parent.list_in(
                    &absolute.to_string(),
                    pattern.as_ref().map(glob::Pattern::as_str),
                    recursive,
                );
            }
        };

        let mut merged = BTreeSet::new();
        for entry in self.providers().iter() {
            if !entry.provider().can_enumerate() {
                continue;
            }
            match entry.provider().list(&relative, pattern.as_ref(), recursive) {
                Ok(found) => merged.extend(found),
                Err(e) => {
                    tracing::warn!("[namespace] listing {} failed: {e}", entry.location());
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// On-disk locations of `path` across all providers, in precedence
    /// order, whether or not each copy exists yet.
    pub fn candidates(&self, path: &str) -> ResolveResult<Vec<PathBuf>> {
        let relative = match self.route(path)? {
            Route::Local { relative, .. } => relative,
            Route::Parent(parent, absolute) => return parent.candidates(&absolute.to_string()),
        };

        let mut found: Vec<PathBuf> = Vec::new();
        for entry in self.providers().iter() {
            if let Some(physical) = entry.provider().resolve_physical(&relative) {
                if !found.contains(&physical) {
                    found.push(physical);
                }
            }
        }
        Ok(found)
    }

    /// Whether a change at `changed` is hidden by a higher-precedence copy
    /// of `path`. Returns the shadowing location, or `None` when the change
    /// is visible.
    pub fn shadow_check(&self, path: &str, changed: &Path) -> Option<String> {
        let relative = match self.route(path) {
            Ok(Route::Local { relative, .. }) => relative,
            Ok(Route::Parent(parent, absolute)) => {
                return parent.shadow_check(&absolute.to_string(), changed);
            }
            Err(_) => return None,
        };

        for entry in self.providers().iter() {
            let provider = entry.provider();
            if provider.resolve_physical(&relative).as_deref() == Some(changed) {
                return None;
            }
            if provider.can_read() && provider.exists(&relative) {
                return Some(join_location(provider.location(), &relative));
            }
        }
        None
    }

    /// Derive the namespace rooted at `segment` below this one.
    ///
    /// `..` returns the parent namespace itself. Multi-segment paths are
    /// walked one segment at a time.
    pub fn child_namespace(self: &Arc<Self>, segment: &str) -> ResolveResult<Arc<Namespace>> {
        let trimmed = segment.trim().trim_matches('/');
        let path = LogicalPath::parse(trimmed)?;
        if path.segments().is_empty() {
            return Err(ResolveError::malformed(segment, "empty namespace segment"));
        }

        let mut current = Arc::clone(self);
        for part in path.segments() {
            current = if part == ".." {
                current
                    .parent_namespace()
                    .ok_or_else(|| ResolveError::malformed(segment, "namespace has no parent"))?
            } else {
                current.derive(part)?
            };
        }
        Ok(current)
    }

    fn derive(self: &Arc<Self>, segment: &str) -> ResolveResult<Arc<Namespace>> {
        let context = self.context.join(segment)?;
        // Entry origins carry over, so the derived list keeps this order
        let entries: Vec<ProviderEntry> =
            self.providers().iter().map(|entry| entry.derive(segment)).collect();

        Ok(Arc::new(Namespace {
            name: self.name.clone(),
            context,
            providers: RwLock::new(Arc::new(entries)),
            parent: Some(Arc::clone(self)),
        }))
    }

    /// Replace the provider list.
    pub fn reconfigure(&self, entries: Vec<ProviderEntry>) {
        let prepared = Arc::new(prepare(entries));
        *self.providers.write() = prepared;
        crate::log_event!("namespace", "reconfigured", "{}", self.name);
    }

    pub fn add_provider(&self, entry: ProviderEntry) {
        let mut guard = self.providers.write();
        let mut entries: Vec<ProviderEntry> = guard.iter().cloned().collect();
        entries.push(entry);
        *guard = Arc::new(prepare(entries));
    }

    /// Remove every provider at `location`. Returns whether any was removed.
    pub fn remove_provider(&self, location: &str) -> bool {
        let mut guard = self.providers.write();
        let before = guard.len();
        let entries: Vec<ProviderEntry> = guard
            .iter()
            .filter(|entry| entry.location() != location)
            .cloned()
            .collect();
        let removed = entries.len() != before;
        *guard = Arc::new(prepare(entries));
        removed
    }

    /// Re-apply weight rules after the rule table changed.
    ///
    /// Only this namespace is re-sorted. Children derived earlier keep
    /// their own snapshot of the old order until they are re-sorted or
    /// derived again.
    pub fn resort(&self, registry: &WeightRegistry) {
        let mut guard = self.providers.write();
        let mut entries: Vec<ProviderEntry> = guard.iter().cloned().collect();
        for entry in &mut entries {
            entry.reweigh(registry);
        }
        *guard = Arc::new(prepare(entries));
    }

    pub fn read_to_vec(&self, path: &str) -> ResolveResult<Option<Vec<u8>>> {
        let Some(binding) = self.resolve_for_read(path) else {
            return Ok(None);
        };
        let Some(mut reader) = binding.open_read()? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| ResolveError::io(binding.location(), e))?;
        Ok(Some(bytes))
    }

    /// Read `path` as UTF-8 text, dropping a leading byte order mark.
    pub fn read_to_string(&self, path: &str) -> ResolveResult<Option<String>> {
        let Some(bytes) = self.read_to_vec(path)? else {
            return Ok(None);
        };
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes).to_vec();
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| ResolveError::Encoding {
                path: path.to_string(),
            })
    }

    /// Write `content` to the provider chosen by [`Namespace::resolve_for_write`].
    pub fn write_all(&self, path: &str, content: &[u8]) -> ResolveResult<ResolvedBinding> {
        let binding = self.resolve_for_write(path)?;
        let mut writer = binding.open_write()?;
        writer
            .write_all(content)
            .and_then(|_| writer.flush())
            .map_err(|e| ResolveError::io(binding.location(), e))?;
        Ok(binding)
    }

    /// Buffered text reader positioned after any byte order mark.
    pub fn open_reader(&self, name: &str) -> ResolveResult<Option<BufReader<ResourceReader>>> {
        let Some(binding) = self.resolve_for_read(name) else {
            return Ok(None);
        };
        let Some(reader) = binding.open_read()? else {
            return Ok(None);
        };
        let mut reader = BufReader::new(reader);
        let starts_with_bom = reader
            .fill_buf()
            .map_err(|e| ResolveError::io(binding.location(), e))?
            .starts_with(UTF8_BOM);
        if starts_with_bom {
            reader.consume(UTF8_BOM.len());
        }
        Ok(Some(reader))
    }

    pub fn open_writer(&self, name: &str) -> ResolveResult<BufWriter<ResourceWriter>> {
        let binding = self.resolve_for_write(name)?;
        Ok(BufWriter::new(binding.open_write()?))
    }

    /// Handle to a named resource in this namespace.
    pub fn create_resource(self: &Arc<Self>, name: &str) -> ResolveResult<Resource> {
        let path = LogicalPath::parse_name(name)?.resolve_against(&self.context)?;
        Ok(Resource {
            namespace: Arc::clone(self),
            path,
        })
    }
}

/// Append the terminal entry if missing and sort.
fn prepare(mut entries: Vec<ProviderEntry>) -> Vec<ProviderEntry> {
    if !entries
        .iter()
        .any(|entry| entry.provider().kind() == ProviderKind::Null)
    {
        entries.push(ProviderEntry::terminal());
    }
    sort_entries(&mut entries);
    entries
}

impl PartialEq for Namespace {
    /// Same context and the very same providers in the same order.
    fn eq(&self, other: &Self) -> bool {
        if self.context != other.context {
            return false;
        }
        let ours = self.providers();
        let theirs = other.providers();
        ours.len() == theirs.len()
            && ours.iter().zip(theirs.iter()).all(|(a, b)| a.same_provider(b))
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("context", &self.context.to_string())
            .field("providers", &self.providers())
            .finish()
    }
}

/// A named resource bound to a namespace, resolved on every access.
#[derive(Clone, Debug)]
pub struct Resource {
    namespace: Arc<Namespace>,
    path: LogicalPath,
}

impl Resource {
    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn exists(&self) -> bool {
        self.namespace.exists(&self.path.to_string())
    }

    pub fn binding(&self) -> Option<ResolvedBinding> {
        self.namespace.resolve_for_read(&self.path.to_string())
    }

    pub fn open_read(&self) -> ResolveResult<Option<ResourceReader>> {
        match self.binding() {
            Some(binding) => binding.open_read(),
            None => Ok(None),
        }
    }

    pub fn open_write(&self) -> ResolveResult<ResourceWriter> {
        self.namespace
            .resolve_for_write(&self.path.to_string())?
            .open_write()
    }

    pub fn read_to_string(&self) -> ResolveResult<Option<String>> {
        self.namespace.read_to_string(&self.path.to_string())
    }
}
