//! Read-only provider resolving names through a lookup table.
//!
//! Paths are keys, not locations: `db/url` looks up the name `db/url`.
//! There is nothing to enumerate and nothing to watch.

use std::collections::BTreeMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use super::{Capabilities, ResourceProvider, ResourceReader};
use crate::config::ProviderKind;

#[derive(Debug, Clone)]
pub struct NamingProvider {
    entries: Arc<BTreeMap<String, String>>,
    prefix: String,
    location: String,
}

impl NamingProvider {
    /// A provider over an explicit name table.
    pub fn new(label: &str, entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Arc::new(entries),
            prefix: String::new(),
            location: format!("naming:{label}"),
        }
    }

    /// Bind process environment variables starting with `prefix`.
    ///
    /// `PREFIX_DB_URL` becomes the name `db/url`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let var_prefix = format!("{prefix}_");
        let entries = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(&var_prefix)?;
                if rest.is_empty() {
                    return None;
                }
                Some((rest.to_lowercase().replace('_', "/"), value))
            })
            .collect();
        Self::new(&format!("env:{prefix}"), entries)
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix)
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(&self.key(name)).map(String::as_str)
    }
}

impl ResourceProvider for NamingProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Naming
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ
    }

    fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    fn open_read(&self, path: &str) -> io::Result<Option<ResourceReader>> {
        Ok(self
            .lookup(path)
            .map(|value| Box::new(Cursor::new(value.as_bytes().to_vec())) as ResourceReader))
    }

    fn child(&self, segment: &str) -> Arc<dyn ResourceProvider> {
        let prefix = self.key(segment);
        Arc::new(NamingProvider {
            entries: Arc::clone(&self.entries),
            location: format!("{}/{segment}", self.location),
            prefix,
        })
    }
}
