//! Terminal provider that holds nothing.

use std::io;
use std::sync::Arc;

use super::{Capabilities, ResourceProvider, ResourceReader};
use crate::config::ProviderKind;

/// Answers absent, unsupported or empty to everything. Every namespace ends
/// with one so resolution never runs off the end of the provider list.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

impl ResourceProvider for NullProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Null
    }

    fn location(&self) -> &str {
        "null:"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn exists(&self, _path: &str) -> bool {
        false
    }

    fn open_read(&self, _path: &str) -> io::Result<Option<ResourceReader>> {
        Ok(None)
    }

    fn child(&self, _segment: &str) -> Arc<dyn ResourceProvider> {
        Arc::new(NullProvider)
    }
}
