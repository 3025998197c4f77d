//! Shadow-aware watching of logical resources.
//!
//! Every physical candidate of a resource is watched, not just the copy that
//! currently wins resolution: a lower-precedence copy may start winning once
//! a higher one goes away. A change to a copy that is hidden by a
//! higher-precedence copy is logged and not forwarded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{
    ChangePoller, FileWatcher, PollTask, ResourceHandler, WatchError, WatchEvent, WatchFlow, WatchId,
};
use crate::namespace::{Namespace, ResolvedBinding};
use crate::path::LogicalPath;

struct Binding {
    watcher: Arc<FileWatcher>,
    id: WatchId,
}

pub struct ResourceWatcher {
    namespace: Arc<Namespace>,
    poller: Arc<ChangePoller>,
    handler: Arc<dyn ResourceHandler>,
    continuing: bool,
    delay: Duration,
    bindings: Mutex<IndexMap<String, Binding>>,
}

impl ResourceWatcher {
    /// A watcher with no resources. `handler` receives the registered name
    /// of every visible change.
    pub fn new(
        namespace: Arc<Namespace>,
        poller: Arc<ChangePoller>,
        handler: impl ResourceHandler + 'static,
        continuing: bool,
    ) -> Self {
        Self {
            namespace,
            poller,
            handler: Arc::new(handler),
            continuing,
            delay: Duration::ZERO,
            bindings: Mutex::new(IndexMap::new()),
        }
    }

    /// Minimum time between two checks of each resource; raised to the
    /// poller's minimum when shorter.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Start watching `name`. Watching a name twice rebinds it.
    pub fn watch(&self, name: &str) -> Result<(), WatchError> {
        LogicalPath::parse_name(name)?;
        let candidates = self.namespace.candidates(name)?;
        if candidates.is_empty() {
            tracing::warn!(
                "[watcher] {name} in namespace {} has no watchable location",
                self.namespace.name()
            );
        }

        let watcher = Arc::new(FileWatcher::new(
            format!("{}:{name}", self.namespace.name()),
            self.delay,
            // One-shot is decided per visible change below; shadowed changes
            // must not end the registration
            true,
            self.forwarder(name),
        ));
        for candidate in candidates {
            watcher.add_path(candidate)?;
        }

        let id = self.poller.register(Arc::clone(&watcher) as Arc<dyn PollTask>)?;
        let previous = self
            .bindings
            .lock()
            .insert(name.to_string(), Binding { watcher, id });
        if let Some(previous) = previous {
            self.release(previous);
        }
        crate::debug_event!("watcher", "watching", "{name}");
        Ok(())
    }

    fn forwarder(&self, name: &str) -> impl Fn(&WatchEvent) -> WatchFlow + Send + Sync + 'static {
        let namespace = Arc::clone(&self.namespace);
        let handler = Arc::clone(&self.handler);
        let continuing = self.continuing;
        let name = name.to_string();

        move |event: &WatchEvent| {
            if let Some(shadowing) = namespace.shadow_check(&name, &event.path) {
                tracing::warn!(
                    "[watcher] change to {} ignored, {name} is served from {shadowing}",
                    event.path.display()
                );
                return WatchFlow::Continue;
            }
            handler.on_resource_change(&name);
            if continuing {
                WatchFlow::Continue
            } else {
                WatchFlow::Stop
            }
        }
    }

    fn release(&self, binding: Binding) {
        binding.watcher.exit();
        self.poller.unregister(binding.id);
    }

    /// Stop watching `name`. Returns whether it was watched.
    pub fn unwatch(&self, name: &str) -> bool {
        let removed = self.bindings.lock().shift_remove(name);
        match removed {
            Some(binding) => {
                self.release(binding);
                true
            }
            None => false,
        }
    }

    pub fn unwatch_all(&self) {
        let bindings = std::mem::take(&mut *self.bindings.lock());
        for (_, binding) in bindings {
            self.release(binding);
        }
    }

    /// Rebind every watched name after the namespace's providers changed.
    ///
    /// Returns how many names were rebound; a name that fails is dropped
    /// with a warning.
    pub fn readd(&self) -> usize {
        let names = self.watched_names();
        self.unwatch_all();

        let mut rebound = 0;
        for name in names {
            match self.watch(&name) {
                Ok(()) => rebound += 1,
                Err(e) => tracing::warn!("[watcher] failed to rebind {name}: {e}"),
            }
        }
        crate::debug_event!("watcher", "readd", "{rebound} resources");
        rebound
    }

    /// Names still being watched. One-shot registrations that already fired
    /// are not included.
    pub fn watched_names(&self) -> Vec<String> {
        self.bindings
            .lock()
            .iter()
            .filter(|(_, binding)| !binding.watcher.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Physical paths watched for `name`.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        self.bindings
            .lock()
            .get(name)
            .map(|binding| binding.watcher.paths())
            .unwrap_or_default()
    }

    /// The copy of `name` that resolution currently serves.
    pub fn winner(&self, name: &str) -> Option<ResolvedBinding> {
        self.namespace.resolve_for_read(name)
    }
}

impl Drop for ResourceWatcher {
    fn drop(&mut self) {
        self.unwatch_all();
    }
}

impl std::fmt::Debug for ResourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceWatcher")
            .field("namespace", &self.namespace.name())
            .field("continuing", &self.continuing)
            .field("names", &self.watched_names())
            .finish()
    }
}
