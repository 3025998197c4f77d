//! Process-wide resolver state.
//!
//! The [`Runtime`] owns the weight registry, the shared change poller and
//! every configured namespace. It is built once at startup and passed by
//! reference; nothing here is a static.

use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::Settings;
use crate::error::{ResolveError, ResolveResult};
use crate::namespace::Namespace;
use crate::watcher::{
    ChangePoller, PollTask, ResourceHandler, ResourceWatcher, RulesReloader, WatchError, WatchId,
};
use crate::weights::WeightRegistry;

pub struct Runtime {
    settings: Settings,
    weights: Arc<WeightRegistry>,
    poller: Arc<ChangePoller>,
    namespaces: IndexMap<String, Arc<Namespace>>,
    resource_watchers: Mutex<Vec<Weak<ResourceWatcher>>>,
    rules_watch: Mutex<Option<WatchId>>,
}

impl Runtime {
    /// Build everything without starting the poller thread. Ticks can be
    /// driven by hand through [`ChangePoller::tick`].
    pub fn new(settings: Settings) -> Result<Arc<Self>, WatchError> {
        let rules_file = settings
            .weights
            .rules_file
            .as_deref()
            .map(|path| settings.resolve_path(path));
        let weights = Arc::new(WeightRegistry::from_config(&settings.weights, rules_file)?);

        let mut namespaces = IndexMap::new();
        for (name, config) in &settings.namespaces {
            let namespace = Namespace::from_config(name, config, &settings, &weights)?;
            crate::debug_event!(
                "runtime",
                "namespace",
                "{name} at {} with {} providers",
                namespace.context(),
                namespace.providers().len()
            );
            namespaces.insert(name.clone(), namespace);
        }

        let poller = Arc::new(ChangePoller::new(&settings.poll));
        let watch_rules = settings.weights.watch_rules_file;
        let delay = Duration::from_millis(settings.poll.interval_ms);

        let runtime = Arc::new(Self {
            settings,
            weights,
            poller,
            namespaces,
            resource_watchers: Mutex::new(Vec::new()),
            rules_watch: Mutex::new(None),
        });

        if watch_rules {
            let weak = Arc::downgrade(&runtime);
            if let Some(reloader) = RulesReloader::new(Arc::clone(&runtime.weights), delay) {
                let reloader = reloader.on_reload(move |registry| {
                    if let Some(runtime) = weak.upgrade() {
                        runtime.apply_weight_rules(registry);
                    }
                });
                let id = runtime.poller.register(Arc::new(reloader) as Arc<dyn PollTask>)?;
                *runtime.rules_watch.lock() = Some(id);
            }
        }

        crate::log_event!(
            "runtime",
            "ready",
            "{} namespaces, {} weight rules",
            runtime.namespaces.len(),
            runtime.weights.rule_count()
        );
        Ok(runtime)
    }

    /// Build everything and start the poller thread.
    pub fn init(settings: Settings) -> Result<Arc<Self>, WatchError> {
        let runtime = Self::new(settings)?;
        runtime.poller.start()?;
        Ok(runtime)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn weights(&self) -> &Arc<WeightRegistry> {
        &self.weights
    }

    pub fn poller(&self) -> &Arc<ChangePoller> {
        &self.poller
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).cloned()
    }

    /// Configured namespaces in declaration order.
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &Arc<Namespace>)> {
        self.namespaces
            .iter()
            .map(|(name, namespace)| (name.as_str(), namespace))
    }

    fn require_namespace(&self, name: &str) -> ResolveResult<Arc<Namespace>> {
        self.namespace(name).ok_or_else(|| ResolveError::Config {
            reason: format!("unknown namespace '{name}'"),
        })
    }

    /// Watch `name` in `namespace`. Dropping the returned watcher stops it.
    pub fn watch_resource(
        &self,
        namespace: &str,
        name: &str,
        handler: impl ResourceHandler + 'static,
        continuing: bool,
    ) -> Result<Arc<ResourceWatcher>, WatchError> {
        let namespace = self.require_namespace(namespace)?;
        let watcher = Arc::new(ResourceWatcher::new(
            namespace,
            Arc::clone(&self.poller),
            handler,
            continuing,
        ));
        watcher.watch(name)?;

        let mut watchers = self.resource_watchers.lock();
        watchers.retain(|weak| weak.strong_count() > 0);
        watchers.push(Arc::downgrade(&watcher));
        Ok(watcher)
    }

    /// Stop every watch on `name`. Returns how many were removed.
    pub fn unwatch_resource(&self, name: &str) -> usize {
        self.live_watchers()
            .iter()
            .filter(|watcher| watcher.unwatch(name))
            .count()
    }

    fn live_watchers(&self) -> Vec<Arc<ResourceWatcher>> {
        let mut watchers = self.resource_watchers.lock();
        watchers.retain(|weak| weak.strong_count() > 0);
        watchers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Change the poll interval. Returns the interval actually applied.
    pub fn set_poll_interval(&self, interval_ms: u64) -> Duration {
        self.poller.set_poll_interval(interval_ms)
    }

    /// Reload weight rules now and re-sort every namespace.
    pub fn reload_weights(&self) -> ResolveResult<usize> {
        let count = self.weights.reload()?;
        self.apply_weight_rules(&self.weights);
        Ok(count)
    }

    /// Re-sort namespaces by `registry` and rebind resource watchers so
    /// they follow the new candidate order.
    ///
    /// Only the configured namespaces are re-sorted. Child namespaces a
    /// caller derived earlier keep the old order; call
    /// [`Namespace::resort`] on them or derive them again.
    pub fn apply_weight_rules(&self, registry: &WeightRegistry) {
        for namespace in self.namespaces.values() {
            namespace.resort(registry);
        }
        let rebound: usize = self
            .live_watchers()
            .iter()
            .map(|watcher| watcher.readd())
            .sum();
        crate::log_event!(
            "runtime",
            "weights applied",
            "{} namespaces, {rebound} resources rebound",
            self.namespaces.len()
        );
    }

    /// Cancel the poller and join its thread.
    pub fn shutdown(&self) {
        if self.poller.is_cancelled() {
            return;
        }
        if let Some(id) = self.rules_watch.lock().take() {
            self.poller.unregister(id);
        }
        self.poller.cancel();
        crate::log_event!("runtime", "shutdown");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .field("rules", &self.weights.rule_count())
            .field("watchers", &self.poller.watcher_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NamespaceConfig, ProviderDecl};
    use std::fs;
    use tempfile::TempDir;

    fn settings(temp: &TempDir) -> Settings {
        let mut settings = Settings {
            workspace_root: Some(temp.path().to_path_buf()),
            ..Settings::default()
        };
        settings.poll.min_interval_ms = 1;
        settings.poll.interval_ms = 1;
        settings.weights.rules_file = Some("weights.toml".into());
        settings.namespaces.insert(
            "config".to_string(),
            NamespaceConfig {
                context: "/".to_string(),
                providers: vec![ProviderDecl::filesystem("a"), ProviderDecl::filesystem("b")],
            },
        );
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        settings
    }

    #[test]
    fn test_declaration_order_without_rules() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);
        fs::write(temp.path().join("a/app.toml"), "a").unwrap();
        fs::write(temp.path().join("b/app.toml"), "b").unwrap();

        let runtime = Runtime::new(settings).unwrap();
        let ns = runtime.namespace("config").unwrap();
        assert_eq!(ns.read_to_string("app.toml").unwrap().unwrap(), "a");
        assert!(runtime.namespace("missing").is_none());
        assert!(matches!(
            runtime.watch_resource("missing", "x", |_: &str| {}, true),
            Err(WatchError::Resolve(ResolveError::Config { .. }))
        ));
    }

    #[test]
    fn test_reload_weights_resorts_namespaces() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);
        fs::write(temp.path().join("a/app.toml"), "a").unwrap();
        fs::write(temp.path().join("b/app.toml"), "b").unwrap();

        let runtime = Runtime::new(settings).unwrap();
        let watcher = runtime
            .watch_resource("config", "app.toml", |_: &str| {}, true)
            .unwrap();

        fs::write(
            temp.path().join("weights.toml"),
            "[[rule]]\npattern = \"/b$\"\nweight = 100\n",
        )
        .unwrap();
        assert_eq!(runtime.reload_weights().unwrap(), 1);

        let ns = runtime.namespace("config").unwrap();
        assert_eq!(ns.read_to_string("app.toml").unwrap().unwrap(), "b");
        let candidates = watcher.candidates("app.toml");
        assert!(candidates[0].ends_with("b/app.toml"));

        assert_eq!(runtime.unwatch_resource("app.toml"), 1);
        assert_eq!(runtime.unwatch_resource("app.toml"), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let runtime = Runtime::init(settings(&temp)).unwrap();
        assert!(runtime.poller().is_running());
        runtime.shutdown();
        runtime.shutdown();
        assert!(!runtime.poller().is_running());
        assert_eq!(runtime.set_poll_interval(0), Duration::from_millis(1));
    }
}
