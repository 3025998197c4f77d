//! Hot reload of the weight rule file.
//!
//! Polls the rules file the [`WeightRegistry`] was built from and rebuilds the
//! rule table when it changes, without restarting the poller. A file that
//! fails to parse leaves the previous table in effect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{PollTask, WatchError, WatchFlow, WatchTarget};
use crate::weights::WeightRegistry;

type ReloadCallback = Box<dyn Fn(&WeightRegistry) + Send + Sync>;

pub struct RulesReloader {
    registry: Arc<WeightRegistry>,
    target: Mutex<WatchTarget>,
    delay: Duration,
    on_reload: Option<ReloadCallback>,
}

impl RulesReloader {
    /// `None` when the registry has no rules file.
    pub fn new(registry: Arc<WeightRegistry>, delay: Duration) -> Option<Self> {
        let path = registry.rules_file()?.to_path_buf();
        Some(Self {
            target: Mutex::new(WatchTarget::new(path)),
            registry,
            delay,
            on_reload: None,
        })
    }

    /// Called after every successful reload, e.g. to re-sort namespaces.
    pub fn on_reload(mut self, callback: impl Fn(&WeightRegistry) + Send + Sync + 'static) -> Self {
        self.on_reload = Some(Box::new(callback));
        self
    }

    /// Reload if the file changed since the last check. Returns whether the
    /// rule table was rebuilt.
    pub fn check_and_reload(&self) -> Result<bool, WatchError> {
        let mut target = self.target.lock();
        let Some((kind, state)) = target.detect()? else {
            tracing::trace!("[hot-reload] rules file unchanged");
            return Ok(false);
        };
        // Recorded before parsing so a broken file is not retried every tick
        target.commit(state);
        drop(target);

        crate::log_event!("hot-reload", "rules changed", "{kind:?}");
        match self.registry.reload() {
            Ok(count) => {
                crate::log_event!("hot-reload", "reloaded", "{count} rules");
                if let Some(callback) = &self.on_reload {
                    callback(&self.registry);
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("[hot-reload] keeping previous weight rules: {e}");
                Err(WatchError::ConfigError {
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl PollTask for RulesReloader {
    fn name(&self) -> &str {
        "weight-rules"
    }

    fn delay(&self) -> Duration {
        self.delay
    }

    fn poll(&self) -> Result<WatchFlow, WatchError> {
        self.check_and_reload().map(|_| WatchFlow::Continue)
    }
}
