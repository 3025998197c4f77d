//! Callback traits and event types for watchers.

use std::path::PathBuf;

/// What happened to a watch target between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Did not exist, exists now.
    Added,
    /// Existed and has a newer modification time.
    Modified,
    /// Existed, is gone now.
    Removed,
}

/// A change to one watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Returned by handlers to keep watching or to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchFlow {
    Continue,
    Stop,
}

/// Receives path-level change events from a [`FileWatcher`].
///
/// Implemented for any `Fn(&WatchEvent) -> WatchFlow` closure.
///
/// [`FileWatcher`]: super::FileWatcher
pub trait WatchHandler: Send + Sync {
    /// Handler name for logging.
    fn name(&self) -> &str {
        "callback"
    }

    fn on_change(&self, event: &WatchEvent) -> WatchFlow;
}

impl<F> WatchHandler for F
where
    F: Fn(&WatchEvent) -> WatchFlow + Send + Sync,
{
    fn on_change(&self, event: &WatchEvent) -> WatchFlow {
        self(event)
    }
}

/// Receives resource-level notifications, after shadow filtering.
///
/// Implemented for any `Fn(&str)` closure; the argument is the resource name
/// as it was registered.
pub trait ResourceHandler: Send + Sync {
    fn on_resource_change(&self, name: &str);
}

impl<F> ResourceHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_resource_change(&self, name: &str) {
        self(name)
    }
}
