//! Path-level watcher evaluated by the [`ChangePoller`].
//!
//! Paths added or removed between ticks are queued and applied at the next
//! tick boundary, so a detection pass never sees its target list change.
//!
//! [`ChangePoller`]: super::ChangePoller

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{PollTask, WatchError, WatchEvent, WatchFlow, WatchHandler, WatchTarget};

enum PendingOp {
    Add(WatchTarget),
    Remove(PathBuf),
}

pub struct FileWatcher {
    name: String,
    delay: Duration,
    continuing: bool,
    handler: Box<dyn WatchHandler>,
    targets: Mutex<IndexMap<PathBuf, WatchTarget>>,
    pending: Mutex<Vec<PendingOp>>,
    exit: AtomicBool,
    finished: AtomicBool,
}

impl FileWatcher {
    /// A watcher with no paths.
    ///
    /// In continuing mode each change re-arms the target; otherwise the
    /// watcher finishes after the first notification.
    pub fn new(
        name: impl Into<String>,
        delay: Duration,
        continuing: bool,
        handler: impl WatchHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            delay,
            continuing,
            handler: Box::new(handler),
            targets: Mutex::new(IndexMap::new()),
            pending: Mutex::new(Vec::new()),
            exit: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Queue `path` for watching. Its current state is the baseline, so a
    /// file that exists now is not reported as added.
    pub fn add_path(&self, path: impl Into<PathBuf>) -> Result<(), WatchError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(WatchError::PathWatchFailed {
                path,
                reason: "empty path".to_string(),
            });
        }
        self.pending.lock().push(PendingOp::Add(WatchTarget::new(path)));
        Ok(())
    }

    /// Queue `path` for removal.
    pub fn remove_path(&self, path: impl AsRef<Path>) {
        self.pending
            .lock()
            .push(PendingOp::Remove(path.as_ref().to_path_buf()));
    }

    /// Watched paths, including queued additions not yet applied.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.targets.lock().keys().cloned().collect();
        for op in self.pending.lock().iter() {
            match op {
                PendingOp::Add(target) => {
                    if !paths.iter().any(|p| p == target.path()) {
                        paths.push(target.path().to_path_buf());
                    }
                }
                PendingOp::Remove(path) => paths.retain(|p| p != path),
            }
        }
        paths
    }

    /// Adopt the current state of every target without reporting changes.
    pub fn mark_up_to_date(&self) {
        self.apply_pending_ops();
        for target in self.targets.lock().values_mut() {
            if let Err(e) = target.mark_up_to_date() {
                tracing::warn!("[watcher] {}: {e}", self.name);
            }
        }
    }

    /// Ask the poller to drop this watcher at the next tick.
    pub fn exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_continuing(&self) -> bool {
        self.continuing
    }

    fn apply_pending_ops(&self) {
        let ops = std::mem::take(&mut *self.pending.lock());
        if ops.is_empty() {
            return;
        }
        let mut targets = self.targets.lock();
        for op in ops {
            match op {
                PendingOp::Add(target) => {
                    targets
                        .entry(target.path().to_path_buf())
                        .or_insert(target);
                }
                PendingOp::Remove(path) => {
                    targets.shift_remove(&path);
                }
            }
        }
    }

    /// Run detection over every target and notify the handler.
    pub fn check(&self) -> Result<WatchFlow, WatchError> {
        self.apply_pending_ops();

        let mut changes = Vec::new();
        {
            let targets = self.targets.lock();
            for target in targets.values() {
                match target.detect() {
                    Ok(Some((kind, state))) => changes.push((target.path().to_path_buf(), kind, state)),
                    Ok(None) => {}
                    // Treated as no change for this target only
                    Err(e) => tracing::warn!("[watcher] {}: {e}", self.name),
                }
            }
        }

        for (path, kind, state) in changes {
            crate::debug_event!("watcher", "change", "{} {kind:?} {}", self.name, path.display());
            let flow = self.handler.on_change(&WatchEvent {
                path: path.clone(),
                kind,
            });

            if !self.continuing || flow == WatchFlow::Stop {
                self.finished.store(true, Ordering::SeqCst);
                return Ok(WatchFlow::Stop);
            }
            if let Some(target) = self.targets.lock().get_mut(&path) {
                target.commit(state);
            }
        }

        Ok(WatchFlow::Continue)
    }
}

impl PollTask for FileWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn delay(&self) -> Duration {
        self.delay
    }

    fn poll(&self) -> Result<WatchFlow, WatchError> {
        if self.is_finished() {
            return Ok(WatchFlow::Stop);
        }
        self.check()
    }

    fn apply_pending(&self) {
        self.apply_pending_ops();
    }

    fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("name", &self.name)
            .field("handler", &self.handler.name())
            .field("continuing", &self.continuing)
            .field("paths", &self.paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ChangeKind;
    use std::fs;
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn recorder() -> (Arc<Mutex<Vec<WatchEvent>>>, impl WatchHandler + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handler = move |event: &WatchEvent| {
            sink.lock().push(event.clone());
            WatchFlow::Continue
        };
        (events, handler)
    }

    fn touch_later(path: &Path, secs: u64) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_added_fires_once_in_continuing_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.txt");
        let (events, handler) = recorder();
        let watcher = FileWatcher::new("late", Duration::ZERO, true, handler);
        watcher.add_path(&path).unwrap();

        assert_eq!(watcher.check().unwrap(), WatchFlow::Continue);
        fs::write(&path, "x").unwrap();
        watcher.check().unwrap();
        watcher.check().unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Added);
    }

    #[test]
    fn test_one_shot_stops_after_first_change() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        let (events, handler) = recorder();
        let watcher = FileWatcher::new("once", Duration::ZERO, false, handler);
        watcher.add_path(&path).unwrap();
        watcher.check().unwrap();

        touch_later(&path, 10);
        assert_eq!(watcher.check().unwrap(), WatchFlow::Stop);
        assert!(watcher.is_finished());
        assert_eq!(watcher.poll().unwrap(), WatchFlow::Stop);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_removal_is_deferred_to_tick_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        let (events, handler) = recorder();
        let watcher = FileWatcher::new("rm", Duration::ZERO, true, handler);
        watcher.add_path(&path).unwrap();
        watcher.check().unwrap();

        watcher.remove_path(&path);
        assert!(watcher.paths().is_empty());
        touch_later(&path, 10);
        watcher.check().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_mark_up_to_date_swallows_changes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        let (events, handler) = recorder();
        let watcher = FileWatcher::new("quiet", Duration::ZERO, true, handler);
        watcher.add_path(&path).unwrap();

        fs::write(&path, "x").unwrap();
        watcher.mark_up_to_date();
        watcher.check().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_empty_path_rejected() {
        let watcher = FileWatcher::new("bad", Duration::ZERO, true, |_: &WatchEvent| {
            WatchFlow::Continue
        });
        assert!(matches!(
            watcher.add_path(""),
            Err(WatchError::PathWatchFailed { .. })
        ));
        watcher.exit();
        assert!(watcher.exit_requested());
    }
}
