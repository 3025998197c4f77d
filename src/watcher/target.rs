//! A single watched file or directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::{ChangeKind, WatchError};

/// Existence and modification time of a path at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetState {
    pub exists: bool,
    pub modified: Option<SystemTime>,
}

impl TargetState {
    pub const MISSING: TargetState = TargetState {
        exists: false,
        modified: None,
    };

    /// Current state of `path`.
    ///
    /// A directory reports the newest modification time among itself and
    /// every readable descendant; unreadable descendants are skipped.
    pub fn observe(path: &Path) -> Result<Self, WatchError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::MISSING),
            Err(e) => {
                return Err(WatchError::DetectionFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let modified = if metadata.is_dir() {
            newest_in_tree(path, metadata.modified().ok())
        } else {
            metadata.modified().ok()
        };

        Ok(Self {
            exists: true,
            modified,
        })
    }

    /// Classify the transition from `self` to `current`.
    pub fn change_to(&self, current: &TargetState) -> Option<ChangeKind> {
        match (self.exists, current.exists) {
            (false, true) => Some(ChangeKind::Added),
            (true, false) => Some(ChangeKind::Removed),
            (true, true) if current.modified > self.modified => Some(ChangeKind::Modified),
            _ => None,
        }
    }
}

fn newest_in_tree(dir: &Path, own: Option<SystemTime>) -> Option<SystemTime> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
        .fold(own, |newest, modified| match newest {
            Some(current) if current >= modified => Some(current),
            _ => Some(modified),
        })
}

#[derive(Debug, Clone)]
pub struct WatchTarget {
    path: PathBuf,
    state: TargetState,
}

impl WatchTarget {
    /// Start tracking `path` from its current state.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = TargetState::observe(&path).unwrap_or_else(|e| {
            tracing::warn!("[watcher] {e}");
            TargetState::MISSING
        });
        Self { path, state }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn existed(&self) -> bool {
        self.state.exists
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.state.modified
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    /// Compare the stored state with the path's current state.
    ///
    /// Returns the change and the observed state; the stored state is left
    /// alone until [`WatchTarget::commit`].
    pub fn detect(&self) -> Result<Option<(ChangeKind, TargetState)>, WatchError> {
        let current = TargetState::observe(&self.path)?;
        Ok(self.state.change_to(&current).map(|kind| (kind, current)))
    }

    pub fn commit(&mut self, state: TargetState) {
        self.state = state;
    }

    /// Adopt the current state without reporting a change.
    pub fn mark_up_to_date(&mut self) -> Result<(), WatchError> {
        self.state = TargetState::observe(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_added_then_quiet() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.txt");
        let mut target = WatchTarget::new(&path);
        assert!(!target.existed());
        assert!(target.detect().unwrap().is_none());

        fs::write(&path, "x").unwrap();
        let (kind, state) = target.detect().unwrap().unwrap();
        assert_eq!(kind, ChangeKind::Added);
        target.commit(state);

        assert!(target.detect().unwrap().is_none());
        assert!(target.detect().unwrap().is_none());
    }

    #[test]
    fn test_modified_and_removed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, "x").unwrap();
        let base = SystemTime::now() - Duration::from_secs(60);
        set_mtime(&path, base);

        let mut target = WatchTarget::new(&path);
        set_mtime(&path, base + Duration::from_secs(5));
        let (kind, state) = target.detect().unwrap().unwrap();
        assert_eq!(kind, ChangeKind::Modified);
        target.commit(state);

        // An older timestamp is not a modification
        set_mtime(&path, base);
        assert!(target.detect().unwrap().is_none());

        fs::remove_file(&path).unwrap();
        assert_eq!(target.detect().unwrap().unwrap().0, ChangeKind::Removed);
    }

    #[test]
    fn test_directory_uses_newest_descendant() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("d");
        fs::create_dir_all(dir.join("nested")).unwrap();
        let file = dir.join("nested").join("a.txt");
        fs::write(&file, "x").unwrap();

        let base = SystemTime::now() - Duration::from_secs(120);
        set_mtime(&file, base);
        let target = WatchTarget::new(&dir);

        let later = SystemTime::now() + Duration::from_secs(60);
        set_mtime(&file, later);
        let (kind, state) = target.detect().unwrap().unwrap();
        assert_eq!(kind, ChangeKind::Modified);
        assert_eq!(state.modified, Some(later));
    }
}
