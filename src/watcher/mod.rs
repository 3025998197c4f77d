//! Polling change notification for watched resources.
//!
//! # Architecture
//!
//! ```text
//! ChangePoller (one background thread, fixed interval)
//!   - copy-on-write list of PollTasks
//!   - removals applied after each tick
//!         |
//!    +----------------+-----------------+
//!    |                |                 |
//! FileWatcher     FileWatcher      RulesReloader
//! (WatchTargets)  (per resource)   (weight rules file)
//!                     |
//!              ResourceWatcher
//!              (shadow filtering)
//! ```

mod error;
mod file;
mod handler;
mod hot_reload;
mod poller;
mod resource;
mod target;

pub use error::WatchError;
pub use file::FileWatcher;
pub use handler::{ChangeKind, ResourceHandler, WatchEvent, WatchFlow, WatchHandler};
pub use hot_reload::RulesReloader;
pub use poller::{ChangePoller, PollTask, TickSummary, WatchId};
pub use resource::ResourceWatcher;
pub use target::{TargetState, WatchTarget};
