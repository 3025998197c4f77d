pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod namespace;
pub mod path;
pub mod provider;
pub mod runtime;
pub mod watcher;
pub mod weights;

pub use config::Settings;
pub use error::{ResolveError, ResolveResult};
pub use namespace::{Namespace, ResolvedBinding, Resource};
pub use path::LogicalPath;
pub use provider::{Capabilities, ProviderEntry, ResourceProvider};
pub use runtime::Runtime;
pub use watcher::{ChangeKind, ChangePoller, FileWatcher, ResourceWatcher, WatchError, WatchEvent, WatchFlow};
pub use weights::{WeightRegistry, WeightRule};
