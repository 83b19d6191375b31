pub mod auth;
pub mod backoff;
pub mod batch;
pub mod config;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod logging;
pub mod notifier;
pub mod remote;
pub mod router;
pub mod status;
pub mod watch;
pub mod watcher;

pub use config::{BackoffConfig, WatcherConfig};
pub use error::{FilewatchError, Result};
pub use watcher::Watcher;
