use crate::error::WatchResult;
use crate::models::{ProjectToWatch, WatchEventEntry};
use std::sync::Arc;

/// Receives everything a [`WatchService`] observes.
///
/// Callbacks may arrive on any thread and must not block on network I/O.
pub trait WatchEventListener: Send + Sync {
    fn on_events(&self, events: Vec<WatchEventEntry>);

    fn on_subscribe_result(&self, project: &ProjectToWatch, success: bool);
}

/// Host-specific change detector.
///
/// `subscribe` returns `Err` only when it could not even start and has not
/// reported anything; every other outcome is delivered once through
/// [`WatchEventListener::on_subscribe_result`].
pub trait WatchService: Send + Sync {
    fn set_listener(&self, listener: Arc<dyn WatchEventListener>);

    fn subscribe(&self, project: &ProjectToWatch) -> WatchResult<()>;

    fn unsubscribe(&self, project: &ProjectToWatch);

    fn dispose(&self);

    /// Human-readable state for diagnostics dumps.
    fn debug_state(&self) -> String;
}
