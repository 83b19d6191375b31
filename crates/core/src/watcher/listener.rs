use super::WatcherInner;
use filewatchd_api::{ProjectToWatch, WatchEventEntry, WatchEventListener};
use std::sync::Weak;

/// Listener handed to the watch services. Holds the watcher weakly so the
/// services never keep a disposed watcher alive.
pub(super) struct ListenerAdapter {
    inner: Weak<WatcherInner>,
}

impl ListenerAdapter {
    pub(super) fn new(inner: Weak<WatcherInner>) -> Self {
        Self { inner }
    }
}

impl WatchEventListener for ListenerAdapter {
    fn on_events(&self, events: Vec<WatchEventEntry>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.dispatch_events(events);
        }
    }

    fn on_subscribe_result(&self, project: &ProjectToWatch, success: bool) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_watch_subscribed(project, success);
        }
    }
}
