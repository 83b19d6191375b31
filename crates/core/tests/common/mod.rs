#![allow(dead_code)]

use async_trait::async_trait;
use filewatchd_api::{
    ProjectToWatch, WatchError, WatchEventEntry, WatchEventListener, WatchResult, WatchService,
};
use filewatchd_core::config::BackoffConfig;
use filewatchd_core::error::{FilewatchError, Result};
use filewatchd_core::remote::{ProjectDescriptor, RemoteApi};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostedChunk {
    pub project_id: String,
    pub timestamp: u64,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub project_id: String,
    pub version: String,
    pub success: bool,
}

/// Remote service double. Each `*_failures` counter makes that many calls fail
/// before the call starts succeeding.
#[derive(Default)]
pub struct FakeRemoteApi {
    pub watch_list: Mutex<Vec<ProjectDescriptor>>,
    pub posts: Mutex<Vec<PostedChunk>>,
    pub post_attempts: AtomicUsize,
    pub post_failures: AtomicUsize,
    pub statuses: Mutex<Vec<StatusReport>>,
    pub status_attempts: AtomicUsize,
    pub status_failures: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeRemoteApi {
    pub fn posted(&self) -> Vec<PostedChunk> {
        self.posts.lock().unwrap().clone()
    }

    pub fn reported(&self) -> Vec<StatusReport> {
        self.statuses.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn server_error(url: &str) -> FilewatchError {
    FilewatchError::Status {
        status: 500,
        url: url.to_string(),
    }
}

#[async_trait]
impl RemoteApi for FakeRemoteApi {
    async fn fetch_watch_list(&self) -> Result<Vec<ProjectDescriptor>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.watch_list.lock().unwrap().clone())
    }

    async fn post_file_changes(
        &self,
        project_id: &str,
        timestamp: u64,
        chunk_index: usize,
        chunk_total: usize,
        chunk: &str,
    ) -> Result<()> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.post_failures) {
            return Err(server_error("file-changes"));
        }
        self.posts.lock().unwrap().push(PostedChunk {
            project_id: project_id.to_string(),
            timestamp,
            chunk_index,
            chunk_total,
            chunk: chunk.to_string(),
        });
        Ok(())
    }

    async fn put_watch_status(&self, project_id: &str, version: &str, success: bool) -> Result<()> {
        self.status_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.status_failures) {
            return Err(server_error("status"));
        }
        self.statuses.lock().unwrap().push(StatusReport {
            project_id: project_id.to_string(),
            version: version.to_string(),
            success,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Subscribe(String, String),
    Unsubscribe(String, String),
}

/// Watch service double: records calls and lets tests inject events.
#[derive(Default)]
pub struct FakeWatchService {
    pub listener: Mutex<Option<Arc<dyn WatchEventListener>>>,
    pub calls: Mutex<Vec<ServiceCall>>,
    /// Roots whose subscribe returns `Err`.
    pub failing_roots: Mutex<HashSet<String>>,
    pub disposed: AtomicUsize,
}

impl FakeWatchService {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::Subscribe(..)))
            .count()
    }

    pub fn unsubscribes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::Unsubscribe(..)))
            .count()
    }

    pub fn emit(&self, events: Vec<WatchEventEntry>) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_events(events);
        }
    }
}

impl WatchService for FakeWatchService {
    fn set_listener(&self, listener: Arc<dyn WatchEventListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn subscribe(&self, project: &ProjectToWatch) -> WatchResult<()> {
        self.calls.lock().unwrap().push(ServiceCall::Subscribe(
            project.project_id().to_string(),
            project.watch_state_version().to_string(),
        ));
        if self.failing_roots.lock().unwrap().contains(project.root_path()) {
            return Err(WatchError::Subscribe {
                root: project.root_path().to_string(),
                reason: "refused by test".into(),
            });
        }
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_subscribe_result(project, true);
        }
        Ok(())
    }

    fn unsubscribe(&self, project: &ProjectToWatch) {
        self.calls.lock().unwrap().push(ServiceCall::Unsubscribe(
            project.project_id().to_string(),
            project.watch_state_version().to_string(),
        ));
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn debug_state(&self) -> String {
        format!("fake watch service: {} call(s)\n", self.calls.lock().unwrap().len())
    }
}

pub fn project(id: &str, root: &str, version: &str) -> ProjectToWatch {
    ProjectToWatch::new(id, root, version).unwrap()
}

/// Polls `check` until it holds or the timeout passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
