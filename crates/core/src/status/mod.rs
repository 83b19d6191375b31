//! Keeps the local project registry in line with the remote watch list.
//!
//! Two channels feed the same [`WatchListSink`]: a poller pulling the full list
//! and a push feed delivering incremental deltas.

mod poller;
mod push;

pub use poller::projects_from_descriptors;

use crate::auth::AuthTokenCache;
use crate::config::BackoffConfig;
use crate::remote::{ProjectDelta, RemoteApi};
use async_trait::async_trait;
use filewatchd_api::ProjectToWatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Reconciliation entry point shared by both channels.
#[async_trait]
pub trait WatchListSink: Send + Sync {
    /// Full desired state; anything not listed is removed.
    async fn reconcile(&self, latest: Vec<ProjectToWatch>);

    async fn apply_delta(&self, delta: ProjectDelta);
}

pub struct StatusSync {
    api: Arc<dyn RemoteApi>,
    sink: Arc<dyn WatchListSink>,
    backoff: BackoffConfig,
    refresh: Notify,
    cancel: CancellationToken,
}

impl StatusSync {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        sink: Arc<dyn WatchListSink>,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            sink,
            backoff,
            refresh: Notify::new(),
            cancel,
        }
    }

    /// Asks the poller for an immediate full pull.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Polls once at startup, then on [`refresh`](Self::refresh) and every `interval`.
    pub fn spawn_poller(self: &Arc<Self>, interval: Option<Duration>) -> JoinHandle<()> {
        tokio::spawn(poller::run(Arc::clone(self), interval))
    }

    pub fn spawn_push(self: &Arc<Self>, url: Url, auth: Arc<AuthTokenCache>) -> JoinHandle<()> {
        tokio::spawn(push::run(Arc::clone(self), url, auth))
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
