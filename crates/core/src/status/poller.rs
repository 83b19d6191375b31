use super::StatusSync;
use crate::backoff::{ExponentialBackoff, sleep_or_cancel};
use crate::error::Result;
use crate::remote::ProjectDescriptor;
use filewatchd_api::ProjectToWatch;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Converts a listing, dropping invalid entries and duplicate ids.
pub fn projects_from_descriptors(descriptors: &[ProjectDescriptor]) -> Vec<ProjectToWatch> {
    let mut seen = HashSet::new();
    let mut projects = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if !seen.insert(descriptor.project_id.as_str()) {
            tracing::error!(
                "Duplicate project id {} in watch list, ignoring the repeat",
                descriptor.project_id
            );
            continue;
        }
        match descriptor.to_project() {
            Ok(project) => projects.push(project),
            Err(e) => tracing::error!("Skipping malformed watch list entry: {}", e),
        }
    }
    projects
}

impl StatusSync {
    /// One GET + reconcile. Returns the number of projects listed.
    pub async fn poll_once(&self) -> Result<usize> {
        let descriptors = self.api.fetch_watch_list().await?;
        let projects = projects_from_descriptors(&descriptors);
        let count = projects.len();
        self.sink.reconcile(projects).await;
        Ok(count)
    }
}

pub(super) async fn run(sync: Arc<StatusSync>, interval: Option<Duration>) {
    let mut backoff = ExponentialBackoff::new(&sync.backoff);
    sync.refresh.notify_one();

    loop {
        tokio::select! {
            _ = sync.cancel.cancelled() => break,
            _ = sync.refresh.notified() => {}
            _ = wait_interval(interval) => {}
        }

        loop {
            let result = tokio::select! {
                _ = sync.cancel.cancelled() => return,
                result = sync.poll_once() => result,
            };
            match result {
                Ok(count) => {
                    backoff.success_reset();
                    tracing::debug!("Watch list refreshed: {} project(s)", count);
                    break;
                }
                Err(e) => {
                    let delay = backoff.fail_increase();
                    tracing::warn!(
                        "Watch list request failed: {}. Retrying in {}ms",
                        e,
                        delay.as_millis()
                    );
                    if !sleep_or_cancel(delay, &sync.cancel).await {
                        return;
                    }
                }
            }
        }
    }
    tracing::info!("Watch list poller stopped");
}

async fn wait_interval(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending::<()>().await,
    }
}
