//! Outbound queue shipping flushed batches to the remote service.
//!
//! Each project gets its own lane: an unbounded channel drained by one task, so
//! batches of a project go out strictly in flush order with one delivery in
//! flight, while different projects deliver concurrently. A failed batch is
//! retried forever (until the lane is cancelled), resuming at the first chunk
//! the server has not acknowledged.

use crate::backoff::{ExponentialBackoff, sleep_or_cancel};
use crate::batch::{BatchSink, ChangeBatch};
use crate::config::BackoffConfig;
use crate::remote::RemoteApi;
use dashmap::{DashMap, DashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct DeliveryQueue {
    api: Arc<dyn RemoteApi>,
    backoff: BackoffConfig,
    lanes: DashMap<String, Lane>,
    /// Projects removed since their last registration; late batches for them are dropped.
    retired: DashSet<String>,
    cancel: CancellationToken,
}

struct Lane {
    tx: mpsc::UnboundedSender<ChangeBatch>,
    state: Arc<LaneState>,
    cancel: CancellationToken,
}

struct LaneState {
    backoff: Mutex<ExponentialBackoff>,
    queued: AtomicUsize,
    delivered: AtomicUsize,
    failures: AtomicUsize,
}

impl DeliveryQueue {
    pub fn new(api: Arc<dyn RemoteApi>, backoff: BackoffConfig, cancel: CancellationToken) -> Self {
        Self {
            api,
            backoff,
            lanes: DashMap::new(),
            retired: DashSet::new(),
            cancel,
        }
    }

    pub fn enqueue(&self, batch: ChangeBatch) {
        if self.cancel.is_cancelled() {
            tracing::debug!("Queue disposed, dropping batch for {}", batch.project_id);
            return;
        }

        // The entry guard serializes this check against remove_project.
        let entry = self.lanes.entry(batch.project_id.clone());
        if self.retired.contains(&batch.project_id) {
            tracing::debug!("Project {} was removed, dropping batch", batch.project_id);
            return;
        }
        let lane = entry.or_insert_with(|| self.spawn_lane(&batch.project_id));
        lane.state.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = lane.tx.send(batch) {
            lane.state.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Delivery lane closed, dropping batch for {}", e.0.project_id);
        }
    }

    /// Accepts batches for a project again after an earlier removal.
    pub fn register_project(&self, project_id: &str) {
        self.retired.remove(project_id);
    }

    /// Cancels the project's lane, abandoning undelivered batches. Batches
    /// submitted afterwards are dropped until the project is registered again.
    pub fn remove_project(&self, project_id: &str) {
        self.retired.insert(project_id.to_string());
        if let Some((_, lane)) = self.lanes.remove(project_id) {
            lane.cancel.cancel();
        }
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        self.lanes.clear();
        self.retired.clear();
    }

    pub fn backoff_delay(&self, project_id: &str) -> Option<Duration> {
        self.lanes.get(project_id).map(|lane| {
            lane.state
                .backoff
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .current_delay()
        })
    }

    pub fn delivered_count(&self, project_id: &str) -> usize {
        self.lanes
            .get(project_id)
            .map(|lane| lane.state.delivered.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn pending_count(&self, project_id: &str) -> usize {
        self.lanes
            .get(project_id)
            .map(|lane| lane.state.queued.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn debug_state(&self) -> String {
        let mut out = String::from("Delivery queue:\n");
        for lane in self.lanes.iter() {
            let state = &lane.state;
            let delay = state
                .backoff
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .current_delay();
            let _ = writeln!(
                out,
                "  {}: pending={} delivered={} failures={} backoff={}ms",
                lane.key(),
                state.queued.load(Ordering::SeqCst),
                state.delivered.load(Ordering::SeqCst),
                state.failures.load(Ordering::SeqCst),
                delay.as_millis()
            );
        }
        out
    }

    fn spawn_lane(&self, project_id: &str) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(LaneState {
            backoff: Mutex::new(ExponentialBackoff::new(&self.backoff)),
            queued: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        let cancel = self.cancel.child_token();

        tokio::spawn(run_lane(
            Arc::clone(&self.api),
            project_id.to_string(),
            rx,
            Arc::clone(&state),
            cancel.clone(),
        ));

        Lane { tx, state, cancel }
    }
}

impl BatchSink for DeliveryQueue {
    fn submit(&self, batch: ChangeBatch) {
        self.enqueue(batch);
    }
}

async fn run_lane(
    api: Arc<dyn RemoteApi>,
    project_id: String,
    mut rx: mpsc::UnboundedReceiver<ChangeBatch>,
    state: Arc<LaneState>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };

        if !deliver(api.as_ref(), &batch, &state, &cancel).await {
            break;
        }
        state.queued.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!("Delivery lane stopped for {}", project_id);
}

/// Returns `false` when cancelled before the batch was fully acknowledged.
async fn deliver(
    api: &dyn RemoteApi,
    batch: &ChangeBatch,
    state: &LaneState,
    cancel: &CancellationToken,
) -> bool {
    let total = batch.chunks.len();
    let mut next = 0;

    while next < total {
        let result = tokio::select! {
            _ = cancel.cancelled() => return false,
            result = api.post_file_changes(
                &batch.project_id,
                batch.latest_timestamp,
                next + 1,
                total,
                &batch.chunks[next],
            ) => result,
        };

        match result {
            Ok(()) => next += 1,
            Err(e) => {
                state.failures.fetch_add(1, Ordering::SeqCst);
                let delay = state
                    .backoff
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .fail_increase();
                tracing::warn!(
                    "Delivery of batch {} (chunk {}/{}) for {} failed: {}. Retrying in {}ms",
                    batch.latest_timestamp,
                    next + 1,
                    total,
                    batch.project_id,
                    e,
                    delay.as_millis()
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return false;
                }
            }
        }
    }

    state
        .backoff
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .success_reset();
    state.delivered.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(
        "Delivered {} entries for {} in {} chunk(s)",
        batch.entry_count,
        batch.project_id,
        total
    );
    true
}
