//! Per-project debounce and flush of filtered changes.

pub mod encode;

pub use encode::{ChangeBatch, WireEntry, build_batch, decode_chunks};

use filewatchd_api::ChangedFileEntry;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Receives flushed batches.
pub trait BatchSink: Send + Sync {
    fn submit(&self, batch: ChangeBatch);
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub quiet_period: Duration,
    pub max_batch_delay: Duration,
    pub chunk_size: usize,
}

pub struct ChangeBatcher {
    inner: Arc<BatcherInner>,
    cancel: CancellationToken,
}

struct BatcherInner {
    project_id: String,
    pending: Mutex<Vec<ChangedFileEntry>>,
    kick: Notify,
    settings: BatchSettings,
    sink: Arc<dyn BatchSink>,
}

impl ChangeBatcher {
    /// Starts the flush timer task; it stops when `cancel` (or a parent) is cancelled.
    pub fn spawn(
        project_id: impl Into<String>,
        settings: BatchSettings,
        sink: Arc<dyn BatchSink>,
        cancel: CancellationToken,
    ) -> Self {
        let inner = Arc::new(BatcherInner {
            project_id: project_id.into(),
            pending: Mutex::new(Vec::new()),
            kick: Notify::new(),
            settings,
            sink,
        });

        tokio::spawn(run_timer(Arc::clone(&inner), cancel.clone()));

        Self { inner, cancel }
    }

    /// Safe to call from any thread; never blocks on I/O.
    pub fn add_changed_files(&self, entries: Vec<ChangedFileEntry>) {
        if entries.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
        self.inner.kick.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stops the timer; pending entries are discarded.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChangeBatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl BatcherInner {
    fn flush(&self) {
        // Entries added after the swap land in the fresh list and go out with the next flush.
        let entries = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if entries.is_empty() {
            return;
        }

        match build_batch(&self.project_id, entries, self.settings.chunk_size) {
            Ok(Some(batch)) => self.sink.submit(batch),
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to encode batch for {}: {}", self.project_id, e),
        }
    }
}

async fn run_timer(inner: Arc<BatcherInner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.kick.notified() => {}
        }

        let deadline = Instant::now() + inner.settings.max_batch_delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = inner.kick.notified() => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                _ = tokio::time::sleep(inner.settings.quiet_period) => break,
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        inner.flush();
    }
    tracing::debug!("Batch timer stopped for {}", inner.project_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use filewatchd_api::EventType;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<ChangeBatch>>,
    }

    impl BatchSink for RecordingSink {
        fn submit(&self, batch: ChangeBatch) {
            self.batches.lock().expect("lock poisoned").push(batch);
        }
    }

    fn entry(path: &str, at: u64) -> ChangedFileEntry {
        ChangedFileEntry {
            relative_path: path.to_string(),
            is_directory: false,
            event_type: EventType::Modify,
            observed_at_millis: at,
        }
    }

    fn settings(quiet_ms: u64, max_ms: u64) -> BatchSettings {
        BatchSettings {
            quiet_period: Duration::from_millis(quiet_ms),
            max_batch_delay: Duration::from_millis(max_ms),
            chunk_size: 1024,
        }
    }

    #[tokio::test]
    async fn burst_is_flushed_once_after_quiet_period() {
        let sink = Arc::new(RecordingSink::default());
        let batcher =
            ChangeBatcher::spawn("p1", settings(50, 5_000), sink.clone(), CancellationToken::new());

        batcher.add_changed_files(vec![entry("/a", 1)]);
        batcher.add_changed_files(vec![entry("/b", 2), entry("/c", 3)]);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].project_id, "p1");
        assert_eq!(batches[0].latest_timestamp, 3);
        assert_eq!(decode_chunks(&batches[0].chunks).unwrap().len(), 3);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn entries_after_flush_go_out_in_next_batch() {
        let sink = Arc::new(RecordingSink::default());
        let batcher =
            ChangeBatcher::spawn("p1", settings(30, 5_000), sink.clone(), CancellationToken::new());

        batcher.add_changed_files(vec![entry("/a", 1)]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        batcher.add_changed_files(vec![entry("/b", 2)]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let batches = sink.batches.lock().unwrap();
        let paths: Vec<Vec<String>> = batches
            .iter()
            .map(|b| decode_chunks(&b.chunks).unwrap().into_iter().map(|e| e.path).collect())
            .collect();
        assert_eq!(paths, vec![vec!["/a".to_string()], vec!["/b".to_string()]]);
    }

    #[tokio::test]
    async fn dispose_drops_pending_entries() {
        let sink = Arc::new(RecordingSink::default());
        let batcher =
            ChangeBatcher::spawn("p1", settings(50, 5_000), sink.clone(), CancellationToken::new());

        batcher.add_changed_files(vec![entry("/a", 1)]);
        batcher.dispose();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn steady_stream_is_flushed_by_max_delay() {
        let sink = Arc::new(RecordingSink::default());
        let batcher =
            ChangeBatcher::spawn("p1", settings(50, 200), sink.clone(), CancellationToken::new());

        // Each addition lands inside the quiet period, so only the deadline can flush.
        for i in 0..30 {
            batcher.add_changed_files(vec![entry(&format!("/f{i}"), i)]);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let flushed_while_busy = sink.batches.lock().unwrap().len();
        assert!(flushed_while_busy >= 2, "only {flushed_while_busy} batch(es) during the stream");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let total: usize = sink
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| decode_chunks(&b.chunks).unwrap().len())
            .sum();
        assert_eq!(total, 30);
        assert_eq!(batcher.pending_len(), 0);
    }
}
