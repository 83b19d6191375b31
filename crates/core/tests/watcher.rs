mod common;

use common::{FakeRemoteApi, FakeWatchService, ServiceCall, eventually, fast_backoff, project};
use filewatchd_api::{EventType, ExternalNotifier, WatchEventEntry, WatchService};
use filewatchd_core::auth::AuthTokenCache;
use filewatchd_core::batch::decode_chunks;
use filewatchd_core::remote::{ProjectDelta, RemoteApi};
use filewatchd_core::watcher::WatcherParts;
use filewatchd_core::{Watcher, WatcherConfig};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, Option<u64>)>>,
}

impl ExternalNotifier for RecordingNotifier {
    fn notify(&self, project_id: &str, local_root: &str, creation_time_millis: Option<u64>) {
        self.calls.lock().unwrap().push((
            project_id.to_string(),
            local_root.to_string(),
            creation_time_millis,
        ));
    }
}

struct Harness {
    api: Arc<FakeRemoteApi>,
    internal: Arc<FakeWatchService>,
    external: Arc<FakeWatchService>,
    notifier: Arc<RecordingNotifier>,
    watcher: Watcher,
}

fn harness() -> Harness {
    build_harness(true)
}

fn build_harness(with_external: bool) -> Harness {
    let api = Arc::new(FakeRemoteApi::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let internal = Arc::new(FakeWatchService::default());
    let external = Arc::new(FakeWatchService::default());
    let config = WatcherConfig {
        quiet_period: Duration::from_millis(30),
        max_batch_delay: Duration::from_secs(5),
        backoff: fast_backoff(),
        poll_interval: None,
        push_enabled: false,
        ..WatcherConfig::default()
    };
    let watcher = Watcher::new(WatcherParts {
        config,
        api: api.clone() as Arc<dyn RemoteApi>,
        auth: Arc::new(AuthTokenCache::anonymous()),
        internal: internal.clone(),
        external: with_external.then(|| external.clone() as Arc<dyn WatchService>),
        notifier: Some(notifier.clone()),
    })
    .unwrap();
    Harness {
        api,
        internal,
        external,
        notifier,
        watcher,
    }
}

#[tokio::test]
async fn reconcile_removes_projects_missing_from_latest() {
    let h = harness();
    h.watcher
        .reconcile(vec![project("a", "/work/a", "v1"), project("b", "/work/b", "v1")])
        .await;
    assert_eq!(h.internal.subscribes(), 2);

    h.watcher.reconcile(vec![project("a", "/work/a", "v1")]).await;

    assert_eq!(h.watcher.project_ids(), vec!["a".to_string()]);
    assert_eq!(
        h.internal.calls()[2..],
        [ServiceCall::Unsubscribe("b".into(), "v1".into())]
    );
}

#[tokio::test]
async fn unchanged_version_only_merges_creation_time() {
    let h = harness();
    h.watcher.reconcile(vec![project("a", "/work/a", "v1")]).await;

    let update = project("a", "/work/a", "v1").with_creation_time(Some(1234));
    h.watcher.reconcile(vec![update]).await;
    assert_eq!(h.internal.subscribes(), 1);
    assert_eq!(h.internal.unsubscribes(), 0);
    assert_eq!(h.watcher.project("a").unwrap().creation_time_millis(), Some(1234));

    // An absent incoming time keeps the known one.
    h.watcher.reconcile(vec![project("a", "/work/a", "v1")]).await;
    assert_eq!(h.watcher.project("a").unwrap().creation_time_millis(), Some(1234));
}

#[tokio::test]
async fn version_change_resubscribes_and_keeps_creation_time() {
    let h = harness();
    h.watcher
        .reconcile(vec![project("a", "/work/a", "v1").with_creation_time(Some(5))])
        .await;
    h.watcher.reconcile(vec![project("a", "/work/a", "v2")]).await;

    assert_eq!(
        h.internal.calls(),
        vec![
            ServiceCall::Subscribe("a".into(), "v1".into()),
            ServiceCall::Unsubscribe("a".into(), "v1".into()),
            ServiceCall::Subscribe("a".into(), "v2".into()),
        ]
    );
    let current = h.watcher.project("a").unwrap();
    assert_eq!(current.watch_state_version(), "v2");
    assert_eq!(current.creation_time_millis(), Some(5));
}

#[tokio::test]
async fn root_change_is_rejected() {
    let h = harness();
    h.watcher.reconcile(vec![project("a", "/work/a", "v1")]).await;
    h.watcher.reconcile(vec![project("a", "/elsewhere/a", "v2")]).await;

    let current = h.watcher.project("a").unwrap();
    assert_eq!(current.root_path(), "/work/a");
    assert_eq!(current.watch_state_version(), "v1");
    assert_eq!(h.internal.calls().len(), 1);
}

#[tokio::test]
async fn external_projects_use_the_external_service() {
    let h = harness();
    h.watcher
        .reconcile(vec![
            project("a", "/work/a", "v1"),
            project("x", "/tmp/x", "v1").with_external(true),
        ])
        .await;

    assert_eq!(h.internal.calls(), vec![ServiceCall::Subscribe("a".into(), "v1".into())]);
    assert_eq!(h.external.calls(), vec![ServiceCall::Subscribe("x".into(), "v1".into())]);
}

#[tokio::test]
async fn external_projects_fall_back_to_internal_service() {
    let h = build_harness(false);
    h.watcher
        .reconcile(vec![project("x", "/tmp/x", "v1").with_external(true)])
        .await;

    assert_eq!(h.internal.calls(), vec![ServiceCall::Subscribe("x".into(), "v1".into())]);
    assert!(h.external.calls().is_empty());
}

#[tokio::test]
async fn notifier_runs_only_after_successful_subscribe() {
    let h = harness();
    h.internal.failing_roots.lock().unwrap().insert("/work/bad".to_string());

    h.watcher
        .reconcile(vec![
            project("ok", "/work/ok", "v1").with_creation_time(Some(42)),
            project("bad", "/work/bad", "v1"),
        ])
        .await;

    assert_eq!(
        *h.notifier.calls.lock().unwrap(),
        vec![("ok".to_string(), "/work/ok".to_string(), Some(42))]
    );
}

#[tokio::test]
async fn subscribe_outcomes_are_reported_with_retries() {
    let h = harness();
    h.api.status_failures.store(2, Ordering::SeqCst);
    h.internal.failing_roots.lock().unwrap().insert("/work/bad".to_string());

    h.watcher
        .reconcile(vec![project("ok", "/work/ok", "v1"), project("bad", "/work/bad", "v9")])
        .await;

    assert!(eventually(Duration::from_secs(2), || h.api.reported().len() == 2).await);
    let mut reports: Vec<(String, String, bool)> = h
        .api
        .reported()
        .into_iter()
        .map(|r| (r.project_id, r.version, r.success))
        .collect();
    reports.sort();
    assert_eq!(
        reports,
        vec![
            ("bad".to_string(), "v9".to_string(), false),
            ("ok".to_string(), "v1".to_string(), true),
        ]
    );
    assert_eq!(h.api.status_attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn deltas_add_and_delete_projects() {
    let h = harness();
    h.watcher
        .apply_delta(ProjectDelta::Upsert(project("a", "/work/a", "v1")))
        .await;
    assert_eq!(h.watcher.project_ids(), vec!["a".to_string()]);

    h.watcher.apply_delta(ProjectDelta::Delete("a".into())).await;
    h.watcher.apply_delta(ProjectDelta::Delete("unknown".into())).await;

    assert!(h.watcher.project_ids().is_empty());
    assert_eq!(h.internal.unsubscribes(), 1);
}

#[tokio::test]
async fn re_added_project_delivers_again() {
    let h = harness();
    h.watcher
        .apply_delta(ProjectDelta::Upsert(project("a", "/work/a", "v1")))
        .await;
    h.watcher.apply_delta(ProjectDelta::Delete("a".into())).await;
    h.watcher
        .apply_delta(ProjectDelta::Upsert(project("a", "/work/a", "v2")))
        .await;

    h.internal.emit(vec![WatchEventEntry::new(EventType::Create, "/work/a/new.rs", false)]);

    assert!(eventually(Duration::from_secs(2), || h.api.posted().len() == 1).await);
    assert_eq!(h.api.posted()[0].project_id, "a");
}

#[tokio::test]
async fn events_are_routed_filtered_and_delivered() {
    let h = harness();
    h.watcher
        .reconcile(vec![
            project("outer", "/work/app", "v1").with_ignored_filenames(vec!["*.tmp".into()]),
            project("inner", "/work/app/lib", "v1").with_ignored_paths(vec!["/build".into()]),
        ])
        .await;

    h.internal.emit(vec![
        WatchEventEntry::new(EventType::Create, "/work/app/src/main.rs", false),
        WatchEventEntry::new(EventType::Modify, "/work/app/scratch.tmp", false),
        WatchEventEntry::new(EventType::Modify, "/work/app/lib/src/lib.rs", false),
        WatchEventEntry::new(EventType::Delete, "/work/app/lib/build/out.o", false),
        WatchEventEntry::new(EventType::Modify, "/unrelated/file", false),
    ]);

    assert!(eventually(Duration::from_secs(2), || h.api.posted().len() == 2).await);

    let mut delivered: Vec<(String, Vec<(String, EventType)>)> = h
        .api
        .posted()
        .into_iter()
        .map(|chunk| {
            let entries = decode_chunks(&[chunk.chunk]).unwrap();
            (
                chunk.project_id,
                entries.into_iter().map(|e| (e.path, e.event_type)).collect(),
            )
        })
        .collect();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            ("inner".to_string(), vec![("/src/lib.rs".to_string(), EventType::Modify)]),
            ("outer".to_string(), vec![("/src/main.rs".to_string(), EventType::Create)]),
        ]
    );
}

#[tokio::test]
async fn dispose_is_idempotent_and_stops_services() {
    let h = harness();
    h.watcher.reconcile(vec![project("a", "/work/a", "v1")]).await;

    h.watcher.dispose();
    h.watcher.dispose();

    assert!(h.watcher.is_disposed());
    assert_eq!(h.internal.disposed.load(Ordering::SeqCst), 1);
    assert_eq!(h.external.disposed.load(Ordering::SeqCst), 1);
    assert!(h.watcher.project_ids().is_empty());

    h.watcher.reconcile(vec![project("b", "/work/b", "v1")]).await;
    assert!(h.watcher.project_ids().is_empty());
}

#[tokio::test]
async fn debug_state_lists_projects_and_queue() {
    let h = harness();
    h.watcher
        .reconcile(vec![project("a", "/work/a", "v1").with_files_to_watch(vec!["/pom.xml".into()])])
        .await;

    let state = h.watcher.debug_state();
    assert!(state.contains("fake watch service"));
    assert!(state.contains("a root=/work/a version=v1"));
    assert!(state.contains("/pom.xml"));
    assert!(state.contains("Delivery queue:"));
}
