//! The daemon orchestrator: owns the project registry and wires watch
//! services, batchers, the delivery queue and status sync together.
//!
//! Lock scope: `projects` is a std mutex held only for map lookups and
//! mutations, never across a watch-service call or an await. `reconcile_lock`
//! serializes whole reconciliation passes so the poller and the push channel
//! cannot interleave.

mod listener;

use crate::auth::AuthTokenCache;
use crate::backoff::{ExponentialBackoff, sleep_or_cancel};
use crate::batch::{BatchSettings, BatchSink, ChangeBatcher};
use crate::config::WatcherConfig;
use crate::delivery::DeliveryQueue;
use crate::error::{FilewatchError, Result};
use crate::filter::PathFilter;
use crate::remote::{ProjectDelta, RemoteApi, push_url};
use crate::router::{EventRouter, RouteTarget};
use crate::status::{StatusSync, WatchListSink};
use async_trait::async_trait;
use dashmap::DashMap;
use filewatchd_api::path::to_local;
use filewatchd_api::{
    ExternalNotifier, ProjectToWatch, WatchEventEntry, WatchService, merge_creation_time,
};
use listener::ListenerAdapter;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Collaborators a [`Watcher`] is assembled from.
pub struct WatcherParts {
    pub config: WatcherConfig,
    pub api: Arc<dyn RemoteApi>,
    pub auth: Arc<AuthTokenCache>,
    pub internal: Arc<dyn WatchService>,
    /// Used for projects flagged `external`; without it they go to `internal`.
    pub external: Option<Arc<dyn WatchService>>,
    pub notifier: Option<Arc<dyn ExternalNotifier>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    Internal,
    External,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Internal => write!(f, "internal"),
            ServiceKind::External => write!(f, "external"),
        }
    }
}

struct ProjectRecord {
    project: Arc<ProjectToWatch>,
    filter: Arc<PathFilter>,
    batcher: ChangeBatcher,
    service: ServiceKind,
}

enum UpsertPlan {
    Create(Arc<ProjectToWatch>, ServiceKind),
    Resubscribe {
        old: Arc<ProjectToWatch>,
        old_service: ServiceKind,
        new: Arc<ProjectToWatch>,
        new_service: ServiceKind,
    },
    Unchanged,
}

pub struct Watcher {
    inner: Arc<WatcherInner>,
    status: Arc<StatusSync>,
    auth: Arc<AuthTokenCache>,
    tasks: TaskTracker,
}

pub(crate) struct WatcherInner {
    config: WatcherConfig,
    api: Arc<dyn RemoteApi>,
    internal: Arc<dyn WatchService>,
    external: Option<Arc<dyn WatchService>>,
    notifier: Option<Arc<dyn ExternalNotifier>>,
    queue: Arc<DeliveryQueue>,
    projects: Mutex<HashMap<String, ProjectRecord>>,
    status_reports: DashMap<String, CancellationToken>,
    reconcile_lock: tokio::sync::Mutex<()>,
    runtime: Handle,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl Watcher {
    /// Must be called from within a tokio runtime. Background loops start with
    /// [`start`](Self::start).
    pub fn new(parts: WatcherParts) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| FilewatchError::Internal(format!("watcher needs a tokio runtime: {e}")))?;
        let cancel = CancellationToken::new();
        let queue = Arc::new(DeliveryQueue::new(
            Arc::clone(&parts.api),
            parts.config.backoff.clone(),
            cancel.child_token(),
        ));

        let inner = Arc::new(WatcherInner {
            config: parts.config,
            api: Arc::clone(&parts.api),
            internal: parts.internal,
            external: parts.external,
            notifier: parts.notifier,
            queue,
            projects: Mutex::new(HashMap::new()),
            status_reports: DashMap::new(),
            reconcile_lock: tokio::sync::Mutex::new(()),
            runtime,
            cancel,
            disposed: AtomicBool::new(false),
        });

        let adapter = Arc::new(ListenerAdapter::new(Arc::downgrade(&inner)));
        inner.internal.set_listener(adapter.clone());
        if let Some(external) = &inner.external {
            external.set_listener(adapter);
        }

        let status = Arc::new(StatusSync::new(
            parts.api,
            Arc::clone(&inner) as Arc<dyn WatchListSink>,
            inner.config.backoff.clone(),
            inner.cancel.child_token(),
        ));

        Ok(Self {
            inner,
            status,
            auth: parts.auth,
            tasks: TaskTracker::new(),
        })
    }

    /// Starts the poller, the push channel and the optional diagnostics dump.
    pub fn start(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(FilewatchError::Internal("watcher already disposed".into()));
        }
        let config = &self.inner.config;

        let poller = self.status.spawn_poller(config.poll_interval);
        self.tasks.spawn(async move {
            let _ = poller.await;
        });

        if config.push_enabled {
            let url = push_url(&config.server_url)?;
            let push = self.status.spawn_push(url, Arc::clone(&self.auth));
            self.tasks.spawn(async move {
                let _ = push.await;
            });
        }

        if let Some(interval) = config.debug_dump_interval {
            let inner = Arc::clone(&self.inner);
            self.tasks.spawn(async move {
                while sleep_or_cancel(interval, &inner.cancel).await {
                    tracing::debug!("Watcher state:\n{}", inner.debug_state());
                }
            });
        }

        tracing::info!(
            "Watcher started against {} (client {})",
            config.server_url,
            config.client_uuid
        );
        Ok(())
    }

    pub async fn reconcile(&self, latest: Vec<ProjectToWatch>) {
        self.inner.reconcile(latest).await;
    }

    pub async fn apply_delta(&self, delta: ProjectDelta) {
        self.inner.apply_delta(delta).await;
    }

    /// Pulls the watch list now instead of waiting for the next interval.
    pub fn refresh(&self) {
        self.status.refresh();
    }

    pub fn project(&self, project_id: &str) -> Option<Arc<ProjectToWatch>> {
        self.inner
            .projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .map(|record| Arc::clone(&record.project))
    }

    pub fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn delivery_queue(&self) -> &DeliveryQueue {
        &self.inner.queue
    }

    pub fn debug_state(&self) -> String {
        self.inner.debug_state()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Idempotent; safe from any thread.
    pub fn dispose(&self) {
        self.status.stop();
        self.inner.dispose();
        self.tasks.close();
    }

    /// Waits for the background loops after [`dispose`](Self::dispose).
    pub async fn wait_stopped(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl WatcherInner {
    fn service(&self, kind: ServiceKind) -> &Arc<dyn WatchService> {
        match (kind, &self.external) {
            (ServiceKind::External, Some(external)) => external,
            _ => &self.internal,
        }
    }

    fn service_kind_for(&self, project: &ProjectToWatch) -> ServiceKind {
        if project.is_external() && self.external.is_some() {
            ServiceKind::External
        } else {
            ServiceKind::Internal
        }
    }

    fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            quiet_period: self.config.quiet_period,
            max_batch_delay: self.config.max_batch_delay,
            chunk_size: self.config.chunk_size,
        }
    }

    async fn reconcile(&self, latest: Vec<ProjectToWatch>) {
        let _pass = self.reconcile_lock.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let wanted: HashSet<&str> = latest.iter().map(|p| p.project_id()).collect();
        let removed: Vec<ProjectRecord> = {
            let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
            let stale: Vec<String> = projects
                .keys()
                .filter(|id| !wanted.contains(id.as_str()))
                .cloned()
                .collect();
            stale.iter().filter_map(|id| projects.remove(id)).collect()
        };
        for record in removed {
            self.teardown(record);
        }

        for project in latest {
            self.upsert(project);
        }
    }

    async fn apply_delta(&self, delta: ProjectDelta) {
        let _pass = self.reconcile_lock.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        match delta {
            ProjectDelta::Upsert(project) => self.upsert(project),
            ProjectDelta::Delete(project_id) => {
                let removed = self
                    .projects
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&project_id);
                match removed {
                    Some(record) => self.teardown(record),
                    None => tracing::debug!("Delete for unknown project {}", project_id),
                }
            }
        }
    }

    fn upsert(&self, project: ProjectToWatch) {
        let plan = {
            let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
            match projects.get_mut(project.project_id()) {
                None => {
                    let service = self.service_kind_for(&project);
                    let project = Arc::new(project);
                    let filter = Arc::new(PathFilter::new(&project));
                    self.queue.register_project(project.project_id());
                    let batcher = ChangeBatcher::spawn(
                        project.project_id(),
                        self.batch_settings(),
                        Arc::clone(&self.queue) as Arc<dyn BatchSink>,
                        self.cancel.child_token(),
                    );
                    projects.insert(
                        project.project_id().to_string(),
                        ProjectRecord {
                            project: Arc::clone(&project),
                            filter,
                            batcher,
                            service,
                        },
                    );
                    UpsertPlan::Create(project, service)
                }
                Some(record) if record.project.root_path() != project.root_path() => {
                    tracing::error!(
                        "Project {} changed root from {} to {}; keeping the old root",
                        project.project_id(),
                        record.project.root_path(),
                        project.root_path()
                    );
                    UpsertPlan::Unchanged
                }
                Some(record)
                    if record.project.watch_state_version() == project.watch_state_version() =>
                {
                    let merged = record
                        .project
                        .merged_creation_time(project.creation_time_millis());
                    record.project = Arc::new(merged);
                    UpsertPlan::Unchanged
                }
                Some(record) => {
                    let creation = merge_creation_time(
                        record.project.creation_time_millis(),
                        project.creation_time_millis(),
                    );
                    let new = Arc::new(project.with_creation_time(creation));
                    let new_service = self.service_kind_for(&new);
                    let old = std::mem::replace(&mut record.project, Arc::clone(&new));
                    let old_service = std::mem::replace(&mut record.service, new_service);
                    record.filter = Arc::new(PathFilter::new(&new));
                    UpsertPlan::Resubscribe {
                        old,
                        old_service,
                        new,
                        new_service,
                    }
                }
            }
        };

        match plan {
            UpsertPlan::Create(project, service) => {
                tracing::info!(
                    "Watching project {} at {} ({} service)",
                    project.project_id(),
                    project.root_path(),
                    service
                );
                self.subscribe(&project, service);
            }
            UpsertPlan::Resubscribe {
                old,
                old_service,
                new,
                new_service,
            } => {
                tracing::info!(
                    "Project {} moved to watch state {}, resubscribing",
                    new.project_id(),
                    new.watch_state_version()
                );
                self.service(old_service).unsubscribe(&old);
                self.subscribe(&new, new_service);
            }
            UpsertPlan::Unchanged => {}
        }
    }

    fn subscribe(&self, project: &ProjectToWatch, service: ServiceKind) {
        if let Err(e) = self.service(service).subscribe(project) {
            tracing::error!("Failed to watch project {}: {}", project.project_id(), e);
            self.on_watch_subscribed(project, false);
        }
    }

    fn teardown(&self, record: ProjectRecord) {
        let project_id = record.project.project_id();
        tracing::info!(
            "No longer watching project {} at {}",
            project_id,
            record.project.root_path()
        );
        self.service(record.service).unsubscribe(&record.project);
        record.batcher.dispose();
        self.queue.remove_project(project_id);
        if let Some((_, report)) = self.status_reports.remove(project_id) {
            report.cancel();
        }
    }

    /// Launches the notifier on success, then reports the outcome until the
    /// server accepts it.
    fn on_watch_subscribed(&self, project: &ProjectToWatch, success: bool) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        if success {
            if let Some(notifier) = &self.notifier {
                match to_local(project.root_path(), filewatchd_api::path::DRIVE_LETTER_OS) {
                    Ok(local_root) => notifier.notify(
                        project.project_id(),
                        &local_root,
                        project.creation_time_millis(),
                    ),
                    Err(e) => tracing::error!("Cannot notify for {}: {}", project.project_id(), e),
                }
            }
        }

        let cancel = self.cancel.child_token();
        if let Some(previous) = self
            .status_reports
            .insert(project.project_id().to_string(), cancel.clone())
        {
            previous.cancel();
        }

        let api = Arc::clone(&self.api);
        let backoff = self.config.backoff.clone();
        let project_id = project.project_id().to_string();
        let version = project.watch_state_version().to_string();
        self.runtime.spawn(async move {
            let mut backoff = ExponentialBackoff::new(&backoff);
            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = api.put_watch_status(&project_id, &version, success) => result,
                };
                match result {
                    Ok(()) => {
                        tracing::debug!(
                            "Reported watch status {} for {} ({})",
                            success,
                            project_id,
                            version
                        );
                        return;
                    }
                    Err(e) => {
                        let delay = backoff.fail_increase();
                        tracing::warn!(
                            "Status report for {} failed: {}. Retrying in {}ms",
                            project_id,
                            e,
                            delay.as_millis()
                        );
                        if !sleep_or_cancel(delay, &cancel).await {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn dispatch_events(&self, events: Vec<WatchEventEntry>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let targets: Vec<RouteTarget> = self
            .projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|record| RouteTarget {
                project_id: record.project.project_id().to_string(),
                root_path: record.project.root_path().to_string(),
                filter: Arc::clone(&record.filter),
            })
            .collect();

        let (routed, stats) = EventRouter::new(targets).route(events);
        tracing::trace!(
            "Routed events: delivered={} filtered={} unmatched={}",
            stats.delivered,
            stats.filtered,
            stats.unmatched
        );

        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        for (project_id, entries) in routed {
            match projects.get(&project_id) {
                Some(record) => record.batcher.add_changed_files(entries),
                None => {
                    tracing::debug!("Project {} removed while routing, dropping events", project_id)
                }
            }
        }
    }

    fn debug_state(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.internal.debug_state());
        if let Some(external) = &self.external {
            out.push_str(&external.debug_state());
        }

        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = projects.keys().collect();
        ids.sort();
        let _ = writeln!(out, "Projects: {}", ids.len());
        for id in ids {
            let record = &projects[id];
            let project = &record.project;
            let _ = writeln!(
                out,
                "  {} root={} version={} created={:?} external={} service={} pending={}",
                id,
                project.root_path(),
                project.watch_state_version(),
                project.creation_time_millis(),
                project.is_external(),
                record.service,
                record.batcher.pending_len()
            );
            let _ = writeln!(
                out,
                "    ignoredPaths={:?} ignoredFilenames={:?} filesToWatch={:?}",
                project.ignored_paths(),
                project.ignored_filenames(),
                project.files_to_watch()
            );
        }
        drop(projects);

        out.push_str(&self.queue.debug_state());
        out
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disposing watcher");

        self.cancel.cancel();
        self.internal.dispose();
        if let Some(external) = &self.external {
            external.dispose();
        }

        let records: Vec<ProjectRecord> = self
            .projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, record)| record)
            .collect();
        for record in &records {
            record.batcher.dispose();
        }
        self.status_reports.clear();
        self.queue.dispose();
    }
}

#[async_trait]
impl WatchListSink for WatcherInner {
    async fn reconcile(&self, latest: Vec<ProjectToWatch>) {
        WatcherInner::reconcile(self, latest).await;
    }

    async fn apply_delta(&self, delta: ProjectDelta) {
        WatcherInner::apply_delta(self, delta).await;
    }
}
