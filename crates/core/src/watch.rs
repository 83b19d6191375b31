//! `WatchService` backed by the `notify` crate.

use filewatchd_api::path::{normalize, to_local_path};
use filewatchd_api::{
    EventType, ProjectToWatch, WatchError, WatchEventEntry, WatchEventListener, WatchResult,
    WatchService,
};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum WatchBackend {
    /// Platform-recommended backend (inotify, FSEvents, ReadDirectoryChangesW).
    Native,
    /// Periodic directory scans; slower but works on any filesystem.
    Poll(Duration),
}

type ListenerSlot = Arc<RwLock<Option<Arc<dyn WatchEventListener>>>>;

struct ActiveWatch {
    root: String,
    // Keep watcher alive
    _watcher: Box<dyn Watcher + Send>,
}

pub struct NotifyWatchService {
    name: &'static str,
    backend: WatchBackend,
    listener: ListenerSlot,
    watches: Mutex<HashMap<String, ActiveWatch>>,
    disposed: AtomicBool,
}

impl NotifyWatchService {
    pub fn new(name: &'static str, backend: WatchBackend) -> Self {
        Self {
            name,
            backend,
            listener: Arc::new(RwLock::new(None)),
            watches: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn create_watcher(&self) -> notify::Result<Box<dyn Watcher + Send>> {
        let slot = Arc::clone(&self.listener);
        let name = self.name;
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let entries = to_entries(&event);
                if entries.is_empty() {
                    return;
                }
                let listener = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
                if let Some(listener) = listener {
                    listener.on_events(entries);
                }
            }
            Err(e) => tracing::warn!("{} watch service error: {}", name, e),
        };

        Ok(match self.backend {
            WatchBackend::Native => Box::new(RecommendedWatcher::new(handler, Config::default())?),
            WatchBackend::Poll(interval) => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
        })
    }

    fn listener(&self) -> Option<Arc<dyn WatchEventListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WatchService for NotifyWatchService {
    fn set_listener(&self, listener: Arc<dyn WatchEventListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn subscribe(&self, project: &ProjectToWatch) -> WatchResult<()> {
        let subscribe_error = |reason: String| WatchError::Subscribe {
            root: project.root_path().to_string(),
            reason,
        };
        if self.disposed.load(Ordering::SeqCst) {
            return Err(subscribe_error("watch service disposed".into()));
        }

        let local = to_local_path(project.root_path())?;
        if !local.is_dir() {
            return Err(subscribe_error(format!("{} is not a directory", local.display())));
        }

        let mut watcher = self.create_watcher().map_err(|e| subscribe_error(e.to_string()))?;
        watcher
            .watch(&local, RecursiveMode::Recursive)
            .map_err(|e| subscribe_error(e.to_string()))?;

        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                project.project_id().to_string(),
                ActiveWatch {
                    root: project.root_path().to_string(),
                    _watcher: watcher,
                },
            );
        tracing::info!(
            "{} watch service watching {} for project {}",
            self.name,
            local.display(),
            project.project_id()
        );

        if let Some(listener) = self.listener() {
            listener.on_subscribe_result(project, true);
        }
        Ok(())
    }

    fn unsubscribe(&self, project: &ProjectToWatch) {
        let removed = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project.project_id());
        match removed {
            Some(watch) => tracing::info!(
                "{} watch service stopped watching {} for project {}",
                self.name,
                watch.root,
                project.project_id()
            ),
            None => tracing::debug!(
                "{} watch service had no watch for project {}",
                self.name,
                project.project_id()
            ),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("{} watch service disposed", self.name);
    }

    fn debug_state(&self) -> String {
        let watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = format!(
            "{} watch service ({:?}): {} root(s)\n",
            self.name,
            self.backend,
            watches.len()
        );
        for (id, watch) in watches.iter() {
            let _ = writeln!(out, "  {} -> {}", id, watch.root);
        }
        out
    }
}

/// Maps one notify event to zero or more watch entries.
pub fn to_entries(event: &Event) -> Vec<WatchEventEntry> {
    let entry = |event_type: EventType, path: &Path, is_directory: bool| {
        WatchEventEntry::new(event_type, normalize(&path.to_string_lossy()), is_directory)
    };

    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .iter()
            .map(|p| entry(EventType::Create, p, kind == CreateKind::Folder || p.is_dir()))
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .iter()
            .map(|p| entry(EventType::Delete, p, kind == RemoveKind::Folder))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| entry(EventType::Delete, p, false))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| entry(EventType::Create, p, p.is_dir()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            entry(EventType::Delete, &event.paths[0], event.paths[1].is_dir()),
            entry(EventType::Create, &event.paths[1], event.paths[1].is_dir()),
        ],
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    entry(EventType::Create, p, p.is_dir())
                } else {
                    entry(EventType::Delete, p, false)
                }
            })
            .collect(),
        // Directory modifications only echo changes to their children.
        EventKind::Modify(_) | EventKind::Any => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| entry(EventType::Modify, p, false))
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
