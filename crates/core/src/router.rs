//! Maps raw watch events to projects and applies their filters.

use crate::filter::PathFilter;
use filewatchd_api::path::{is_under_root, relativize};
use filewatchd_api::{ChangedFileEntry, WatchEventEntry, now_millis};
use std::collections::HashMap;
use std::sync::Arc;

/// Routing view of one registered project.
#[derive(Clone)]
pub struct RouteTarget {
    pub project_id: String,
    pub root_path: String,
    pub filter: Arc<PathFilter>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub delivered: usize,
    pub filtered: usize,
    pub unmatched: usize,
}

pub struct EventRouter {
    targets: Vec<RouteTarget>,
}

impl EventRouter {
    /// Orders targets by root length, longest first, so nested roots win.
    pub fn new(mut targets: Vec<RouteTarget>) -> Self {
        targets.sort_by(|a, b| b.root_path.len().cmp(&a.root_path.len()));
        Self { targets }
    }

    pub fn find_target(&self, absolute_path: &str) -> Option<&RouteTarget> {
        self.targets
            .iter()
            .find(|target| is_under_root(absolute_path, &target.root_path))
    }

    /// Groups surviving entries by project id.
    pub fn route(
        &self,
        events: Vec<WatchEventEntry>,
    ) -> (HashMap<String, Vec<ChangedFileEntry>>, RouteStats) {
        let mut routed: HashMap<String, Vec<ChangedFileEntry>> = HashMap::new();
        let mut stats = RouteStats::default();

        for event in events {
            let Some(target) = self.find_target(&event.absolute_path) else {
                tracing::error!(
                    "Unexpected event with no matching project: {} {}",
                    event.event_type,
                    event.absolute_path
                );
                stats.unmatched += 1;
                continue;
            };

            let Ok(relative) = relativize(&event.absolute_path, &target.root_path) else {
                stats.unmatched += 1;
                continue;
            };

            if target.filter.is_excluded(&relative) {
                tracing::trace!("Filtered {} for project {}", relative, target.project_id);
                stats.filtered += 1;
                continue;
            }

            stats.delivered += 1;
            routed
                .entry(target.project_id.clone())
                .or_default()
                .push(ChangedFileEntry {
                    relative_path: relative,
                    is_directory: event.is_directory,
                    event_type: event.event_type,
                    observed_at_millis: now_millis(),
                });
        }

        (routed, stats)
    }
}
