use crate::error::{WatchError, WatchResult};
use crate::path;
use serde::Serialize;

/// One monitored directory tree as described by the remote service.
///
/// Values are immutable once built; updates produce a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectToWatch {
    project_id: String,
    root_path: String,
    ignored_paths: Vec<String>,
    ignored_filenames: Vec<String>,
    watch_state_version: String,
    creation_time_millis: Option<u64>,
    external: bool,
    files_to_watch: Vec<String>,
}

impl ProjectToWatch {
    /// Validates the id and the canonical root.
    pub fn new(
        project_id: impl Into<String>,
        root_path: impl Into<String>,
        watch_state_version: impl Into<String>,
    ) -> WatchResult<Self> {
        let project_id = project_id.into();
        let root_path = root_path.into();
        if project_id.trim().is_empty() {
            return Err(WatchError::InvalidProject(format!(
                "empty project id for root {root_path}"
            )));
        }
        path::validate_root(&root_path)?;

        Ok(Self {
            project_id,
            root_path,
            ignored_paths: Vec::new(),
            ignored_filenames: Vec::new(),
            watch_state_version: watch_state_version.into(),
            creation_time_millis: None,
            external: false,
            files_to_watch: Vec::new(),
        })
    }

    pub fn with_ignored_paths(mut self, patterns: Vec<String>) -> Self {
        self.ignored_paths = patterns;
        self
    }

    pub fn with_ignored_filenames(mut self, patterns: Vec<String>) -> Self {
        self.ignored_filenames = patterns;
        self
    }

    pub fn with_creation_time(mut self, creation_time_millis: Option<u64>) -> Self {
        self.creation_time_millis = creation_time_millis;
        self
    }

    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn with_files_to_watch(mut self, files: Vec<String>) -> Self {
        self.files_to_watch = files;
        self
    }

    /// Clone of `self` whose creation time follows [`merge_creation_time`].
    pub fn merged_creation_time(&self, incoming: Option<u64>) -> Self {
        let mut updated = self.clone();
        updated.creation_time_millis = merge_creation_time(self.creation_time_millis, incoming);
        updated
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn ignored_paths(&self) -> &[String] {
        &self.ignored_paths
    }

    pub fn ignored_filenames(&self) -> &[String] {
        &self.ignored_filenames
    }

    pub fn watch_state_version(&self) -> &str {
        &self.watch_state_version
    }

    pub fn creation_time_millis(&self) -> Option<u64> {
        self.creation_time_millis
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn files_to_watch(&self) -> &[String] {
        &self.files_to_watch
    }
}

/// A known creation time is never replaced by `None`; a new value always wins.
pub fn merge_creation_time(existing: Option<u64>, incoming: Option<u64>) -> Option<u64> {
    incoming.or(existing)
}
