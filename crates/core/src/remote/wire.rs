use filewatchd_api::path::normalize;
use filewatchd_api::{ProjectToWatch, WatchError, WatchResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

/// Project description as sent by the remote service, in the watch list and
/// in push deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    #[serde(rename = "projectID")]
    pub project_id: String,
    #[serde(default)]
    pub path_to_monitor: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ignored_paths: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ignored_filenames: Vec<String>,
    #[serde(default)]
    pub project_watch_state_id: Option<String>,
    #[serde(default)]
    pub project_creation_time: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub external: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files_to_watch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
}

impl ProjectDescriptor {
    pub fn to_project(&self) -> WatchResult<ProjectToWatch> {
        let root = self.path_to_monitor.as_deref().ok_or_else(|| {
            WatchError::InvalidProject(format!("project {} has no pathToMonitor", self.project_id))
        })?;
        let version = self.project_watch_state_id.clone().unwrap_or_default();

        Ok(ProjectToWatch::new(&self.project_id, normalize(root), version)?
            .with_ignored_paths(self.ignored_paths.clone())
            .with_ignored_filenames(self.ignored_filenames.clone())
            .with_creation_time(self.project_creation_time)
            .with_external(self.external)
            .with_files_to_watch(self.files_to_watch.clone()))
    }

    /// Missing `changeType` is treated as an update.
    pub fn to_delta(&self) -> WatchResult<ProjectDelta> {
        match self.change_type {
            Some(ChangeType::Delete) => {
                if self.project_id.is_empty() {
                    return Err(WatchError::InvalidProject("delete without projectID".into()));
                }
                Ok(ProjectDelta::Delete(self.project_id.clone()))
            }
            Some(ChangeType::Add) | Some(ChangeType::Update) | None => {
                Ok(ProjectDelta::Upsert(self.to_project()?))
            }
        }
    }
}

/// One incremental change from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectDelta {
    Upsert(ProjectToWatch),
    Delete(String),
}

/// Entries stay raw so one malformed element cannot reject its siblings.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WatchList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: Vec<Value>,
}

/// Parses each element on its own; malformed ones are logged and skipped.
pub fn descriptors_from_values(values: Vec<Value>) -> Vec<ProjectDescriptor> {
    values
        .into_iter()
        .filter_map(|value| match ProjectDescriptor::deserialize(&value) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::error!("Skipping malformed project entry {}: {}", value, e);
                None
            }
        })
        .collect()
}

pub const WATCH_CHANGED: &str = "watchChanged";

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ChunkBody<'a> {
    pub msg: &'a str,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
