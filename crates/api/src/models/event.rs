use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Create => "CREATE",
            EventType::Modify => "MODIFY",
            EventType::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A raw change reported by a watch service, before routing and filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEventEntry {
    pub event_type: EventType,
    /// Canonical absolute path.
    pub absolute_path: String,
    pub is_directory: bool,
}

impl WatchEventEntry {
    pub fn new(
        event_type: EventType,
        absolute_path: impl Into<String>,
        is_directory: bool,
    ) -> Self {
        Self {
            event_type,
            absolute_path: absolute_path.into(),
            is_directory,
        }
    }
}

/// A change that survived filtering, relative to its project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFileEntry {
    pub relative_path: String,
    pub is_directory: bool,
    pub event_type: EventType,
    pub observed_at_millis: u64,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
