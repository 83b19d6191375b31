use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:9090";

/// Retry delay policy shared by delivery, status callbacks, polling and the push channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "millis")]
    pub min_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
            multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Base URL of the remote development service.
    pub server_url: String,
    /// Identifies this daemon instance in status callbacks.
    pub client_uuid: String,
    /// Quiet time after the last change before a project's batch is flushed.
    #[serde(with = "millis")]
    pub quiet_period: Duration,
    /// Upper bound on how long a non-empty batch may wait.
    #[serde(with = "millis")]
    pub max_batch_delay: Duration,
    /// Maximum length of one base64 chunk in a batch POST.
    pub chunk_size: usize,
    pub backoff: BackoffConfig,
    /// Periodic watch list pull; `None` polls only on startup and explicit refresh.
    #[serde(with = "millis_opt")]
    pub poll_interval: Option<Duration>,
    pub push_enabled: bool,
    /// Poll interval of the watch service used for external roots.
    #[serde(with = "millis")]
    pub external_poll_interval: Duration,
    #[serde(with = "millis_opt")]
    pub debug_dump_interval: Option<Duration>,
    /// Executable launched after a project's watch is installed.
    pub cli_path: Option<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            client_uuid: uuid::Uuid::new_v4().to_string(),
            quiet_period: Duration::from_millis(1000),
            max_batch_delay: Duration::from_secs(10),
            chunk_size: 512 * 1024,
            backoff: BackoffConfig::default(),
            poll_interval: Some(Duration::from_secs(120)),
            push_enabled: true,
            external_poll_interval: Duration::from_secs(2),
            debug_dump_interval: None,
            cli_path: None,
        }
    }
}

impl WatcherConfig {
    /// Reads a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
