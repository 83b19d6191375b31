use filewatchd_api::WatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilewatchError {
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FilewatchError {
    /// True for 401/403 responses, which invalidate the auth token in use.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, FilewatchError::Status { status: 401 | 403, .. })
    }
}

pub type Result<T> = std::result::Result<T, FilewatchError>;
