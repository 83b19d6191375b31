#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("Path '{path}' is not under root '{root}'")]
    PathMismatch { path: String, root: String },
    #[error("Invalid project: {0}")]
    InvalidProject(String),
    #[error("Subscribe failed for {root}: {reason}")]
    Subscribe { root: String, reason: String },
}

pub type WatchResult<T> = std::result::Result<T, WatchError>;
