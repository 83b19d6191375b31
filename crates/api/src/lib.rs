pub mod auth;
pub mod error;
pub mod models;
pub mod notifier;
pub mod path;
pub mod service;

// Re-export commonly used types
pub use auth::{AuthToken, AuthTokenProvider};
pub use error::{WatchError, WatchResult};
pub use models::*;
pub use notifier::ExternalNotifier;
pub use service::{WatchEventListener, WatchService};
