pub mod auth;

pub use auth::{FileTokenProvider, StaticTokenProvider};

use filewatchd_api::{AuthTokenProvider, ExternalNotifier, WatchService};
use filewatchd_core::auth::AuthTokenCache;
use filewatchd_core::logging::{LogConfig, WorkerGuard};
use filewatchd_core::notifier::ProcessNotifier;
use filewatchd_core::remote::HttpRemoteApi;
use filewatchd_core::watch::{NotifyWatchService, WatchBackend};
use filewatchd_core::watcher::WatcherParts;
use filewatchd_core::{Result, Watcher, WatcherConfig};
use std::sync::Arc;

/// Assembles a daemon with the native watch service for regular projects,
/// a polling one for external roots, and the process notifier when a CLI
/// path is configured.
///
/// Must be called from within a tokio runtime; background loops are not
/// started yet.
pub fn build_default_watcher(
    config: WatcherConfig,
    token_provider: Option<Arc<dyn AuthTokenProvider>>,
) -> Result<Watcher> {
    let auth = Arc::new(match token_provider {
        Some(provider) => AuthTokenCache::new(provider),
        None => AuthTokenCache::anonymous(),
    });
    let api = Arc::new(HttpRemoteApi::new(
        &config.server_url,
        config.client_uuid.clone(),
        Arc::clone(&auth),
    )?);

    let internal: Arc<dyn WatchService> =
        Arc::new(NotifyWatchService::new("internal", WatchBackend::Native));
    let external: Arc<dyn WatchService> = Arc::new(NotifyWatchService::new(
        "external",
        WatchBackend::Poll(config.external_poll_interval),
    ));

    let notifier = config.cli_path.as_ref().map(|cli_path| {
        Arc::new(ProcessNotifier::new(cli_path, tokio::runtime::Handle::current()))
            as Arc<dyn ExternalNotifier>
    });
    if notifier.is_none() {
        tracing::info!("No CLI path configured; project sync notifications are disabled");
    }

    Watcher::new(WatcherParts {
        config,
        api,
        auth,
        internal,
        external: Some(external),
        notifier,
    })
}

/// Initializes logging for a component. Hold the returned guard until exit.
pub fn init_logging(component: &str, to_stderr: bool) -> std::io::Result<WorkerGuard> {
    let mut config = LogConfig::new(component);
    config.to_stderr = to_stderr;
    filewatchd_core::logging::init_logging(&config)
}
