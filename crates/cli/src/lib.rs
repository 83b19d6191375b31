use anyhow::Context;
use clap::Parser;
use filewatchd_api::AuthTokenProvider;
use filewatchd_core::WatcherConfig;
use filewatchd_runtime::{FileTokenProvider, StaticTokenProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "filewatchd",
    version,
    about = "Watches project directories and reports file changes to a remote development service",
    long_about = "Keeps the set of watched projects in sync with the remote service, batches \
                  filesystem changes per project and delivers them with retries until acknowledged."
)]
pub struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, env = "FILEWATCHD_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the remote service
    #[arg(long, env = "FILEWATCHD_SERVER_URL")]
    pub server_url: Option<String>,

    /// Identifier sent with status reports
    #[arg(long, env = "FILEWATCHD_CLIENT_UUID")]
    pub client_uuid: Option<String>,

    /// Bearer token
    #[arg(long, env = "FILEWATCHD_TOKEN", hide_env_values = true, conflicts_with = "token_file")]
    pub token: Option<String>,

    /// File holding the bearer token, re-read when the server rejects it
    #[arg(long, env = "FILEWATCHD_TOKEN_FILE", value_name = "FILE")]
    pub token_file: Option<PathBuf>,

    /// Executable run as `<cli> project sync ...` after a project's watch is installed
    #[arg(long, env = "FILEWATCHD_CLI_PATH", value_name = "FILE")]
    pub cli_path: Option<PathBuf>,

    /// Watch list poll interval in seconds; 0 polls only at startup
    #[arg(long, env = "FILEWATCHD_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Quiet period before a batch is flushed, in milliseconds
    #[arg(long, env = "FILEWATCHD_QUIET_PERIOD_MS")]
    pub quiet_period_ms: Option<u64>,

    /// Disable the push channel and rely on polling only
    #[arg(long, env = "FILEWATCHD_NO_PUSH")]
    pub no_push: bool,

    /// Log the watcher state at debug level every N seconds
    #[arg(long, env = "FILEWATCHD_DEBUG_DUMP_SECS")]
    pub debug_dump_secs: Option<u64>,

    /// Also log to stderr
    #[arg(long)]
    pub stderr: bool,
}

impl Cli {
    pub fn watcher_config(&self) -> anyhow::Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => WatcherConfig::default(),
        };

        if let Some(url) = &self.server_url {
            config.server_url = url.clone();
        }
        if let Some(uuid) = &self.client_uuid {
            config.client_uuid = uuid.clone();
        }
        if let Some(cli_path) = &self.cli_path {
            config.cli_path = Some(cli_path.clone());
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ms) = self.quiet_period_ms {
            config.quiet_period = Duration::from_millis(ms);
        }
        if self.no_push {
            config.push_enabled = false;
        }
        if let Some(secs) = self.debug_dump_secs {
            config.debug_dump_interval = Some(Duration::from_secs(secs.max(1)));
        }

        url::Url::parse(&config.server_url)
            .with_context(|| format!("invalid server URL {}", config.server_url))?;
        Ok(config)
    }

    pub fn token_provider(&self) -> Option<Arc<dyn AuthTokenProvider>> {
        if let Some(token) = &self.token {
            return Some(Arc::new(StaticTokenProvider::new(token.clone())));
        }
        self.token_file
            .as_ref()
            .map(|path| Arc::new(FileTokenProvider::new(path)) as Arc<dyn AuthTokenProvider>)
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = filewatchd_runtime::init_logging("filewatchd", cli.stderr)
        .context("failed to initialize logging")?;

    let config = cli.watcher_config()?;
    let token_provider = cli.token_provider();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let watcher = filewatchd_runtime::build_default_watcher(config, token_provider)?;
        watcher.start()?;
        info!("filewatchd running. Press Ctrl+C to stop.");

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        watcher.dispose();
        watcher.wait_stopped().await;
        Ok::<(), anyhow::Error>(())
    })
}
