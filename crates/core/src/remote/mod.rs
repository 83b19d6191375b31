//! Client side of the remote development service.

pub mod wire;

pub use wire::{
    ChangeType, ProjectDelta, ProjectDescriptor, PushEnvelope, WatchList, descriptors_from_values,
};

use crate::auth::AuthTokenCache;
use crate::error::{FilewatchError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wire::{ChunkBody, StatusBody};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_PATH: &str = "/websockets/file-changes/v1";

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `GET /api/v1/projects/watchlist`
    async fn fetch_watch_list(&self) -> Result<Vec<ProjectDescriptor>>;

    /// One chunk of a batch; `chunk_index` is 1-based.
    async fn post_file_changes(
        &self,
        project_id: &str,
        timestamp: u64,
        chunk_index: usize,
        chunk_total: usize,
        chunk: &str,
    ) -> Result<()>;

    /// Reports whether the watch for `watch_state_version` was installed.
    async fn put_watch_status(
        &self,
        project_id: &str,
        watch_state_version: &str,
        success: bool,
    ) -> Result<()>;
}

pub struct HttpRemoteApi {
    client: Client,
    base: Url,
    client_uuid: String,
    auth: Arc<AuthTokenCache>,
}

impl HttpRemoteApi {
    pub fn new(
        server_url: &str,
        client_uuid: impl Into<String>,
        auth: Arc<AuthTokenCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(server_url)?,
            client_uuid: client_uuid.into(),
            auth,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FilewatchError::Internal(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Attaches the current token and maps non-2xx responses to errors.
    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response> {
        let token = self.auth.token();
        let request = match &token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let err = FilewatchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        };
        if err.is_auth_rejection() {
            if let Some(token) = &token {
                self.auth.invalidate(token);
            }
        }
        Err(err)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_watch_list(&self) -> Result<Vec<ProjectDescriptor>> {
        let url = self.endpoint(&["api", "v1", "projects", "watchlist"])?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        let list: WatchList = response.json().await?;
        Ok(descriptors_from_values(list.projects))
    }

    async fn post_file_changes(
        &self,
        project_id: &str,
        timestamp: u64,
        chunk_index: usize,
        chunk_total: usize,
        chunk: &str,
    ) -> Result<()> {
        let mut url = self.endpoint(&["api", "v1", "projects", project_id, "file-changes"])?;
        url.query_pairs_mut()
            .append_pair("timestamp", &timestamp.to_string())
            .append_pair("chunk", &chunk_index.to_string())
            .append_pair("chunk_total", &chunk_total.to_string());

        let request = self.client.post(url.clone()).json(&ChunkBody { msg: chunk });
        self.send(request, &url).await?;
        Ok(())
    }

    async fn put_watch_status(
        &self,
        project_id: &str,
        watch_state_version: &str,
        success: bool,
    ) -> Result<()> {
        let mut url = self.endpoint(&[
            "api",
            "v1",
            "projects",
            project_id,
            "file-changes",
            watch_state_version,
            "status",
        ])?;
        url.query_pairs_mut().append_pair("clientUuid", &self.client_uuid);

        let request = self.client.put(url.clone()).json(&StatusBody { success });
        self.send(request, &url).await?;
        Ok(())
    }
}

/// WebSocket URL of the push feed for a service base URL.
pub fn push_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme).map_err(|_| {
        FilewatchError::Internal(format!("cannot derive push URL from {server_url}"))
    })?;
    url.set_path(PUSH_PATH);
    url.set_query(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_swaps_scheme_and_path() {
        assert_eq!(
            push_url("http://localhost:9090/base").unwrap().as_str(),
            "ws://localhost:9090/websockets/file-changes/v1"
        );
        assert_eq!(
            push_url("https://remote.example").unwrap().as_str(),
            "wss://remote.example/websockets/file-changes/v1"
        );
    }
}
