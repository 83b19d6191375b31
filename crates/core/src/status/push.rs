use super::StatusSync;
use crate::auth::AuthTokenCache;
use crate::backoff::{ExponentialBackoff, sleep_or_cancel};
use crate::error::{FilewatchError, Result};
use crate::remote::{PushEnvelope, descriptors_from_values};
use crate::remote::wire::WATCH_CHANGED;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

impl StatusSync {
    /// Applies one push frame. Malformed frames are logged and skipped.
    pub async fn handle_push_message(&self, text: &str) {
        let envelope: PushEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Ignoring unparsable push message: {}", e);
                return;
            }
        };
        if envelope.kind != WATCH_CHANGED {
            tracing::debug!("Ignoring push message of type {}", envelope.kind);
            return;
        }

        for descriptor in descriptors_from_values(envelope.projects) {
            match descriptor.to_delta() {
                Ok(delta) => self.sink.apply_delta(delta).await,
                Err(e) => tracing::error!("Skipping malformed push entry: {}", e),
            }
        }
    }
}

pub(super) async fn run(sync: Arc<StatusSync>, url: Url, auth: Arc<AuthTokenCache>) {
    let mut backoff = ExponentialBackoff::new(&sync.backoff);

    while !sync.cancel.is_cancelled() {
        match read_feed(&sync, &url, &auth, &mut backoff).await {
            Ok(()) => tracing::info!("Push channel {} closed", url),
            Err(e) => tracing::warn!("Push channel {} failed: {}", url, e),
        }

        let delay = backoff.fail_increase();
        tracing::debug!("Reconnecting push channel in {}ms", delay.as_millis());
        if !sleep_or_cancel(delay, &sync.cancel).await {
            break;
        }
    }
    tracing::info!("Push channel stopped");
}

/// Connects and applies frames until the connection ends or the sync is cancelled.
async fn read_feed(
    sync: &StatusSync,
    url: &Url,
    auth: &AuthTokenCache,
    backoff: &mut ExponentialBackoff,
) -> Result<()> {
    let mut request = url.as_str().into_client_request().map_err(ws_error)?;
    let token = auth.token();
    if let Some(token) = &token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|e| FilewatchError::Internal(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let connected = tokio::select! {
        _ = sync.cancel.cancelled() => return Ok(()),
        connected = connect_async(request) => connected,
    };
    let (stream, _) = match connected {
        Ok(ok) => ok,
        Err(tungstenite::Error::Http(response))
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            if let Some(token) = &token {
                auth.invalidate(token);
            }
            return Err(FilewatchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Err(e) => return Err(ws_error(e)),
    };

    backoff.success_reset();
    tracing::info!("Connected to push channel {}", url);
    let (mut write, mut read) = stream.split();

    loop {
        let frame = tokio::select! {
            _ = sync.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            frame = read.next() => frame,
        };

        match frame {
            None | Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Err(e)) => return Err(ws_error(e)),
            Some(Ok(Message::Text(text))) => sync.handle_push_message(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => sync.handle_push_message(text).await,
                Err(_) => tracing::warn!("Ignoring non UTF-8 binary push frame"),
            },
            Some(Ok(_)) => {}
        }
    }
}

fn ws_error(e: tungstenite::Error) -> FilewatchError {
    FilewatchError::WebSocket(Box::new(e))
}
