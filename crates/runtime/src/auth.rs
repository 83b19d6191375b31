use filewatchd_api::{AuthToken, AuthTokenProvider};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Always hands out the same token.
pub struct StaticTokenProvider {
    token: AuthToken,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AuthToken::new(token),
        }
    }
}

impl AuthTokenProvider for StaticTokenProvider {
    fn latest_token(&self) -> Option<AuthToken> {
        Some(self.token.clone())
    }

    fn on_token_rejected(&self, _token: &AuthToken) {
        tracing::warn!("Static auth token was rejected; restart with a valid token");
    }
}

/// Reads the token from a file, re-reading it whenever the server rejects
/// the current one.
pub struct FileTokenProvider {
    path: PathBuf,
    current: RwLock<Option<AuthToken>>,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = read_token(&path);
        Self {
            path,
            current: RwLock::new(current),
        }
    }
}

fn read_token(path: &Path) -> Option<AuthToken> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let token = text.trim();
            if token.is_empty() {
                tracing::warn!("Token file {} is empty", path.display());
                None
            } else {
                Some(AuthToken::new(token))
            }
        }
        Err(e) => {
            tracing::warn!("Failed to read token file {}: {}", path.display(), e);
            None
        }
    }
}

impl AuthTokenProvider for FileTokenProvider {
    fn latest_token(&self) -> Option<AuthToken> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_token_rejected(&self, token: &AuthToken) {
        let fresh = read_token(&self.path);
        if fresh.as_ref() == Some(token) {
            tracing::warn!("Token file {} still holds the rejected token", self.path.display());
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_provider_rereads_after_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "first\n").unwrap();

        let provider = FileTokenProvider::new(&path);
        let first = provider.latest_token().unwrap();
        assert_eq!(first.as_str(), "first");

        std::fs::write(&path, "second").unwrap();
        assert_eq!(provider.latest_token().unwrap().as_str(), "first");

        provider.on_token_rejected(&first);
        assert_eq!(provider.latest_token().unwrap().as_str(), "second");
    }

    #[test]
    fn missing_file_yields_no_token() {
        let provider = FileTokenProvider::new("/definitely/not/here/token");
        assert!(provider.latest_token().is_none());
    }
}
