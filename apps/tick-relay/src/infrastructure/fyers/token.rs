//! Access Token Providers
//!
//! The relay never performs the login flow itself. Tokens come either from
//! configuration or from a file written by an external login job, which is
//! re-read after the feed rejects the cached token.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{Credential, TokenError, TokenProvider};

/// Default location of the token file.
pub const DEFAULT_TOKEN_FILE: &str = "data/access_token.txt";

/// Fixed token supplied at startup.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<Credential, TokenError> {
        if self.credential.expose().trim().is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(self.credential.clone())
    }

    async fn invalidate(&self) {
        tracing::warn!("Static access token rejected; update FYERS_ACCESS_TOKEN and restart");
    }
}

/// Token read from a file and cached until invalidated.
#[derive(Debug)]
pub struct FileTokenProvider {
    path: PathBuf,
    cached: RwLock<Option<Credential>>,
}

impl FileTokenProvider {
    /// Read tokens from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Token file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn token(&self) -> Result<Credential, TokenError> {
        if let Some(credential) = self.cached.read().clone() {
            return Ok(credential);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TokenError::Unavailable(format!("{}: {e}", self.path.display())))?;

        let token = contents.trim();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }

        let credential = Credential::new(token);
        *self.cached.write() = Some(credential.clone());
        tracing::debug!(path = %self.path.display(), "Loaded access token");
        Ok(credential)
    }

    async fn invalidate(&self) {
        *self.cached.write() = None;
        tracing::info!(path = %self.path.display(), "Access token invalidated, will re-read");
    }
}
