//! WebDAV remote store
//!
//! Maps the three store operations onto `MKCOL`, `PUT` and `DELETE` requests
//! against `https://host:port`, authenticating with HTTP basic auth. Uploads
//! stream the file from disk.

use super::RemoteStore;
use crate::error::{Result, SyncError};
use reqwest::blocking::{Body, Client};
use reqwest::{Method, StatusCode, Url};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Remote store backed by a WebDAV server
pub struct WebDavStore {
    http_client: Client,
    base_url: Url,
    login: String,
    password: String,
}

impl std::fmt::Debug for WebDavStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavStore")
            .field("base_url", &self.base_url.as_str())
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl WebDavStore {
    /// Create a client for `https://host:port` with the given credentials
    pub fn new(host: &str, port: u16, login: &str, password: &str) -> Result<Self> {
        let base_url = Url::parse(&format!("https://{}:{}/", host, port)).map_err(|e| {
            SyncError::transport("CONNECT", host, format!("invalid host: {}", e))
        })?;
        Self::with_base_url(base_url, login, password)
    }

    /// Create a client for an explicit base URL (any scheme reqwest supports)
    pub fn with_base_url(base_url: Url, login: &str, password: &str) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::transport("CONNECT", base_url.as_str(), e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            login: login.to_string(),
            password: password.to_string(),
        })
    }

    /// Absolute URL for a `/`-separated remote path, each segment percent-encoded
    fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SyncError::transport("CONNECT", self.base_url.as_str(), "base URL cannot hold a path")
            })?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn send(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Body>,
    ) -> Result<StatusCode> {
        let url = self.url_for(path)?;
        let mut request = self
            .http_client
            .request(method, url)
            .basic_auth(&self.login, Some(&self.password));
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .map_err(|e| SyncError::transport(operation, path, format!("request failed: {}", e)))?;
        Ok(response.status())
    }
}

fn status_error(operation: &'static str, path: &str, status: StatusCode) -> SyncError {
    SyncError::transport(operation, path, format!("unexpected status {}", status))
}

impl RemoteStore for WebDavStore {
    #[instrument(skip(self), level = "debug")]
    fn create_collection(&self, path: &str) -> Result<()> {
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| SyncError::internal(format!("MKCOL method: {}", e)))?;
        let status = self.send("MKCOL", mkcol, path, None)?;

        // 405 means the collection is already there
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            debug!("MKCOL {} -> {}", path, status);
            Ok(())
        } else {
            Err(status_error("MKCOL", path, status))
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        let file = File::open(local_file).map_err(|e| SyncError::file_unavailable(local_file, e))?;
        let status = self.send("PUT", Method::PUT, remote_path, Some(Body::from(file)))?;

        if status.is_success() {
            debug!("PUT {} -> {}", remote_path, status);
            Ok(())
        } else {
            Err(status_error("PUT", remote_path, status))
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_collection(&self, path: &str) -> Result<()> {
        let status = self.send("DELETE", Method::DELETE, path, None)?;

        // Nothing to delete is as good as deleted
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("DELETE {} -> {}", path, status);
            Ok(())
        } else {
            Err(status_error("DELETE", path, status))
        }
    }
}
