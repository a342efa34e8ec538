//! WebDAV transport over reqwest.
//!
//! Speaks the verb subset the engine needs (OPTIONS, GET, PUT, MKCOL,
//! DELETE) against Nextcloud-style servers using Basic auth.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};

use super::{Transport, TransportError, TransportResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for a WebDAV server.
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Server base URL (http/https).
    pub server_url: String,
    /// Basic auth username.
    pub username: String,
    /// Basic auth password or app token.
    pub password: String,
    /// Bound on every network operation.
    pub timeout: Duration,
}

impl WebDavConfig {
    /// Settings with the default operation timeout.
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the operation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// WebDAV implementation of [`Transport`].
pub struct WebDavTransport {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

impl WebDavTransport {
    /// Build a transport for the given server.
    ///
    /// Basic auth credentials travel with every request, so anything other
    /// than a loopback host must use HTTPS.
    pub fn new(config: WebDavConfig) -> TransportResult<Self> {
        let trimmed = config.server_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(TransportError::InvalidPath(
                "server URL must not be empty".to_string(),
            ));
        }

        let base_url = Url::parse(trimmed)
            .map_err(|error| TransportError::InvalidPath(format!("invalid server URL: {error}")))?;

        let is_loopback = base_url
            .host_str()
            .is_some_and(|host| matches!(host, "localhost" | "127.0.0.1" | "::1"));
        if base_url.scheme() != "https" && !is_loopback {
            return Err(TransportError::InvalidPath(
                "server URL must use https (http is allowed for localhost only)".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(config.timeout))
            .build()
            .map_err(|error| TransportError::Network(format!("HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            username: config.username,
            password: config.password,
            http,
        })
    }

    fn build_url(&self, path: &str) -> TransportResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                TransportError::InvalidPath("server URL cannot be a base".to_string())
            })?;
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            // RFC 4918: collection URIs should keep their trailing slash,
            // or some servers answer MKCOL/PROPFIND with a redirect.
            if path.ends_with('/') && !path.is_empty() {
                segments.push("");
            }
        }
        Ok(url)
    }

    fn mkcol() -> Method {
        // MKCOL is a registered WebDAV method; from_bytes cannot fail on it
        Method::from_bytes(b"MKCOL").unwrap_or(Method::PUT)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> TransportResult<reqwest::Response> {
        let url = self.build_url(path)?;
        let mut builder = self
            .http
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Timeout(format!("{method} {path}"))
            } else {
                TransportError::Network(format!("{method} {path}: {error}"))
            }
        })?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(TransportError::Unauthorized);
        }
        Ok(response)
    }

    /// Create one collection level. 405/409 mean it already exists on most
    /// servers and are treated as success.
    async fn mkcol_single(&self, path: &str) -> TransportResult<()> {
        let response = self
            .request(Self::mkcol(), &format!("{path}/"), None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => Ok(()),
            status => Err(TransportError::Network(format!(
                "MKCOL {path} failed: {status}"
            ))),
        }
    }
}

#[async_trait]
impl Transport for WebDavTransport {
    async fn ping(&self) -> TransportResult<()> {
        let response = self.request(Method::OPTIONS, "", None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Network(format!(
                "server rejected OPTIONS: {}",
                response.status()
            )))
        }
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        let response = self.request(Method::GET, path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(path.to_string())),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|error| TransportError::Network(format!("GET {path}: {error}")))?;
                Ok(bytes.to_vec())
            }
            status => Err(TransportError::Network(format!(
                "GET {path} failed: {status}"
            ))),
        }
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()> {
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                self.mkdir(parent).await?;
            }
        }

        let response = self
            .request(Method::PUT, path, Some(bytes.to_vec()))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Network(format!(
                "PUT {path} failed: {}",
                response.status()
            )))
        }
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            self.mkcol_single(&current).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> TransportResult<()> {
        let response = self.request(Method::DELETE, path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(TransportError::Network(format!(
                "DELETE {path} failed: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_plain_http_on_remote_host() {
        let config = WebDavConfig::new("http://dav.example.com", "anna", "secret");
        assert!(WebDavTransport::new(config).is_err());
    }

    #[test]
    fn test_allows_http_on_loopback() {
        let config = WebDavConfig::new("http://localhost:8080/dav", "anna", "secret");
        assert!(WebDavTransport::new(config).is_ok());
    }

    #[test]
    fn test_rejects_empty_server_url() {
        let config = WebDavConfig::new("   ", "anna", "secret");
        assert!(WebDavTransport::new(config).is_err());
    }

    #[test]
    fn test_build_url_appends_segments() {
        let transport = WebDavTransport::new(WebDavConfig::new(
            "https://dav.example.com/remote.php/dav/",
            "anna",
            "secret",
        ))
        .unwrap();
        let url = transport.build_url("journal_app/journals.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://dav.example.com/remote.php/dav/journal_app/journals.json"
        );
    }

    #[test]
    fn test_build_url_encodes_segments() {
        let transport =
            WebDavTransport::new(WebDavConfig::new("https://dav.example.com", "anna", "secret"))
                .unwrap();
        let url = transport.build_url("journal_app/files/my photo.jpg").unwrap();
        assert!(url.as_str().ends_with("my%20photo.jpg"));
    }
}
