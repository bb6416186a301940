//! OAuth 2.0 authentication engine for upstream MCP servers: metadata
//! discovery, Dynamic Client Registration, the PKCE authorization code
//! flow via a loopback callback, and manual token refresh.

pub mod browser;
pub mod callback;
pub mod chain;
pub mod client;
pub mod dcr;
pub mod discovery;
pub mod token;

pub use chain::{AuthStrategy, ErrorClass, OAuthInProgressTracker, OAuthPending};
pub use client::{OAuthClient, PkceFlowStart, RESERVED_PARAM_NAMES, validate_extra_params};
pub use dcr::{DcrClient, RegistrationRequest, RegistrationResponse};
pub use discovery::{AuthServerMetadata, DiscoveryClient};
pub use token::{OAuthTokenRecord, TokenStore, server_key};

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("dynamic client registration failed: {0}")]
    Dcr(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
    #[error("callback error: {0}")]
    Callback(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("reserved OAuth parameter used in extra_params: {0}")]
    ReservedParameter(String),
    #[error("an OAuth login is already in progress for '{server_name}' ({server_url}): {message}")]
    Pending {
        server_name: String,
        server_url: String,
        message: String,
    },
}

impl From<OAuthPending> for OAuthError {
    fn from(pending: OAuthPending) -> Self {
        OAuthError::Pending {
            server_name: pending.server_name,
            server_url: pending.server_url,
            message: pending.message,
        }
    }
}

/// Generates a cryptographically random URL-safe state token for CSRF
/// protection on the authorization request.
pub fn generate_state() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 24];
    fastrand::fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Runtime configuration for one connection attempt's OAuth flow, derived
/// from the server's config and discovered/registered identifiers.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce_enabled: bool,
    pub auth_server_metadata_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub extra_params: HashMap<String, String>,
}

/// Ties discovery, DCR, and the PKCE flow together into a single
/// `authenticate` call driven by the transport layer's auth chain.
#[derive(Clone)]
pub struct OAuthEngine {
    pub discovery: DiscoveryClient,
    pub dcr: DcrClient,
    pub in_progress: OAuthInProgressTracker,
}

impl Default for OAuthEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthEngine {
    pub fn new() -> Self {
        Self {
            discovery: DiscoveryClient::new(),
            dcr: DcrClient::new(),
            in_progress: OAuthInProgressTracker::new(),
        }
    }

    /// Runs the full interactive authorization flow for one upstream:
    /// discover metadata, register a client if needed, open the browser,
    /// wait for the loopback callback, and exchange the code for tokens.
    pub async fn authenticate(
        &self,
        server_name: &str,
        server_url: &str,
        known_client: Option<(&str, &str)>,
        scopes: &[String],
        extra_params: &HashMap<String, String>,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        let guard = self.in_progress.try_start(server_name, server_url)?;

        let metadata = self.discovery.discover(server_url).await?;
        let auth_endpoint = metadata
            .authorization_endpoint
            .clone()
            .ok_or_else(|| OAuthError::Discovery("no authorization_endpoint in metadata".to_string()))?;
        let token_endpoint = metadata
            .token_endpoint
            .clone()
            .ok_or_else(|| OAuthError::Discovery("no token_endpoint in metadata".to_string()))?;

        // One loopback server for the whole flow: whatever `redirect_uri` is
        // registered with the authorization server (via DCR, or carried by a
        // known client) is the exact one the authorization request must use
        // too, per RFC 6749 §3.1.2.3's exact-match requirement.
        let (redirect_uri, waiter) = callback::start_loopback_server().await?;

        let (client_id, client_secret) = match known_client {
            Some((id, secret)) if !id.is_empty() => (id.to_string(), secret.to_string()),
            _ => {
                let registration_endpoint = metadata.registration_endpoint.clone().ok_or_else(|| {
                    OAuthError::Dcr("server has no client_id and no registration_endpoint".to_string())
                })?;
                let request = RegistrationRequest::public_client(&redirect_uri, scopes);
                let response = self.dcr.register(&registration_endpoint, &request).await?;
                (response.client_id, response.client_secret.unwrap_or_default())
            }
        };

        let oauth_client = OAuthClient::new(
            &client_id,
            Some(&client_secret).filter(|s| !s.is_empty()),
            &auth_endpoint,
            &token_endpoint,
            &redirect_uri,
        )?;

        let mut params = extra_params.clone();
        if let Some(resource) = metadata.resource.clone() {
            params.entry("resource".to_string()).or_insert(resource);
        } else {
            params.entry("resource".to_string()).or_insert_with(|| server_url.to_string());
        }

        let state = generate_state();
        let start = oauth_client.start_pkce_flow(scopes, &state, &params)?;
        browser::open_or_instruct(&start.authorization_url);

        let callback = waiter.await?;
        if callback.state != state {
            return Err(OAuthError::Callback("state mismatch in callback".to_string()));
        }

        let record = oauth_client
            .exchange_code(&callback.code, &start.code_verifier, &client_id, &client_secret)
            .await?;

        drop(guard);
        Ok(record)
    }

    /// Manual refresh using stored DCR credentials, for when the upstream
    /// MCP client library can't refresh itself.
    pub async fn refresh(
        &self,
        server_url: &str,
        record: &OAuthTokenRecord,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        let metadata = self.discovery.discover(server_url).await?;
        let auth_endpoint = metadata.authorization_endpoint.unwrap_or_default();
        let token_endpoint = metadata
            .token_endpoint
            .ok_or_else(|| OAuthError::Discovery("no token_endpoint in metadata".to_string()))?;

        let oauth_client = OAuthClient::new(
            &record.client_id,
            Some(&record.client_secret).filter(|s| !s.is_empty()),
            if auth_endpoint.is_empty() { &token_endpoint } else { &auth_endpoint },
            &token_endpoint,
            "http://127.0.0.1:0/callback",
        )?;

        oauth_client
            .refresh(&record.refresh_token, &record.client_id, &record.client_secret)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_state_is_url_safe_and_nonempty() {
        let state = generate_state();
        assert!(!state.is_empty());
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn two_generated_states_differ() {
        assert_ne!(generate_state(), generate_state());
    }
}
