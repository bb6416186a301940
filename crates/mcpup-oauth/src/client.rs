//! Authorization-code-with-PKCE client wrapper over the `oauth2` crate's
//! typestate `BasicClient`, plus manual refresh against stored DCR
//! credentials (the upstream MCP client library doesn't own token state for
//! us, so refresh has to be driven from here).

use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
    basic::BasicClient,
};
use std::collections::HashMap;
use std::time::Duration;

use crate::OAuthError;
use crate::token::OAuthTokenRecord;

/// Per-request budget for the code-exchange and refresh POSTs, matching the
/// 10s OAuth HTTP timeout applied to discovery and DCR elsewhere in this crate.
const OAUTH_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth parameter names that a caller must never smuggle in via
/// `extra_params`, because this subsystem already controls them.
pub const RESERVED_PARAM_NAMES: &[&str] = &[
    "client_id",
    "client_secret",
    "redirect_uri",
    "scope",
    "state",
    "code_challenge",
    "code_challenge_method",
    "response_type",
    "grant_type",
    "code",
    "refresh_token",
];

/// Rejects `extra_params` containing any of the eleven reserved OAuth
/// parameter names.
pub fn validate_extra_params(extra_params: &HashMap<String, String>) -> Result<(), OAuthError> {
    for key in extra_params.keys() {
        if RESERVED_PARAM_NAMES.contains(&key.as_str()) {
            return Err(OAuthError::ReservedParameter(key.clone()));
        }
    }
    Ok(())
}

type BasicAuthCodeClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

pub struct OAuthClient {
    inner: BasicAuthCodeClient,
    http: reqwest::Client,
}

pub struct PkceFlowStart {
    pub authorization_url: String,
    pub code_verifier: String,
}

impl OAuthClient {
    pub fn new(
        client_id: &str,
        client_secret: Option<&str>,
        auth_endpoint: &str,
        token_endpoint: &str,
        redirect_uri: &str,
    ) -> Result<Self, OAuthError> {
        let auth_url = AuthUrl::new(auth_endpoint.to_string())
            .map_err(|e| OAuthError::Config(format!("invalid authorization endpoint: {e}")))?;
        let token_url = TokenUrl::new(token_endpoint.to_string())
            .map_err(|e| OAuthError::Config(format!("invalid token endpoint: {e}")))?;
        let redirect_url = validate_redirect_uri(redirect_uri)?;

        let mut client = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        if let Some(secret) = client_secret.filter(|s| !s.is_empty()) {
            client = client.set_client_secret(ClientSecret::new(secret.to_string()));
        }

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuthError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { inner: client, http })
    }

    /// Builds the authorization URL with PKCE S256, the given state, and any
    /// validated extra parameters (e.g. `resource`, `audience`).
    pub fn start_pkce_flow(
        &self,
        scopes: &[String],
        state: &str,
        extra_params: &HashMap<String, String>,
    ) -> Result<PkceFlowStart, OAuthError> {
        validate_extra_params(extra_params)?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let state_owned = state.to_string();

        let mut request = self
            .inner
            .authorize_url(move || CsrfToken::new(state_owned))
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(pkce_challenge);

        for (key, value) in extra_params {
            request = request.add_extra_param(key.clone(), value.clone());
        }

        let (url, _state) = request.url();

        Ok(PkceFlowStart {
            authorization_url: url.to_string(),
            code_verifier: pkce_verifier.secret().to_string(),
        })
    }

    /// Exchanges the authorization code for tokens, completing the PKCE
    /// handshake with the stored verifier.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        let response = tokio::time::timeout(
            OAUTH_HTTP_TIMEOUT,
            self.inner
                .exchange_code(AuthorizationCode::new(code.to_string()))
                .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
                .request_async(&self.http),
        )
        .await
        .map_err(|_| OAuthError::Timeout("token exchange".to_string()))?
        .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        Ok(token_response_to_record(response, client_id, client_secret))
    }

    /// Manual refresh against the stored refresh token. The upstream MCP
    /// client library has no notion of our DCR-issued credentials, so this
    /// subsystem drives the refresh directly rather than delegating to it.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        let response = tokio::time::timeout(
            OAUTH_HTTP_TIMEOUT,
            self.inner
                .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
                .request_async(&self.http),
        )
        .await
        .map_err(|_| OAuthError::Timeout("token refresh".to_string()))?
        .map_err(|e| OAuthError::TokenRefresh(e.to_string()))?;

        Ok(token_response_to_record(response, client_id, client_secret))
    }
}

fn token_response_to_record(
    response: oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
    client_id: &str,
    client_secret: &str,
) -> OAuthTokenRecord {
    OAuthTokenRecord::from_token_response(
        response.access_token().secret().clone(),
        response.refresh_token().map(|t| t.secret().clone()),
        format!("{:?}", response.token_type()),
        response.expires_in().map(|d| d.as_secs()),
        client_id.to_string(),
        client_secret.to_string(),
    )
}

fn validate_redirect_uri(uri: &str) -> Result<RedirectUrl, OAuthError> {
    let parsed = url::Url::parse(uri).map_err(|e| OAuthError::Config(format!("invalid redirect URI: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" => {
            let host = parsed.host_str().unwrap_or_default();
            let is_loopback = host == "localhost" || host == "127.0.0.1" || host == "0.0.0.0";
            if !is_loopback {
                return Err(OAuthError::Config(
                    "http redirect URIs are only allowed for loopback hosts".to_string(),
                ));
            }
        }
        other => return Err(OAuthError::Config(format!("unsupported redirect scheme: {other}"))),
    }

    if parsed.fragment().is_some() {
        return Err(OAuthError::Config("redirect URI must not contain a fragment".to_string()));
    }

    RedirectUrl::new(uri.to_string()).map_err(|e| OAuthError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_params_rejected() {
        let mut extra = HashMap::new();
        extra.insert("client_id".to_string(), "sneaky".to_string());
        assert!(validate_extra_params(&extra).is_err());
    }

    #[test]
    fn resource_indicator_allowed() {
        let mut extra = HashMap::new();
        extra.insert("resource".to_string(), "https://mcp.example.com".to_string());
        assert!(validate_extra_params(&extra).is_ok());
    }

    #[test]
    fn loopback_http_redirect_allowed() {
        assert!(validate_redirect_uri("http://127.0.0.1:51123/callback").is_ok());
    }

    #[test]
    fn remote_http_redirect_rejected() {
        assert!(validate_redirect_uri("http://example.com/callback").is_err());
    }

    #[test]
    fn fragment_rejected() {
        assert!(validate_redirect_uri("https://example.com/callback#frag").is_err());
    }

    fn test_client(base: &str) -> OAuthClient {
        OAuthClient::new(
            "client-1",
            None,
            &format!("{base}/authorize"),
            &format!("{base}/token"),
            "http://127.0.0.1:51999/callback",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn refresh_against_mock_token_endpoint_returns_new_access_token() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access-token",
                "token_type": "Bearer",
                "expires_in": 120,
                "refresh_token": "new-refresh-token",
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let record = client.refresh("old-refresh-token", "client-1", "").await.unwrap();

        assert_eq!(record.access_token, "new-access-token");
        assert_eq!(record.refresh_token, "new-refresh-token");
        assert_eq!(record.expires_at - record.created, 120);
    }

    #[tokio::test]
    async fn refresh_missing_expires_in_defaults_to_one_hour() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access-token",
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let record = client.refresh("old-refresh-token", "client-1", "").await.unwrap();

        let delta = record.expires_at - record.created;
        assert!((3595..=3605).contains(&delta), "expected ~3600s, got {delta}s");
    }

    #[tokio::test]
    async fn refresh_invalid_grant_surfaces_error_body() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.refresh("stale-refresh-token", "client-1", "").await.unwrap_err();

        assert!(matches!(err, OAuthError::TokenRefresh(_)));
        assert!(err.to_string().contains("invalid_grant"));
    }
}
