//! RFC 7591 Dynamic Client Registration.

use serde::{Deserialize, Serialize};

use crate::OAuthError;

const DCR_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub scope: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

impl RegistrationRequest {
    /// Builds the registration request this subsystem always sends: a
    /// public client (no client secret) requesting the authorization-code
    /// grant with PKCE.
    pub fn public_client(redirect_uri: &str, scopes: &[String]) -> Self {
        Self {
            client_name: "mcpproxy".to_string(),
            redirect_uris: vec![redirect_uri.to_string()],
            scope: scopes.join(" "),
            grant_types: vec!["authorization_code".to_string()],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub registration_access_token: Option<String>,
    #[serde(default)]
    pub registration_client_uri: Option<String>,
}

/// RFC 7591 client over a single `registration_endpoint`.
#[derive(Clone)]
pub struct DcrClient {
    http: reqwest::Client,
}

impl Default for DcrClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DcrClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Registers a new client. Both `200 OK` and `201 Created` are accepted
    /// per RFC 7591; some authorization servers use one or the other
    /// inconsistently. Any other 2xx is treated as a protocol error.
    pub async fn register(
        &self,
        registration_endpoint: &str,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, OAuthError> {
        let response = tokio::time::timeout(
            DCR_TIMEOUT,
            self.http.post(registration_endpoint).json(request).send(),
        )
        .await
        .map_err(|_| OAuthError::Timeout(registration_endpoint.to_string()))?
        .map_err(|e| OAuthError::Dcr(format!("registration request failed: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Dcr(format!(
                "registration_endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<RegistrationResponse>()
            .await
            .map_err(|e| OAuthError::Dcr(format!("invalid registration response: {e}")))
    }
}
