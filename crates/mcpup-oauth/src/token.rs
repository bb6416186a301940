//! Token and server-key types persisted by the external storage collaborator.

use std::time::{SystemTime, UNIX_EPOCH};

/// Stable key for a server's token record, derived from its name and URL so
/// it survives process restarts and config reorderings.
pub fn server_key(server_name: &str, url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(server_name.as_bytes());
    hasher.update(b"||");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persisted OAuth state for one upstream server.
///
/// Invariant: `expires_at > created` whenever `expires_at` is populated.
/// `refresh_token` may be empty; `client_id` may be empty until DCR
/// completes.
///
/// `Debug` is hand-rolled rather than derived: the derived form would print
/// `access_token`/`refresh_token`/`client_secret` verbatim, and this type
/// tends to end up in `tracing` fields and error contexts right next to the
/// secret-sanitizing log sink that's supposed to catch exactly this shape.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OAuthTokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: u64,
    pub client_id: String,
    pub client_secret: String,
    pub created: u64,
    pub updated: u64,
}

impl std::fmt::Debug for OAuthTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenRecord")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("created", &self.created)
            .field("updated", &self.updated)
            .finish()
    }
}

fn redact(value: &str) -> String {
    if value.is_empty() { String::new() } else { "<redacted>".to_string() }
}

impl OAuthTokenRecord {
    /// Builds a record from a freshly obtained token, defaulting the
    /// lifetime to one hour when the server omits `expires_in`.
    pub fn from_token_response(
        access_token: String,
        refresh_token: Option<String>,
        token_type: String,
        expires_in_secs: Option<u64>,
        client_id: String,
        client_secret: String,
    ) -> Self {
        let now = now_unix();
        let expires_in = expires_in_secs.unwrap_or(3600);
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_default(),
            token_type,
            expires_at: now + expires_in,
            client_id,
            client_secret,
            created: now,
            updated: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// External key-value persistence collaborator: saving and retrieving
/// [`OAuthTokenRecord`]s keyed by [`server_key`]. Out of scope for this
/// subsystem; a concrete implementation (SQLite, encrypted file, OS
/// keychain) is provided by the embedding application.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_oauth_token(&self, server_key: &str, record: &OAuthTokenRecord) -> Result<(), String>;
    async fn get_oauth_token(&self, server_key: &str) -> Result<Option<OAuthTokenRecord>, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_key_is_stable() {
        let a = server_key("filesystem", "http://localhost:8080");
        let b = server_key("filesystem", "http://localhost:8080");
        assert_eq!(a, b);
        let c = server_key("other", "http://localhost:8080");
        assert_ne!(a, c);
    }

    #[test]
    fn record_from_response_defaults_to_one_hour() {
        let record = OAuthTokenRecord::from_token_response(
            "atoken".to_string(),
            None,
            "Bearer".to_string(),
            None,
            "client-1".to_string(),
            String::new(),
        );
        assert!(record.expires_at > record.created);
        assert_eq!(record.expires_at - record.created, 3600);
        assert!(record.refresh_token.is_empty());
    }

    #[test]
    fn debug_output_never_contains_raw_secrets() {
        let record = OAuthTokenRecord::from_token_response(
            "super-secret-access-token".to_string(),
            Some("super-secret-refresh-token".to_string()),
            "Bearer".to_string(),
            Some(120),
            "client-1".to_string(),
            "super-secret-client-secret".to_string(),
        );
        let debug = format!("{record:?}");
        assert!(!debug.contains("super-secret-access-token"));
        assert!(!debug.contains("super-secret-refresh-token"));
        assert!(!debug.contains("super-secret-client-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
