//! Header secret resolution: `${scheme:name}` references in
//! [`crate::config::ServerConfig::headers`] are expanded through a
//! [`SecretResolver`] collaborator before being handed to the transport,
//! mirroring the external storage collaborator pattern `mcpup-oauth`
//! already uses for [`mcpup_oauth::TokenStore`].

use std::collections::HashMap;

use crate::error::ClientError;

#[async_trait::async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, scheme: &str, name: &str) -> Result<String, ClientError>;
}

/// Resolves `${env:NAME}` references against the process environment.
/// Sufficient for the CLI and tests; a full keyring/secret-manager backend
/// is the embedding application's job.
#[derive(Debug, Default)]
pub struct EnvSecretResolver;

#[async_trait::async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, scheme: &str, name: &str) -> Result<String, ClientError> {
        match scheme {
            "env" => std::env::var(name)
                .map_err(|_| ClientError::Config(format!("missing environment variable '{name}'"))),
            other => Err(ClientError::Config(format!("unsupported secret scheme '{other}'"))),
        }
    }
}

/// Parses a `${scheme:name}` reference, returning `None` for plain values.
pub fn parse_secret_ref(value: &str) -> Option<(&str, &str)> {
    let inner = value.strip_prefix("${")?.strip_suffix('}')?;
    inner.split_once(':')
}

/// Expands every header value through `resolver`, leaving plain values
/// untouched. Returns the resolved values alongside the expanded map so the
/// caller can register them with the secret-sanitizing log sink.
pub async fn resolve_headers(
    headers: &HashMap<String, String>,
    resolver: &dyn SecretResolver,
) -> Result<(HashMap<String, String>, Vec<String>), ClientError> {
    let mut resolved = HashMap::with_capacity(headers.len());
    let mut secrets = Vec::new();
    for (key, value) in headers {
        match parse_secret_ref(value) {
            Some((scheme, name)) => {
                let secret = resolver.resolve(scheme, name).await?;
                secrets.push(secret.clone());
                resolved.insert(key.clone(), secret);
            }
            None => {
                resolved.insert(key.clone(), value.clone());
            }
        }
    }
    Ok((resolved, secrets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_name() {
        assert_eq!(parse_secret_ref("${env:API_KEY}"), Some(("env", "API_KEY")));
    }

    #[test]
    fn plain_values_are_not_references() {
        assert_eq!(parse_secret_ref("plain-value"), None);
    }

    #[tokio::test]
    async fn resolve_headers_expands_env_refs_and_collects_secrets() {
        unsafe { std::env::set_var("MCPUP_TEST_SECRET", "topsecret") };
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "${env:MCPUP_TEST_SECRET}".to_string());
        headers.insert("X-Org".to_string(), "acme".to_string());

        let (resolved, secrets) = resolve_headers(&headers, &EnvSecretResolver).await.unwrap();
        assert_eq!(resolved.get("Authorization"), Some(&"topsecret".to_string()));
        assert_eq!(resolved.get("X-Org"), Some(&"acme".to_string()));
        assert_eq!(secrets, vec!["topsecret".to_string()]);
    }

    #[tokio::test]
    async fn missing_env_var_is_a_config_error() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "${env:MCPUP_TEST_DOES_NOT_EXIST}".to_string());
        let result = resolve_headers(&headers, &EnvSecretResolver).await;
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
