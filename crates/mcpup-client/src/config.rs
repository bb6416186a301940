//! Config-surface types handed to [`crate::core::CoreClient::connect`]:
//! immutable once constructed, never mutated by the core or managed layers.

use std::collections::HashMap;
use std::time::Duration;

use mcpup_env::EnvPolicy;
use mcpup_supervisor::ServerIsolationConfig;
use mcpup_transport::ProtocolHint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server name '{0}' must match [A-Za-z0-9_.-]+")]
    InvalidName(String),
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// One upstream server's connection configuration. Builder-style: start
/// from [`ServerConfig::new`], then set fields directly (they're all
/// `pub`), the way `turbomcp-transport`'s config structs are built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub protocol: ProtocolHint,

    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env_policy: EnvPolicy,
    pub isolation: ServerIsolationConfig,

    pub url: String,
    /// Header values, possibly `${scheme:name}` secret references resolved
    /// at connect time by a [`crate::secrets::SecretResolver`].
    pub headers: HashMap<String, String>,

    pub oauth_scopes: Vec<String>,
    pub oauth_known_client: Option<(String, String)>,
    pub oauth_extra_params: HashMap<String, String>,

    pub connect_timeout: Duration,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if !valid_name(&name) {
            return Err(ConfigError::InvalidName(name));
        }
        Ok(Self {
            name,
            protocol: ProtocolHint::Auto,
            command: String::new(),
            args: Vec::new(),
            working_dir: None,
            env_policy: EnvPolicy::default(),
            isolation: ServerIsolationConfig::default(),
            url: String::new(),
            headers: HashMap::new(),
            oauth_scopes: Vec::new(),
            oauth_known_client: None,
            oauth_extra_params: HashMap::new(),
            connect_timeout: Duration::from_secs(30),
        })
    }

    pub fn has_command(&self) -> bool {
        !self.command.is_empty()
    }

    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }
}

/// One tool advertised by an upstream, normalized from
/// `turbomcp_protocol::types::Tool` into the shape callers consume.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolMetadata {
    pub server_name: String,
    pub name: String,
    pub description: Option<String>,
    pub params_json: serde_json::Value,
}

impl ToolMetadata {
    pub fn from_tool(server_name: &str, tool: &turbomcp_protocol::types::Tool) -> Self {
        Self {
            server_name: server_name.to_string(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            params_json: serde_json::to_value(&tool.input_schema).unwrap_or(serde_json::Value::Null),
        }
    }
}
