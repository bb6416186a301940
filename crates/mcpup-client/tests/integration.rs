//! End-to-end exercises of `CoreClient`/`ManagedClient` that don't require a
//! live upstream: config validation, pre-connect error shapes, and the
//! Docker-isolation dispatch decision. Scenarios that need a live MCP
//! handshake belong to `turbomcp-client`/`turbomcp-transport`'s own test
//! suites, which already cover wire-level behavior.

use std::sync::Arc;

use mcpup_client::{ClientError, CoreClient, CoreClientDeps, EnvSecretResolver, ManagedClient, ServerConfig};
use mcpup_logging::SecretRegistry;
use mcpup_supervisor::{IsolationDefaults, ServerIsolationConfig, ServerMutexMap};

fn deps() -> CoreClientDeps {
    CoreClientDeps {
        isolation_defaults: IsolationDefaults::default(),
        secret_resolver: Arc::new(EnvSecretResolver),
        secret_registry: SecretRegistry::new(),
        token_store: None,
        docker_mutex: ServerMutexMap::new(),
        instance_id: "test-instance".to_string(),
    }
}

#[tokio::test]
async fn connect_without_command_or_url_is_a_config_error() {
    let config = ServerConfig::new("bare").unwrap();
    let client = CoreClient::new(config, deps());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}

#[tokio::test]
async fn list_tools_before_connect_is_not_connected() {
    let config = ServerConfig::new("bare").unwrap();
    let client = CoreClient::new(config, deps());
    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn call_tool_before_connect_is_not_connected() {
    let config = ServerConfig::new("bare").unwrap();
    let client = CoreClient::new(config, deps());
    let err = client.call_tool("whatever", None).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn disconnect_without_a_prior_connect_is_a_no_op() {
    let config = ServerConfig::new("bare").unwrap();
    let client = CoreClient::new(config, deps());
    assert!(client.disconnect().await.is_ok());
}

#[tokio::test]
async fn diagnostics_reports_server_name_even_when_never_connected() {
    let config = ServerConfig::new("my-server").unwrap();
    let client = CoreClient::new(config, deps());
    let diagnostics = client.get_diagnostics().await;
    assert_eq!(diagnostics.get("server_name").and_then(|v| v.as_str()), Some("my-server"));
    assert!(!diagnostics.contains_key("transport_kind"));
}

#[test]
fn docker_isolation_follows_global_default_and_per_server_override() {
    let mut config = ServerConfig::new("fetch").unwrap();
    config.command = "uvx".to_string();

    let isolation_on = IsolationDefaults { enabled: true, ..Default::default() };
    let deps_on = CoreClientDeps {
        isolation_defaults: isolation_on,
        secret_resolver: Arc::new(EnvSecretResolver),
        secret_registry: SecretRegistry::new(),
        token_store: None,
        docker_mutex: ServerMutexMap::new(),
        instance_id: "test-instance".to_string(),
    };
    let client_on = CoreClient::new(config.clone(), deps_on);
    assert!(client_on.is_docker_isolated());

    config.isolation = ServerIsolationConfig { enabled: Some(false), ..Default::default() };
    let isolation_on_again = IsolationDefaults { enabled: true, ..Default::default() };
    let deps_opt_out = CoreClientDeps {
        isolation_defaults: isolation_on_again,
        secret_resolver: Arc::new(EnvSecretResolver),
        secret_registry: SecretRegistry::new(),
        token_store: None,
        docker_mutex: ServerMutexMap::new(),
        instance_id: "test-instance".to_string(),
    };
    let client_opt_out = CoreClient::new(config, deps_opt_out);
    assert!(!client_opt_out.is_docker_isolated());
}

#[tokio::test]
async fn managed_client_surfaces_connect_error_through_state() {
    let config = ServerConfig::new("bare").unwrap();
    let client = ManagedClient::new(config, deps());
    assert!(client.connect().await.is_err());
    let info = client.connection_info();
    assert_eq!(info.state, mcpup_client::ConnectionState::Error);
    assert!(info.last_error.is_some());
}

#[tokio::test]
async fn managed_client_list_tools_before_connect_is_not_connected() {
    let config = ServerConfig::new("bare").unwrap();
    let client = ManagedClient::new(config, deps());
    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}
