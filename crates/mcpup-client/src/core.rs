//! The core client: one upstream connection's lifecycle, with no retry
//! policy or health supervision of its own (that's [`crate::managed`]'s
//! job). `connect` dispatches on whether the server config carries a
//! command (stdio, optionally Docker-wrapped) or a url (HTTP/SSE, with the
//! Headers -> NoAuth -> OAuth strategy chain).

use std::collections::BTreeMap;
use std::sync::Arc;

use mcpup_env::EnvAssembler;
use mcpup_logging::SecretRegistry;
use mcpup_oauth::chain::{AuthStrategy, ErrorClass, classify};
use mcpup_oauth::{OAuthEngine, OAuthTokenRecord, TokenStore};
use mcpup_supervisor::{
    ContainerLabels, IsolationDefaults, ProcessHandle, ServerMutexMap, SupervisedChild, isolation, poll_cidfile,
    prepare_stdio_container, tail_logs,
};
use mcpup_transport::{HttpParams, ProtocolHint, ServerInfo, TransportError, TransportKind, UpstreamTransport, pick_transport};
use serde_json::{Value, json};
use tokio::sync::Mutex as TokioMutex;

use crate::config::{ServerConfig, ToolMetadata};
use crate::error::ClientError;
use crate::secrets::{SecretResolver, resolve_headers};

/// Collaborators injected at construction time; everything in here is
/// shared across servers by the embedding application (one
/// [`SecretRegistry`]/[`TokenStore`]/[`ServerMutexMap`] for the whole
/// process, not per-server, since the per-server Docker mutex only
/// serializes correctly when every reconnect of a given server name goes
/// through the same map).
pub struct CoreClientDeps {
    pub isolation_defaults: IsolationDefaults,
    pub secret_resolver: Arc<dyn SecretResolver>,
    pub secret_registry: SecretRegistry,
    pub token_store: Option<Arc<dyn TokenStore>>,
    pub docker_mutex: ServerMutexMap,
    pub instance_id: String,
}

pub struct CoreClient {
    config: ServerConfig,
    env_assembler: EnvAssembler,
    isolation_defaults: IsolationDefaults,
    oauth: OAuthEngine,
    token_store: Option<Arc<dyn TokenStore>>,
    secret_resolver: Arc<dyn SecretResolver>,
    secret_registry: SecretRegistry,
    docker_mutex: ServerMutexMap,
    instance_id: String,

    transport: TokioMutex<Option<UpstreamTransport>>,
    supervised: TokioMutex<Option<SupervisedChild>>,
    container_name: TokioMutex<Option<String>>,
    registered_secrets: TokioMutex<Vec<String>>,
    tools_cache: TokioMutex<Option<Vec<ToolMetadata>>>,
}

impl CoreClient {
    pub fn new(config: ServerConfig, deps: CoreClientDeps) -> Self {
        Self {
            config,
            env_assembler: EnvAssembler::new(),
            isolation_defaults: deps.isolation_defaults,
            oauth: OAuthEngine::new(),
            token_store: deps.token_store,
            secret_resolver: deps.secret_resolver,
            secret_registry: deps.secret_registry,
            docker_mutex: deps.docker_mutex,
            instance_id: deps.instance_id,
            transport: TokioMutex::new(None),
            supervised: TokioMutex::new(None),
            container_name: TokioMutex::new(None),
            registered_secrets: TokioMutex::new(Vec::new()),
            tools_cache: TokioMutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    pub fn is_docker_isolated(&self) -> bool {
        self.config.has_command()
            && isolation::should_wrap(&self.config.command, &self.isolation_defaults, &self.config.isolation)
    }

    pub async fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.lock().await.as_ref().map(UpstreamTransport::kind)
    }

    pub async fn connect(&self) -> Result<ServerInfo, ClientError> {
        let kind = pick_transport(self.config.protocol, self.config.has_command(), self.config.has_url())
            .map_err(|e| match e {
                // Missing-config is a `Config` error, not a transport failure:
                // nothing was ever started for the transport layer to fail at.
                TransportError::NoCommand | TransportError::NoUrl => ClientError::Config(e.to_string()),
                other => ClientError::Transport(other),
            })?;
        match kind {
            TransportKind::Stdio => self.connect_stdio().await,
            TransportKind::Http | TransportKind::Sse => self.connect_http().await,
        }
    }

    async fn connect_stdio(&self) -> Result<ServerInfo, ClientError> {
        let assembled = self.env_assembler.assemble(
            &self.config.command,
            &self.config.args,
            &self.config.env_policy,
            std::env::vars(),
        )?;

        let wrap = isolation::should_wrap(&self.config.command, &self.isolation_defaults, &self.config.isolation);
        let (supervised, container_name) = if wrap {
            let server_mutex = self.docker_mutex.lock_for(&self.config.name);
            let _guard = server_mutex.lock().await;

            let (name, cidfile) = prepare_stdio_container(&self.config.name)
                .await
                .map_err(ClientError::Supervision)?;

            let run = isolation::build_docker_run(
                &assembled.program,
                &assembled.args,
                &assembled.env,
                &self.isolation_defaults,
                &self.config.isolation,
            );
            let labels = ContainerLabels {
                instance_id: self.instance_id.clone(),
                server_name: self.config.name.clone(),
                created_by_pid: std::process::id(),
            };

            let docker_args = docker_spawn_args(&name, &labels, &cidfile, run.args);
            let process = ProcessHandle::spawn("docker", &docker_args, &[], None)?;
            let container_id = match poll_cidfile(&cidfile).await {
                Ok(id) => id,
                Err(e) => {
                    let _ = process.shutdown().await;
                    let _ = tokio::fs::remove_file(&cidfile).await;
                    return Err(ClientError::Supervision(e));
                }
            };
            let _ = tokio::fs::remove_file(&cidfile).await;

            let mut log_rx = tail_logs(&container_id);
            let log_server = self.config.name.clone();
            let log_container = name.clone();
            let log_task = tokio::spawn(async move {
                while let Some(line) = log_rx.recv().await {
                    tracing::debug!(server = log_server, container = log_container, "{}", line.line);
                }
            });

            let supervised = SupervisedChild::Docker {
                process,
                container_id,
                container_name: name.clone(),
                log_task: Some(log_task),
            };
            (supervised, Some(name))
        } else {
            if let Some(dir) = &self.config.working_dir {
                mcpup_env::validate_working_dir(dir)?;
            }
            let process = ProcessHandle::spawn(
                &assembled.program,
                &assembled.args,
                &assembled.env,
                self.config.working_dir.as_deref(),
            )?;
            (SupervisedChild::Stdio { process }, None)
        };

        let process_ref = match &supervised {
            SupervisedChild::Stdio { process } => process,
            SupervisedChild::Docker { process, .. } => process,
        };
        let Some((stdin, stdout)) = process_ref.take_stdio().await else {
            supervised.disconnect().await;
            return Err(ClientError::Config("spawned child has no piped stdio".to_string()));
        };

        let transport = UpstreamTransport::stdio(stdout, stdin)?;
        transport.start().await?;
        let info = match transport.initialize(self.config.connect_timeout).await {
            Ok(info) => info,
            Err(e) => {
                let _ = transport.close().await;
                supervised.disconnect().await;
                return Err(e.into());
            }
        };

        *self.container_name.lock().await = container_name;
        *self.supervised.lock().await = Some(supervised);
        *self.transport.lock().await = Some(transport);
        Ok(info)
    }

    async fn connect_http(&self) -> Result<ServerInfo, ClientError> {
        let strategies = [AuthStrategy::Headers, AuthStrategy::NoAuth, AuthStrategy::OAuth];
        let mut last_err: Option<ClientError> = None;

        for strategy in strategies {
            let attempt = self.try_http_strategy(strategy).await;
            match attempt {
                Ok(info) => return Ok(info),
                Err(err) => match classify(&err.to_string(), strategy) {
                    ErrorClass::Config | ErrorClass::Auth | ErrorClass::ServerDuringOAuth => {
                        last_err = Some(err);
                    }
                    ErrorClass::OAuthRequired => {
                        return self.try_http_strategy(AuthStrategy::OAuth).await;
                    }
                    ErrorClass::DeprecatedEndpoint => {
                        return Err(ClientError::DeprecatedEndpoint(err.to_string()));
                    }
                    ErrorClass::Fatal => return Err(err),
                },
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::Auth("no auth strategy succeeded".to_string())))
    }

    async fn try_http_strategy(&self, strategy: AuthStrategy) -> Result<ServerInfo, ClientError> {
        match strategy {
            AuthStrategy::Headers => {
                if self.config.headers.is_empty() {
                    return Err(ClientError::Config("no headers configured".to_string()));
                }
                self.connect_http_with_auth(None).await
            }
            AuthStrategy::NoAuth => self.connect_http_with_auth(None).await,
            AuthStrategy::OAuth => {
                let record = self.oauth_login_or_refresh().await?;
                self.connect_http_with_auth(Some(record.access_token)).await
            }
        }
    }

    async fn connect_http_with_auth(&self, auth_token: Option<String>) -> Result<ServerInfo, ClientError> {
        let (mut headers, mut secrets) = resolve_headers(&self.config.headers, self.secret_resolver.as_ref()).await?;
        if let Some(token) = &auth_token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            secrets.push(token.clone());
        }
        for secret in &secrets {
            self.secret_registry.register(secret.clone());
        }

        let params = HttpParams {
            url: self.config.url.clone(),
            headers,
            auth_token,
            timeout: self.config.connect_timeout,
        };
        let transport = match self.config.protocol {
            ProtocolHint::Sse => UpstreamTransport::sse(params),
            _ => UpstreamTransport::http(params),
        };

        if let Err(e) = transport.start().await {
            for secret in &secrets {
                self.secret_registry.unregister(secret);
            }
            return Err(e.into());
        }

        let info = match transport.initialize(self.config.connect_timeout).await {
            Ok(info) => info,
            Err(e) => {
                let _ = transport.close().await;
                for secret in &secrets {
                    self.secret_registry.unregister(secret);
                }
                return Err(e.into());
            }
        };

        *self.registered_secrets.lock().await = secrets;
        *self.transport.lock().await = Some(transport);
        Ok(info)
    }

    async fn oauth_login_or_refresh(&self) -> Result<OAuthTokenRecord, ClientError> {
        let key = mcpup_oauth::server_key(&self.config.name, &self.config.url);
        if let Some(store) = &self.token_store
            && let Ok(Some(record)) = store.get_oauth_token(&key).await
        {
            if !record.is_expired() {
                return Ok(record);
            }
            if let Ok(refreshed) = self.oauth.refresh(&self.config.url, &record).await {
                let _ = store.save_oauth_token(&key, &refreshed).await;
                return Ok(refreshed);
            }
        }

        let known_client =
            self.config.oauth_known_client.as_ref().map(|(id, secret)| (id.as_str(), secret.as_str()));
        let record = self
            .oauth
            .authenticate(
                &self.config.name,
                &self.config.url,
                known_client,
                &self.config.oauth_scopes,
                &self.config.oauth_extra_params,
            )
            .await?;
        if let Some(store) = &self.token_store {
            let _ = store.save_oauth_token(&key, &record).await;
        }
        Ok(record)
    }

    /// Refreshes stored tokens directly, bypassing the browser flow, for
    /// callers that want to pre-empt an expiring token outside a connect
    /// attempt (`RefreshOAuthTokenDirect` in the external interface).
    pub async fn refresh_oauth_token(&self) -> Result<OAuthTokenRecord, ClientError> {
        let key = mcpup_oauth::server_key(&self.config.name, &self.config.url);
        let store = self.token_store.as_ref().ok_or_else(|| ClientError::Config("no token store configured".to_string()))?;
        let record = store
            .get_oauth_token(&key)
            .await
            .map_err(ClientError::Auth)?
            .ok_or_else(|| ClientError::Auth("no stored OAuth token for this server".to_string()))?;
        let refreshed = self.oauth.refresh(&self.config.url, &record).await?;
        let _ = store.save_oauth_token(&key, &refreshed).await;
        Ok(refreshed)
    }

    /// Forces the interactive browser login flow regardless of any cached
    /// token (`TriggerOAuthLogin`).
    pub async fn trigger_oauth_login(&self) -> Result<OAuthTokenRecord, ClientError> {
        let known_client =
            self.config.oauth_known_client.as_ref().map(|(id, secret)| (id.as_str(), secret.as_str()));
        let record = self
            .oauth
            .authenticate(
                &self.config.name,
                &self.config.url,
                known_client,
                &self.config.oauth_scopes,
                &self.config.oauth_extra_params,
            )
            .await?;
        if let Some(store) = &self.token_store {
            let key = mcpup_oauth::server_key(&self.config.name, &self.config.url);
            let _ = store.save_oauth_token(&key, &record).await;
        }
        Ok(record)
    }

    /// Lists tools, caching the result for the life of this connection and
    /// retrying up to twice (100ms apart) if the upstream reports zero
    /// tools, since some servers answer `tools/list` before their own
    /// registration has settled.
    pub async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ClientError> {
        if let Some(cached) = self.tools_cache.lock().await.as_ref() {
            return Ok(cached.clone());
        }

        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(ClientError::NotConnected)?;

        let mut tools = transport.list_tools().await?;
        for _ in 0..2 {
            if !tools.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            tools = transport.list_tools().await?;
        }
        drop(guard);

        let metadata: Vec<ToolMetadata> =
            tools.iter().map(|tool| ToolMetadata::from_tool(&self.config.name, tool)).collect();
        *self.tools_cache.lock().await = Some(metadata.clone());
        Ok(metadata)
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ClientError> {
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(ClientError::NotConnected)?;
        Ok(transport.call_tool(name, arguments).await?)
    }

    pub async fn set_tool_list_changed_handler(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.set_tool_list_changed_handler(callback).await;
        }
    }

    /// Ordered teardown: the transport closes first (dropping its write
    /// half triggers EOF on a stdio child before the supervisor's own
    /// escalating shutdown kicks in), then the supervised process/container,
    /// then registered secrets are unregistered from the log sanitizer.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if let Some(transport) = self.transport.lock().await.take()
            && let Err(e) = transport.close().await
        {
            tracing::warn!(server = self.config.name, error = %e, "error closing transport during disconnect");
        }

        if let Some(supervised) = self.supervised.lock().await.take() {
            supervised.disconnect().await;
        }

        *self.container_name.lock().await = None;

        let secrets = std::mem::take(&mut *self.registered_secrets.lock().await);
        for secret in secrets {
            self.secret_registry.unregister(&secret);
        }

        *self.tools_cache.lock().await = None;
        Ok(())
    }

    pub async fn check_connection_health(&self) -> bool {
        match self.transport.lock().await.as_ref() {
            Some(transport) => transport.is_connected().await,
            None => false,
        }
    }

    pub async fn get_diagnostics(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        out.insert("server_name".to_string(), json!(self.config.name));

        if let Some(transport) = self.transport.lock().await.as_ref() {
            out.insert("transport_kind".to_string(), json!(format!("{:?}", transport.kind())));
            out.insert("connected".to_string(), json!(transport.is_connected().await));
        }

        if let Some(container_name) = self.container_name.lock().await.as_ref() {
            out.insert("container_name".to_string(), json!(container_name));
            let status = mcpup_supervisor::docker::check_daemon_and_container(Some(container_name)).await;
            out.insert("docker_daemon_ok".to_string(), json!(status.daemon_ok));
            out.insert("container_running".to_string(), json!(status.container_running));
        }

        match self.supervised.lock().await.as_ref() {
            Some(SupervisedChild::Stdio { process }) => {
                out.insert("pid".to_string(), json!(process.pid()));
            }
            Some(SupervisedChild::Docker { process, container_id, .. }) => {
                out.insert("pid".to_string(), json!(process.pid()));
                out.insert("container_id".to_string(), json!(container_id));
            }
            None => {}
        }

        out
    }
}

/// Assembles the full `docker` argv: the `run` subcommand token first (any
/// flag placed ahead of it is parsed by `docker` as a *global* option and
/// rejected — `--name`/`--label`/`--cidfile` are `run` flags, not global
/// ones), then name, ownership labels, cidfile path, then whatever
/// [`isolation::build_docker_run`] already decided (image, mounts, env, the
/// wrapped command). Kept free of `&self` so the splice order is
/// unit-testable without spawning anything.
fn docker_spawn_args(
    container_name: &str,
    labels: &ContainerLabels,
    cidfile: &std::path::Path,
    run_args: Vec<String>,
) -> Vec<String> {
    let mut iter = run_args.into_iter();
    let run_token = iter.next().unwrap_or_else(|| "run".to_string());

    let mut args = vec![run_token, "--name".to_string(), container_name.to_string()];
    args.extend(labels.as_docker_args());
    args.push("--cidfile".to_string());
    args.push(cidfile.to_string_lossy().to_string());
    args.extend(iter);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_spawn_args_puts_run_first_then_name_labels_cidfile_then_rest() {
        let labels = ContainerLabels { instance_id: "inst-1".to_string(), server_name: "ddg".to_string(), created_by_pid: 7 };
        let cidfile = std::path::Path::new("/tmp/mcpproxy-cid-ddg");
        let run_args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string(), "alpine".to_string()];

        let args = docker_spawn_args("mcpproxy-ddg-a1b2", &labels, cidfile, run_args);

        // `run` must be the very first token: anything ahead of it is parsed
        // by docker as a global option, and `--name`/`--label`/`--cidfile`
        // are `run`-scoped flags, not global ones.
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "--name");
        assert_eq!(args[2], "mcpproxy-ddg-a1b2");
        assert!(args.iter().any(|a| a == "com.mcpproxy.instance=inst-1"));
        assert!(args.iter().any(|a| a == "com.mcpproxy.server=ddg"));
        let cidfile_idx = args.iter().position(|a| a == "--cidfile").expect("cidfile flag present");
        assert_eq!(args[cidfile_idx + 1], "/tmp/mcpproxy-cid-ddg");
        // The rest of the wrapped-command argv must come last, unmodified in order.
        assert_eq!(&args[args.len() - 3..], ["--rm", "-i", "alpine"]);
    }

    #[test]
    fn docker_spawn_args_places_run_before_name_and_cidfile() {
        let labels = ContainerLabels { instance_id: "inst-1".to_string(), server_name: "fs".to_string(), created_by_pid: 1 };
        let cidfile = std::path::Path::new("/tmp/mcpproxy-cid-fs");
        let run_args = vec!["run".to_string()];

        let args = docker_spawn_args("mcpproxy-fs-zzzz", &labels, cidfile, run_args);
        assert_eq!(args[0], "run");
        let name_idx = args.iter().position(|a| a == "--name").unwrap();
        let cidfile_idx = args.iter().position(|a| a == "--cidfile").unwrap();
        assert!(name_idx > 0 && cidfile_idx > name_idx);
    }
}
