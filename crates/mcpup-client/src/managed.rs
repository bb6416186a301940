//! Adds retry-aware state tracking and request serialization on top of
//! [`CoreClient`]: the piece an embedding application actually holds one of
//! per configured upstream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, ToolMetadata};
use crate::core::{CoreClient, CoreClientDeps};
use crate::error::ClientError;
use crate::state::{ConnectionInfo, StateManager};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Docker-isolated servers pay the cost of a fresh container per RPC, so
/// `list_tools` results are cached longer than the process lives.
const DOCKER_TOOLS_CACHE_TTL: Duration = Duration::from_secs(300);

/// One upstream server's managed connection: state machine, serialized
/// `list_tools`, a background health-check tick, and (for Docker-isolated
/// stdio servers) a fresh-connection-per-RPC policy instead of one held-open
/// session, since an ephemeral `--rm` container can't be reattached to
/// between calls.
pub struct ManagedClient {
    core: Arc<CoreClient>,
    state: Arc<StateManager>,
    is_docker: bool,
    list_lock: TokioMutex<()>,
    docker_tools_cache: TokioMutex<Option<(Instant, Vec<ToolMetadata>)>>,
    health_task: TokioMutex<Option<JoinHandle<()>>>,
}

impl ManagedClient {
    pub fn new(config: ServerConfig, deps: CoreClientDeps) -> Self {
        let server_name = config.name.clone();
        let core = Arc::new(CoreClient::new(config, deps));
        let is_docker = core.is_docker_isolated();
        Self {
            core,
            state: Arc::new(StateManager::new(server_name)),
            is_docker,
            list_lock: TokioMutex::new(()),
            docker_tools_cache: TokioMutex::new(None),
            health_task: TokioMutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        self.core.server_name()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.state.snapshot()
    }

    pub fn on_state_change(&self, observer: Arc<dyn Fn(ConnectionInfo) + Send + Sync>) {
        self.state.on_change(observer);
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.state.transition_connecting();
        match self.core.connect().await {
            Ok(info) => {
                let kind = self.core.transport_kind().await.unwrap_or(mcpup_transport::TransportKind::Stdio);
                self.state.transition_ready(kind, info.name, info.version);
                self.spawn_health_task().await;
                Ok(())
            }
            Err(e) => {
                self.state.transition_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Serialized so two concurrent callers never both trigger a refresh;
    /// the loser gets [`ClientError::ListInProgress`] rather than queuing
    /// behind the winner, since a stale cached result is an acceptable
    /// answer to return on the next call.
    pub async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ClientError> {
        let _permit = self.list_lock.try_lock().map_err(|_| ClientError::ListInProgress)?;

        if self.is_docker {
            if let Some((fetched_at, cached)) = self.docker_tools_cache.lock().await.clone()
                && fetched_at.elapsed() < DOCKER_TOOLS_CACHE_TTL
            {
                return Ok(cached);
            }
            self.core.connect().await?;
            let result = self.core.list_tools().await;
            let _ = self.core.disconnect().await;
            let tools = result?;
            *self.docker_tools_cache.lock().await = Some((Instant::now(), tools.clone()));
            Ok(tools)
        } else {
            self.core.list_tools().await
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ClientError> {
        if self.is_docker {
            self.core.connect().await?;
            let result = self.core.call_tool(name, arguments).await;
            let _ = self.core.disconnect().await;
            result
        } else {
            match self.core.call_tool(name, arguments.clone()).await {
                Err(ClientError::Transport(e)) if e.is_connection_lost() => {
                    self.state.transition_error(e.to_string());
                    Err(ClientError::Transport(e))
                }
                other => other,
            }
        }
    }

    pub async fn trigger_oauth_login(&self) -> Result<(), ClientError> {
        self.core.trigger_oauth_login().await.map(|_| ())
    }

    pub async fn refresh_oauth_token(&self) -> Result<(), ClientError> {
        self.core.refresh_oauth_token().await.map(|_| ())
    }

    pub async fn set_tool_list_changed_handler(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.core.set_tool_list_changed_handler(callback).await;
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if let Some(handle) = self.health_task.lock().await.take() {
            handle.abort();
        }
        let result = self.core.disconnect().await;
        self.state.transition_disconnected();
        result
    }

    pub async fn check_connection_health(&self) -> bool {
        self.core.check_connection_health().await
    }

    /// Merges connection-state fields (state, retry count, last error) with
    /// [`CoreClient::get_diagnostics`]' transport/process-level facts.
    pub async fn get_diagnostics(&self) -> BTreeMap<String, Value> {
        let mut out = self.core.get_diagnostics().await;
        let info = self.state.snapshot();
        out.insert("state".to_string(), serde_json::json!(format!("{:?}", info.state)));
        out.insert("retry_count".to_string(), serde_json::json!(info.retry_count));
        if let Some(err) = info.last_error {
            out.insert("last_error".to_string(), serde_json::json!(err));
        }
        out
    }

    /// Skipped entirely for Docker-isolated servers: there is no persistent
    /// connection to poll between calls, only ephemeral ones created per RPC.
    async fn spawn_health_task(&self) {
        if self.is_docker {
            return;
        }
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if !core.check_connection_health().await {
                    state.transition_error("periodic health check failed".to_string());
                }
            }
        });
        *self.health_task.lock().await = Some(handle);
    }
}
