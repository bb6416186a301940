//! Transport-agnostic upstream connection layer.
//!
//! Wire-protocol framing, JSON-RPC correlation, and capability negotiation
//! are owned by `turbomcp-client` and the concrete `turbomcp-stdio` /
//! `turbomcp-http` transports it drives — this crate's job is narrower:
//! pick the right transport for a server config, wire a spawned child's
//! piped stdio (or an HTTP/SSE endpoint) into it, and expose one small
//! surface the core client can drive uniformly regardless of which
//! variant is underneath.

mod error;
mod http;
mod pick;
mod stdio;

use std::sync::Arc;
use std::time::Duration;

pub use error::TransportError;
pub use http::HttpParams;
pub use pick::{ProtocolHint, TransportKind, pick_transport};

use tokio::process::{ChildStdin, ChildStdout};
use turbomcp_client::SharedClient;
use turbomcp_client::handlers::{HandlerResult, ToolListChangedHandler};
use turbomcp_http::StreamableHttpClientTransport;
use turbomcp_protocol::Implementation;
use turbomcp_protocol::types::Tool;
use turbomcp_stdio::StdioTransport;

/// Server identity negotiated during `initialize`, trimmed down from
/// `turbomcp_protocol::Implementation` to what diagnostics and connection
/// info snapshots need.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl From<Implementation> for ServerInfo {
    fn from(value: Implementation) -> Self {
        Self { name: value.name, version: value.version }
    }
}

/// One upstream connection's transport. Thin enum dispatch rather than a
/// trait object: the two concrete transports have incompatible generic
/// parameters on `SharedClient<T>`, and there are only ever three shapes.
pub enum UpstreamTransport {
    Stdio(SharedClient<StdioTransport>),
    Http(SharedClient<StreamableHttpClientTransport>),
    Sse(SharedClient<StreamableHttpClientTransport>),
}

impl UpstreamTransport {
    pub fn stdio(stdout: ChildStdout, stdin: ChildStdin) -> Result<Self, TransportError> {
        Ok(Self::Stdio(stdio::build(stdout, stdin)?))
    }

    pub fn http(params: HttpParams) -> Self {
        Self::Http(http::build(params))
    }

    pub fn sse(params: HttpParams) -> Self {
        Self::Sse(http::build(params))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::Sse(_) => TransportKind::Sse,
        }
    }

    /// Starts the underlying connection on a process-lifetime task; per the
    /// rule that only `initialize` honors a caller-supplied timeout, `start`
    /// runs to completion or failure with no deadline of its own.
    pub async fn start(&self) -> Result<(), TransportError> {
        match self {
            Self::Stdio(c) => c.connect().await,
            Self::Http(c) | Self::Sse(c) => c.connect().await,
        }
        .map_err(|e| TransportError::Start(e.to_string()))
    }

    pub async fn initialize(&self, timeout: Duration) -> Result<ServerInfo, TransportError> {
        let result = match self {
            Self::Stdio(c) => tokio::time::timeout(timeout, c.initialize()).await,
            Self::Http(c) | Self::Sse(c) => tokio::time::timeout(timeout, c.initialize()).await,
        };
        match result {
            Ok(Ok(init)) => Ok(init.server_info.into()),
            Ok(Err(e)) => Err(classify_core_error(e, "initialize")),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, TransportError> {
        match self {
            Self::Stdio(c) => c.list_tools().await,
            Self::Http(c) | Self::Sse(c) => c.list_tools().await,
        }
        .map_err(|e| classify_core_error(e, "list_tools"))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let result = match self {
            Self::Stdio(c) => c.call_tool(name, arguments).await,
            Self::Http(c) | Self::Sse(c) => c.call_tool(name, arguments).await,
        };
        result
            .map(|r| serde_json::to_value(r).unwrap_or(serde_json::Value::Null))
            .map_err(|e| classify_core_error(e, "call_tool"))
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        match self {
            Self::Stdio(c) => c.disconnect().await,
            Self::Http(c) | Self::Sse(c) => c.disconnect().await,
        }
        .map_err(|e| TransportError::Close(e.to_string()))
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Self::Stdio(c) => c.is_connected().await,
            Self::Http(c) | Self::Sse(c) => c.is_connected().await,
        }
    }

    /// Registers a callback invoked when the upstream emits
    /// `notifications/tools/list_changed`. Goes through `SharedClient`'s
    /// `with_client` escape hatch since tool-list-changed registration has
    /// no dedicated method on the shared wrapper.
    pub async fn set_tool_list_changed_handler(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        let handler: Arc<dyn ToolListChangedHandler> = Arc::new(ToolsChangedBridge { callback });
        match self {
            Self::Stdio(c) => c.with_client(|client| client.set_tool_list_changed_handler(handler)).await,
            Self::Http(c) | Self::Sse(c) => {
                c.with_client(|client| client.set_tool_list_changed_handler(handler)).await
            }
        }
    }
}

struct ToolsChangedBridge {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for ToolsChangedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsChangedBridge").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ToolListChangedHandler for ToolsChangedBridge {
    async fn handle_tool_list_changed(&self) -> HandlerResult<()> {
        (self.callback)();
        Ok(())
    }
}

/// Classifies a wire/core error as a broken pipe (connection lost) vs. an
/// ordinary call failure, so `mcpup-client::core` can decide whether to
/// reconnect or just surface the error. Generic over `Display` rather than
/// naming `turbomcp-client`'s own result-error type, since the exact type
/// alias it re-exports has drifted across released versions.
fn classify_core_error(err: impl std::fmt::Display, op: &str) -> TransportError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("broken pipe")
        || lowered.contains("connection reset")
        || lowered.contains("channel closed")
        || lowered.contains("not connected")
    {
        TransportError::Pipe(message)
    } else if op == "initialize" {
        TransportError::Initialize(message)
    } else {
        TransportError::Call(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_converts_from_implementation() {
        let implementation = Implementation {
            name: "acme-server".to_string(),
            title: None,
            version: "1.2.3".to_string(),
        };
        let info: ServerInfo = implementation.into();
        assert_eq!(info.name, "acme-server");
        assert_eq!(info.version, "1.2.3");
    }

    #[test]
    fn connection_lost_messages_classify_as_pipe_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        assert!(matches!(classify_core_error(err, "call_tool"), TransportError::Pipe(_)));
    }

    #[test]
    fn ordinary_failures_classify_by_operation() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "tool not found");
        assert!(matches!(classify_core_error(err, "call_tool"), TransportError::Call(_)));
    }
}
