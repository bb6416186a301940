//! Stdio transport construction: wraps a spawned child's already-piped
//! stdin/stdout into a [`turbomcp_stdio::StdioTransport`].
//!
//! The child process itself is owned by `mcpup-supervisor::ProcessHandle`,
//! which hands over the pipes via `take_stdio()` at connect time and keeps
//! the `Child` for signal-based shutdown. This transport never reaches back
//! into the supervisor for process control.

use tokio::process::{ChildStdin, ChildStdout};
use turbomcp_client::{Client, SharedClient};
use turbomcp_stdio::StdioTransport;

use crate::TransportError;

pub fn build(stdout: ChildStdout, stdin: ChildStdin) -> Result<SharedClient<StdioTransport>, TransportError> {
    let transport = StdioTransport::from_raw(stdout, stdin)
        .map_err(|e| TransportError::Start(e.to_string()))?;
    Ok(SharedClient::new(Client::new(transport)))
}

// `build` takes a real ChildStdin/ChildStdout pair, so exercising it needs an
// actual spawned child; covered by mcpup-client's stdio integration tests.
