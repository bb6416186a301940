//! Subprocess and Docker container supervision for upstream MCP servers:
//! process-group lifecycle, idempotent container creation, and the
//! isolation policy deciding when a stdio command gets wrapped in Docker.

pub mod docker;
pub mod isolation;
pub mod naming;
pub mod process;

pub use docker::{
    ContainerLabels, DaemonStatus, ServerMutexMap, cidfile_path, cleanup_existing, poll_cidfile,
    prepare_stdio_container, stop_container, tail_logs,
};
pub use isolation::{IsolationDefaults, ServerIsolationConfig, WrappedRun};
pub use naming::{container_name, read_or_create_instance_id, sanitize_name};
pub use process::{ProcessHandle, StderrLine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn child process: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("timed out waiting for docker to write the cidfile")]
    CidfileTimeout,
    #[error("docker daemon unreachable")]
    DaemonUnreachable,
}

/// What a connected upstream's supervision context looks like while it's
/// in the `Ready` state; torn down in full before the slot can be reused.
pub enum SupervisedChild {
    Stdio {
        process: ProcessHandle,
    },
    Docker {
        process: ProcessHandle,
        container_id: String,
        container_name: String,
        log_task: Option<tokio::task::JoinHandle<()>>,
    },
}

impl SupervisedChild {
    /// Tears down every resource this variant owns. Each step logs and
    /// continues on failure rather than aborting the rest of the sequence.
    pub async fn disconnect(self) {
        match self {
            SupervisedChild::Stdio { process } => {
                if let Err(e) = process.shutdown().await {
                    tracing::error!(error = %e, "error shutting down stdio child");
                }
            }
            SupervisedChild::Docker { process, container_id, container_name, log_task } => {
                if let Some(task) = log_task {
                    task.abort();
                }
                // The `docker run --rm -i` process IS the child here, so
                // closing its stdin (step 1 of `shutdown`) already signals
                // the container; `stop_container` is the backstop for a
                // container that outlives its launching process.
                if let Err(e) = process.shutdown().await {
                    tracing::error!(error = %e, container = container_name, "error shutting down docker-launching process");
                }
                docker::stop_container(&container_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigterm_grace_is_shorter_than_mcp_close_timeout() {
        assert!(process::SIGTERM_GRACE < process::MCP_CLOSE_TIMEOUT);
    }
}
