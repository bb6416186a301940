//! Managed upstream MCP client: per-server connection lifecycle, stdio and
//! HTTP/SSE transports, OAuth, and process/Docker supervision wired
//! together behind one small request surface.

pub mod config;
pub mod core;
pub mod error;
pub mod managed;
pub mod secrets;
pub mod state;

pub use config::{ConfigError, ServerConfig, ToolMetadata};
pub use core::{CoreClient, CoreClientDeps};
pub use error::ClientError;
pub use managed::ManagedClient;
pub use secrets::{EnvSecretResolver, SecretResolver};
pub use state::{ConnectionInfo, ConnectionState, StateManager};
