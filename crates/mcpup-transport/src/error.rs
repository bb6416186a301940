use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("server config has neither a command nor a protocol hint implying stdio")]
    NoCommand,
    #[error("server config has neither a url nor a protocol hint implying http/sse")]
    NoUrl,
    #[error("transport failed to start: {0}")]
    Start(String),
    #[error("initialize failed: {0}")]
    Initialize(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("tool call failed: {0}")]
    Call(String),
    #[error("broken pipe: {0}")]
    Pipe(String),
    #[error("transport close failed: {0}")]
    Close(String),
}

impl TransportError {
    /// True for failures that indicate the upstream process or socket is
    /// gone rather than a single request having failed, mirroring the
    /// broken-pipe detection `mcpup-client::core` layers on top of the
    /// OAuth chain's message classifier.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Pipe(_) | Self::Close(_))
    }
}
