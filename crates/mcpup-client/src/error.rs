use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] mcpup_transport::TransportError),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error(transparent)]
    OAuth(#[from] mcpup_oauth::OAuthError),

    #[error("invalid OAuth parameter: {0}")]
    OAuthParameter(String),

    #[error("an OAuth login is already in progress: {0}")]
    OAuthPending(String),

    #[error("endpoint deprecated: {0}")]
    DeprecatedEndpoint(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("operation timed out")]
    Timeout,

    #[error(transparent)]
    Supervision(#[from] mcpup_supervisor::SupervisorError),

    #[error(transparent)]
    Env(#[from] mcpup_env::EnvError),

    #[error("cleanup error: {0}")]
    Cleanup(String),

    #[error("a tool list refresh is already in progress for this server")]
    ListInProgress,

    #[error("no active connection")]
    NotConnected,
}

impl From<mcpup_oauth::OAuthPending> for ClientError {
    fn from(pending: mcpup_oauth::OAuthPending) -> Self {
        ClientError::OAuthPending(pending.message)
    }
}
