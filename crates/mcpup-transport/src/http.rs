//! HTTP/SSE transport construction on top of
//! [`turbomcp_http::StreamableHttpClientTransport`], which already
//! negotiates plain JSON vs. `text/event-stream` responses via the
//! `Accept` header — one transport type backs both the `http` and `sse`
//! protocol hints.

use std::collections::HashMap;
use std::time::Duration;

use turbomcp_client::{Client, SharedClient};
use turbomcp_http::{StreamableHttpClientConfig, StreamableHttpClientTransport};

/// Resolved connection parameters for an HTTP or SSE upstream: the bearer
/// token and extra headers have already been through the OAuth/secret
/// resolution chain by the time this is built.
#[derive(Debug, Clone)]
pub struct HttpParams {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

pub fn build(params: HttpParams) -> SharedClient<StreamableHttpClientTransport> {
    let config = StreamableHttpClientConfig {
        base_url: params.url,
        headers: params.headers,
        auth_token: params.auth_token,
        timeout: params.timeout,
        ..StreamableHttpClientConfig::default()
    };
    let transport = StreamableHttpClientTransport::new(config);
    SharedClient::new(Client::new(transport))
}
