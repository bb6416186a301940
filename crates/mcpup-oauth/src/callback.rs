//! Loopback HTTP callback server for the OAuth authorization code flow
//! (RFC 8252). Binds an ephemeral port on `127.0.0.1`, serves exactly one
//! `GET /callback?code=...&state=...`, and shuts down.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use crate::OAuthError;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_BYTES: usize = 8192;

pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

/// Starts the loopback server, returning the redirect URI to register with
/// the authorization server and a future that resolves once the callback
/// has been received (or the timeout elapses).
pub async fn start_loopback_server() -> Result<(String, impl std::future::Future<Output = Result<CallbackResult, OAuthError>>), OAuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| OAuthError::Callback(format!("failed to bind loopback port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| OAuthError::Callback(e.to_string()))?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{port}/callback");

    let wait = async move {
        timeout(CALLBACK_TIMEOUT, accept_one(listener))
            .await
            .map_err(|_| OAuthError::Callback("timed out waiting for browser callback".to_string()))?
    };

    Ok((redirect_uri, wait))
}

async fn accept_one(listener: TcpListener) -> Result<CallbackResult, OAuthError> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| OAuthError::Callback(format!("accept failed: {e}")))?;

    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| OAuthError::Callback(format!("read failed: {e}")))?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let request_line = request.lines().next().unwrap_or_default();
    let path_and_query = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| OAuthError::Callback("malformed request line".to_string()))?;

    if !path_and_query.starts_with("/callback") {
        write_response(&mut stream, 404, "Not Found").await;
        return Err(OAuthError::Callback(format!("unexpected path: {path_and_query}")));
    }

    let query = path_and_query.splitn(2, '?').nth(1).unwrap_or_default();
    let params = parse_query(query);

    let code = params.get("code").cloned();
    let state = params.get("state").cloned();

    match (code, state) {
        (Some(code), Some(state)) => {
            write_response(&mut stream, 200, "Authentication complete. You may close this window.").await;
            Ok(CallbackResult { code, state })
        }
        _ => {
            write_response(&mut stream, 400, "Missing code or state parameter").await;
            Err(OAuthError::Callback("missing code or state in callback".to_string()))
        }
    }
}

async fn write_response(stream: &mut tokio::net::TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(value)))
        })
        .collect()
}

fn url_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte as char);
                    i += 3;
                    continue;
                }
                out.push('%');
                i += 1;
            }
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_extracts_code_and_state() {
        let params = parse_query("code=abc123&state=xyz");
        assert_eq!(params.get("code"), Some(&"abc123".to_string()));
        assert_eq!(params.get("state"), Some(&"xyz".to_string()));
    }

    #[test]
    fn url_decode_handles_percent_and_plus() {
        assert_eq!(url_decode("a%20b+c"), "a b c");
    }

    #[tokio::test]
    async fn loopback_binds_ephemeral_port() {
        let (redirect_uri, _waiter) = start_loopback_server().await.unwrap();
        assert!(redirect_uri.starts_with("http://127.0.0.1:"));
        assert!(redirect_uri.ends_with("/callback"));
    }
}
