//! Transport selection: explicit `protocol` hint wins, otherwise `command`
//! implies stdio and `url` implies streamable-HTTP.

use crate::TransportError;

/// The `protocol` field on a server config, as configured by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolHint {
    #[default]
    Auto,
    Stdio,
    Http,
    /// Legacy bare SSE upstream; many of these endpoints now answer with
    /// HTTP 410 ("sse transport has been removed"), which the auth chain's
    /// classifier treats as a distinct, non-retryable error.
    Sse,
    StreamableHttp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

/// Picks the transport kind for a server config, given whether it has a
/// stdio command and/or an HTTP(S) URL configured.
pub fn pick_transport(
    hint: ProtocolHint,
    has_command: bool,
    has_url: bool,
) -> Result<TransportKind, TransportError> {
    match hint {
        ProtocolHint::Stdio => {
            if has_command {
                Ok(TransportKind::Stdio)
            } else {
                Err(TransportError::NoCommand)
            }
        }
        ProtocolHint::Http | ProtocolHint::StreamableHttp => {
            if has_url {
                Ok(TransportKind::Http)
            } else {
                Err(TransportError::NoUrl)
            }
        }
        ProtocolHint::Sse => {
            if has_url {
                Ok(TransportKind::Sse)
            } else {
                Err(TransportError::NoUrl)
            }
        }
        ProtocolHint::Auto => {
            if has_command {
                Ok(TransportKind::Stdio)
            } else if has_url {
                Ok(TransportKind::Http)
            } else {
                Err(TransportError::NoCommand)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_protocol_wins_over_command_presence() {
        assert_eq!(pick_transport(ProtocolHint::Http, true, true), Ok(TransportKind::Http));
    }

    #[test]
    fn command_implies_stdio_under_auto() {
        assert_eq!(pick_transport(ProtocolHint::Auto, true, false), Ok(TransportKind::Stdio));
    }

    #[test]
    fn url_implies_http_under_auto_without_command() {
        assert_eq!(pick_transport(ProtocolHint::Auto, false, true), Ok(TransportKind::Http));
    }

    #[test]
    fn neither_command_nor_url_is_an_error() {
        assert!(pick_transport(ProtocolHint::Auto, false, false).is_err());
    }

    #[test]
    fn stdio_hint_without_command_errors() {
        assert!(pick_transport(ProtocolHint::Stdio, false, false).is_err());
    }
}
