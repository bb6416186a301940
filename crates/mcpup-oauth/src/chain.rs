//! Auth strategy chain support: error classification and the
//! one-flow-at-a-time guard for interactive OAuth.
//!
//! The chain itself (trying headers, then no-auth, then OAuth against a
//! transport) is driven by the transport layer, which is the only party
//! that can actually attempt `start()`/`initialize()`; this module supplies
//! the classification rules and the shared in-progress bookkeeping.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// The three strategies tried, in order, when connecting an HTTP/SSE
/// upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    Headers,
    NoAuth,
    OAuth,
}

/// How a failure during a connect attempt should steer the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// `no headers configured`, `no command specified`: skip this strategy.
    Config,
    /// 401 / `invalid_token`: jump straight to OAuth.
    OAuthRequired,
    /// 403 / Forbidden: fall through, unless OAuth was already attempted.
    Auth,
    /// HTTP 410 or an `sse transport has been removed`-style message.
    DeprecatedEndpoint,
    /// 5xx during the OAuth strategy specifically: treat as a stale token.
    ServerDuringOAuth,
    /// Anything else: abort the whole chain.
    Fatal,
}

/// Classifies an error surfaced during `start()`/`initialize()` so the
/// chain knows whether to try the next strategy, jump to OAuth, or give up.
pub fn classify(message: &str, strategy: AuthStrategy) -> ErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("no headers configured") || lower.contains("no command specified") {
        return ErrorClass::Config;
    }
    if lower.contains("410") || lower.contains("gone") || lower.contains("sse transport has been removed") {
        return ErrorClass::DeprecatedEndpoint;
    }
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid_token") {
        return ErrorClass::OAuthRequired;
    }
    if strategy == AuthStrategy::OAuth && is_server_error(&lower) {
        return ErrorClass::ServerDuringOAuth;
    }
    if lower.contains("403") || lower.contains("forbidden") || lower.contains("authentication") {
        return ErrorClass::Auth;
    }
    ErrorClass::Fatal
}

fn is_server_error(lower: &str) -> bool {
    ["500", "501", "502", "503", "504"].iter().any(|code| lower.contains(code))
}

/// An in-progress interactive OAuth flow for a given server, reported back
/// to a concurrent caller instead of opening a second browser window.
#[derive(Debug, Clone)]
pub struct OAuthPending {
    pub server_name: String,
    pub server_url: String,
    pub message: String,
}

/// Tracks which servers currently have an outstanding interactive OAuth
/// flow. Guarded by a single RW lock per the concurrency model: readers
/// (the pending check) never block each other.
#[derive(Clone, Default)]
pub struct OAuthInProgressTracker {
    in_progress: Arc<RwLock<HashSet<String>>>,
}

impl OAuthInProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim the flow for `server_name`. Returns `Err` with a
    /// structured pending notice if another flow is already running.
    pub fn try_start(&self, server_name: &str, server_url: &str) -> Result<OAuthGuard, OAuthPending> {
        let mut guard = self.in_progress.write();
        if guard.contains(server_name) {
            return Err(OAuthPending {
                server_name: server_name.to_string(),
                server_url: server_url.to_string(),
                message: format!(
                    "OAuth login already in progress for '{server_name}' ({server_url}); \
                     finish the open browser flow or rerun `auth login` once it completes"
                ),
            });
        }
        guard.insert(server_name.to_string());
        Ok(OAuthGuard {
            tracker: self.clone(),
            server_name: server_name.to_string(),
        })
    }
}

/// RAII guard releasing the in-progress flag when the flow completes or is
/// abandoned (dropped on both success and error paths).
pub struct OAuthGuard {
    tracker: OAuthInProgressTracker,
    server_name: String,
}

impl Drop for OAuthGuard {
    fn drop(&mut self) {
        self.tracker.in_progress.write().remove(&self.server_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_401_as_oauth_required() {
        assert_eq!(classify("401 Unauthorized", AuthStrategy::NoAuth), ErrorClass::OAuthRequired);
    }

    #[test]
    fn classifies_410_as_deprecated() {
        assert_eq!(
            classify("the sse transport has been removed", AuthStrategy::Headers),
            ErrorClass::DeprecatedEndpoint
        );
    }

    #[test]
    fn classifies_5xx_during_oauth_as_stale_token() {
        assert_eq!(classify("503 Service Unavailable", AuthStrategy::OAuth), ErrorClass::ServerDuringOAuth);
    }

    #[test]
    fn classifies_5xx_outside_oauth_as_fatal() {
        assert_eq!(classify("503 Service Unavailable", AuthStrategy::NoAuth), ErrorClass::Fatal);
    }

    #[test]
    fn second_concurrent_flow_returns_pending() {
        let tracker = OAuthInProgressTracker::new();
        let _first = tracker.try_start("srv", "https://example.com").unwrap();
        let second = tracker.try_start("srv", "https://example.com");
        assert!(second.is_err());
    }

    #[test]
    fn guard_drop_releases_flag() {
        let tracker = OAuthInProgressTracker::new();
        {
            let _guard = tracker.try_start("srv", "https://example.com").unwrap();
        }
        assert!(tracker.try_start("srv", "https://example.com").is_ok());
    }
}
