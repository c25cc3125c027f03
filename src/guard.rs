//! Explicit call-site guard for gated operations.
//!
//! Instead of intercepting handlers through annotations or middleware
//! reflection, each gated operation (login, registration, ...) constructs a
//! [`RateLimitGuard`] and calls [`check`](RateLimitGuard::check) before
//! doing any work. The guard derives the client key, consults the limiter,
//! and surfaces rejection as a typed error for the caller to map to a
//! "too many requests" response.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};
use crate::ratelimit::{ClientKey, RateLimiter};

/// Proxy-forwarding headers consulted when resolving the client address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedHeaders<'a> {
    /// Value of the `X-Forwarded-For` header, if present
    pub forwarded_for: Option<&'a str>,
    /// Value of the `X-Real-IP` header, if present
    pub real_ip: Option<&'a str>,
}

/// Resolve the client address behind forwarding proxies.
///
/// Takes the first address of a comma-separated `X-Forwarded-For` value,
/// falling back to `X-Real-IP`, falling back to the raw connection address.
/// The literal `"unknown"` placeholder some proxies insert counts as absent.
pub fn resolve_client_ip(headers: ForwardedHeaders<'_>, remote_addr: &str) -> String {
    if let Some(ip) = first_address(headers.forwarded_for) {
        return ip;
    }
    if let Some(ip) = first_address(headers.real_ip) {
        return ip;
    }
    remote_addr.to_string()
}

/// First usable address in a header value, if any.
fn first_address(header: Option<&str>) -> Option<String> {
    let value = header?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
        return None;
    }

    // A chain of proxies appends addresses; the first entry is the client.
    let first = value.split(',').next().unwrap_or(value).trim();
    if first.is_empty() || first.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(first.to_string())
    }
}

/// Guards one operation with a shared [`RateLimiter`].
///
/// The operation name namespaces the quota, so a `login` guard and a
/// `register` guard backed by the same limiter track separate budgets for
/// the same client.
pub struct RateLimitGuard<C: Clock = SystemClock> {
    /// The shared rate limiter instance
    limiter: Arc<RateLimiter<C>>,
    /// Operation name used as the quota namespace
    operation: String,
}

impl<C: Clock> RateLimitGuard<C> {
    /// Create a guard for `operation` backed by `limiter`.
    pub fn new(limiter: Arc<RateLimiter<C>>, operation: impl Into<String>) -> Self {
        Self {
            limiter,
            operation: operation.into(),
        }
    }

    /// Admit or reject a request from `client`.
    ///
    /// Returns [`FloodgateError::RateLimited`] when the client's quota for
    /// this operation is exhausted; the caller must skip the gated operation
    /// and surface a rate-limited response.
    pub fn check(&self, client: &str) -> Result<()> {
        let key = ClientKey::scoped(self.operation.clone(), client).to_string();

        if self.limiter.allow_request(&key) {
            Ok(())
        } else {
            warn!(
                operation = %self.operation,
                client = %client,
                "Rejected gated operation"
            );
            Err(FloodgateError::RateLimited { key })
        }
    }

    /// Clear the client's penalty after a definitively successful operation.
    ///
    /// A successful login should not leave earlier failed attempts counted
    /// against the client.
    pub fn record_success(&self, client: &str) {
        let key = ClientKey::scoped(self.operation.clone(), client).to_string();
        self.limiter.reset_limit(&key);

        debug!(
            operation = %self.operation,
            client = %client,
            "Cleared rate limit after successful operation"
        );
    }
}
