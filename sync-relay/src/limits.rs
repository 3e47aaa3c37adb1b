//! Admission limits for the relay listener.
//!
//! The relay port is plaintext and unauthenticated, so anything that can
//! reach it can ask us to open outbound connections. Two limits apply:
//! - **Source IP** request rate, via a governor keyed limiter, checked at
//!   accept time
//! - **Concurrent sessions**, via a semaphore whose permit is taken once a
//!   well-formed request arrives and lives as long as the session

use crate::config::RelayConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Admission limits for relay connections.
#[derive(Clone)]
pub struct RelayLimits {
    /// Limits relay requests per source IP.
    ///
    /// Configured via `relay.requests_per_minute_per_ip`.
    request_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Caps open relay sessions.
    ///
    /// Configured via `relay.max_concurrent_sessions`.
    sessions: Arc<Semaphore>,
}

impl std::fmt::Debug for RelayLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLimits")
            .field("request_limiter", &"KeyedLimiter<IpAddr>")
            .field("available_sessions", &self.sessions.available_permits())
            .finish()
    }
}

impl RelayLimits {
    /// Create limits from configuration.
    ///
    /// Zero values are raised to one.
    pub fn new(config: &RelayConfig) -> Self {
        let per_minute =
            NonZeroU32::new(config.requests_per_minute_per_ip).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute);

        Self {
            request_limiter: Arc::new(RateLimiter::keyed(quota)),
            sessions: Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1))),
        }
    }

    /// Check if a relay request from `ip` is allowed.
    pub fn check_request(&self, ip: IpAddr) -> Result<(), RelayLimitError> {
        self.request_limiter
            .check_key(&ip)
            .map_err(|_| RelayLimitError::RequestLimitExceeded)
    }

    /// Reserve a session slot. The slot is released when the permit drops.
    pub fn try_open_session(&self) -> Result<OwnedSemaphorePermit, RelayLimitError> {
        self.sessions
            .clone()
            .try_acquire_owned()
            .map_err(|_| RelayLimitError::SessionLimitReached)
    }

    /// Number of session slots currently free.
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    /// Evict idle entries from the keyed limiter.
    pub fn shrink(&self) {
        self.request_limiter.retain_recent();
    }
}

/// Relay admission errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayLimitError {
    /// Too many relay requests from this address.
    #[error("relay request rate limit exceeded")]
    RequestLimitExceeded,
    /// All relay session slots are in use.
    #[error("relay session limit reached")]
    SessionLimitReached,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(per_minute: u32, sessions: usize) -> RelayConfig {
        RelayConfig {
            requests_per_minute_per_ip: per_minute,
            max_concurrent_sessions: sessions,
            ..RelayConfig::default()
        }
    }

    #[test]
    fn request_limit_allows_within_quota() {
        let limits = RelayLimits::new(&test_config(3, 10));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        for _ in 0..3 {
            assert!(limits.check_request(ip).is_ok());
        }
        assert_eq!(
            limits.check_request(ip),
            Err(RelayLimitError::RequestLimitExceeded)
        );
    }

    #[test]
    fn different_addresses_have_independent_limits() {
        let limits = RelayLimits::new(&test_config(1, 10));
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();

        assert!(limits.check_request(a).is_ok());
        assert!(limits.check_request(a).is_err());
        assert!(limits.check_request(b).is_ok());
    }

    #[test]
    fn session_permits_are_released_on_drop() {
        let limits = RelayLimits::new(&test_config(10, 2));

        let first = limits.try_open_session().unwrap();
        let _second = limits.try_open_session().unwrap();
        assert_eq!(
            limits.try_open_session().unwrap_err(),
            RelayLimitError::SessionLimitReached
        );

        drop(first);
        assert_eq!(limits.available_sessions(), 1);
        assert!(limits.try_open_session().is_ok());
    }

    #[test]
    fn zero_values_are_raised() {
        let limits = RelayLimits::new(&test_config(0, 0));
        assert_eq!(limits.available_sessions(), 1);
        assert!(limits.check_request("192.0.2.9".parse().unwrap()).is_ok());
    }

    #[test]
    fn limits_are_debug() {
        let limits = RelayLimits::new(&test_config(1, 1));
        let debug = format!("{:?}", limits);
        assert!(debug.contains("RelayLimits"));
        limits.shrink();
    }
}
