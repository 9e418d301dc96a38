//! src/errors.rs
//!
//! Error taxonomy for the scheduler core. One enum per kind named in the
//! error-handling design: configuration, load-balancer (auth/transport/
//! business), score calculation, and selection. Metrics-scrape failures are
//! not represented as an error type here — a scrape either yields metrics or
//! it doesn't, and the caller never needs to know why (see `MetricsCollector`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

/// Failure classification for a membership-fetch attempt, per the
/// specification's serious-vs-transient table. `is_serious` answers whether
/// the failure should advance a pool's `consecutive_failures` counter.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("load-balancer reported not found: {0}")]
    NotFound(String),
    #[error("load-balancer server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("load-balancer api error: {0}")]
    Api(String),
}

impl LoadBalancerError {
    /// Whether this failure should count toward `consecutive_failures`.
    pub fn is_serious(&self) -> bool {
        match self {
            LoadBalancerError::Timeout => true,
            LoadBalancerError::Network(_) => false,
            LoadBalancerError::NotFound(_) => true,
            LoadBalancerError::Auth(_) => false,
            LoadBalancerError::ServerError { .. } => false,
            LoadBalancerError::Api(_) => true,
        }
    }

    /// Whether the caller should drop its cached token and re-authenticate
    /// before retrying.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, LoadBalancerError::Auth(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoadBalancerError::Timeout => "network timeout",
            LoadBalancerError::Network(_) => "network error",
            LoadBalancerError::NotFound(_) => "pool not found",
            LoadBalancerError::Auth(_) => "authentication failed",
            LoadBalancerError::ServerError { .. } => "load-balancer server error",
            LoadBalancerError::Api(_) => "api error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("scheduling failed: {0}")]
    Scheduling(String),
}
