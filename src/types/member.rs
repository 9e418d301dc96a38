//! Pool member (endpoint) identity and mutable telemetry state.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

/// Initial score assigned to a freshly discovered member: small and
/// strictly positive, so it remains eligible for selection but unfavoured
/// until its first real metrics sweep.
pub const INITIAL_SCORE: f64 = 0.001;

/// The three metrics the scoring engine consumes. Kept as named optional
/// fields rather than a generic map: the metric set is fixed and small, and
/// each algorithm family references specific metrics by name (`waiting_queue`
/// plus `cache_usage` for S1, plus `running_req` for S2).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_queue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_req: Option<f64>,
}

impl Metrics {
    pub fn is_empty(&self) -> bool {
        self.waiting_queue.is_none() && self.cache_usage.is_none() && self.running_req.is_none()
    }

    /// S1 algorithms need `waiting_queue` and `cache_usage`.
    pub fn has_s1_metrics(&self) -> bool {
        self.waiting_queue.is_some() && self.cache_usage.is_some()
    }

    /// S2 algorithms additionally need `running_req`.
    pub fn has_s2_metrics(&self) -> bool {
        self.has_s1_metrics() && self.running_req.is_some()
    }
}

/// A single backend endpoint within a pool. Equality and hashing are keyed
/// on `(ip, port)` only — `metrics` and `score` are mutable runtime state,
/// not part of identity.
#[derive(Debug, Clone)]
pub struct Member {
    pub ip: IpAddr,
    pub port: u16,
    pub metrics: Metrics,
    pub score: f64,
}

impl Member {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            metrics: Metrics::default(),
            score: INITIAL_SCORE,
        }
    }

    pub fn key(&self) -> (IpAddr, u16) {
        (self.ip, self.port)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Parse `"ip:port"` candidate strings from the selection front-end
    /// adapter and the upstream load-balancer's `name` field alike. The port
    /// is taken from the trailing segment after the last colon, so it also
    /// works for the (unused here) IPv6-in-brackets case via `rsplit_once`.
    pub fn parse_address(s: &str) -> Option<(IpAddr, u16)> {
        let (ip_str, port_str) = s.rsplit_once(':')?;
        let ip_str = ip_str.trim_start_matches('[').trim_end_matches(']');
        let ip = IpAddr::from_str(ip_str).ok()?;
        let port: u16 = port_str.parse().ok()?;
        if port == 0 {
            return None;
        }
        Some((ip, port))
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Member {}

impl std::hash::Hash for Member {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_address() {
        let (ip, port) = Member::parse_address("10.0.0.1:8000").unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
        assert_eq!(port, 8000);
    }

    #[test]
    fn rejects_zero_port_and_garbage() {
        assert!(Member::parse_address("10.0.0.1:0").is_none());
        assert!(Member::parse_address("not-an-address").is_none());
        assert!(Member::parse_address("10.0.0.1:notaport").is_none());
    }

    #[test]
    fn new_member_has_initial_score() {
        let m = Member::new("10.0.0.1".parse().unwrap(), 8000);
        assert_eq!(m.score, INITIAL_SCORE);
        assert!(m.metrics.is_empty());
    }
}
