//! A pool record: an immutable `(name, partition)` key plus the mutable
//! member list and failure counter the membership fetcher and metrics
//! collector maintain.

use std::collections::HashMap;
use std::net::IpAddr;

use super::engine::EngineType;
use super::member::Member;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub name: String,
    pub partition: String,
}

impl PoolKey {
    pub fn new(name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.partition)
    }
}

/// Counts from a membership reconciliation pass, logged by the membership
/// fetcher after each successful fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub preserved: usize,
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub key: PoolKey,
    pub engine_type: EngineType,
    pub members: Vec<Member>,
    pub consecutive_failures: u32,
    pub pool_fallback: bool,
    pub member_running_req_threshold: Option<f64>,
    pub member_waiting_queue_threshold: Option<f64>,
}

impl Pool {
    pub fn new(key: PoolKey, engine_type: EngineType, members: Vec<Member>) -> Self {
        Self {
            key,
            engine_type,
            members,
            consecutive_failures: 0,
            pool_fallback: false,
            member_running_req_threshold: None,
            member_waiting_queue_threshold: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn partition(&self) -> &str {
        &self.key.partition
    }

    /// Replace `members` with `new_members`, copying over `metrics`/`score`
    /// for any `(ip, port)` present in both the old and new lists, and
    /// resetting `consecutive_failures` to zero. Preserves `new_members`'
    /// order. Grounded in `Pool.update_members_smartly` of the original
    /// implementation.
    pub fn reconcile_members(&mut self, new_members: Vec<(IpAddr, u16)>) -> ReconcileStats {
        let old_map: HashMap<(IpAddr, u16), Member> =
            self.members.drain(..).map(|m| (m.key(), m)).collect();

        let mut stats = ReconcileStats {
            total: new_members.len(),
            ..Default::default()
        };

        let mut merged = Vec::with_capacity(new_members.len());
        for (ip, port) in new_members {
            if let Some(existing) = old_map.get(&(ip, port)) {
                merged.push(existing.clone());
                stats.preserved += 1;
            } else {
                merged.push(Member::new(ip, port));
                stats.added += 1;
            }
        }

        stats.removed = old_map.len().saturating_sub(stats.preserved);
        self.members = merged;
        self.consecutive_failures = 0;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn reconcile_preserves_metrics_and_score_for_retained_members() {
        let mut pool = Pool::new(
            PoolKey::new("p", "Common"),
            EngineType::Vllm,
            vec![Member::new(ip(10, 0, 0, 1), 8000)],
        );
        pool.members[0].score = 0.75;
        pool.members[0].metrics.waiting_queue = Some(3.0);
        pool.consecutive_failures = 2;

        let stats = pool.reconcile_members(vec![(ip(10, 0, 0, 1), 8000), (ip(10, 0, 0, 2), 8000)]);

        assert_eq!(stats.preserved, 1);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.total, 2);
        assert_eq!(pool.consecutive_failures, 0);
        assert_eq!(pool.members[0].score, 0.75);
        assert_eq!(pool.members[0].metrics.waiting_queue, Some(3.0));
        assert_eq!(pool.members[1].score, super::super::member::INITIAL_SCORE);
    }

    #[test]
    fn reconcile_drops_removed_members() {
        let mut pool = Pool::new(
            PoolKey::new("p", "Common"),
            EngineType::Vllm,
            vec![
                Member::new(ip(10, 0, 0, 1), 8000),
                Member::new(ip(10, 0, 0, 2), 8000),
            ],
        );
        let stats = pool.reconcile_members(vec![(ip(10, 0, 0, 1), 8000)]);
        assert_eq!(stats.removed, 1);
        assert_eq!(pool.members.len(), 1);
    }
}
