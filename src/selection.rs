//! src/selection.rs
//!
//! C8: the selection front-end adapter. Turns an HTTP request's
//! `(pool_name, partition, candidates)` into a single chosen member, or the
//! string `"none"`/`"fallback"` sentinels, by intersecting the candidate set
//! with live pool membership, applying per-member thresholds, and handing
//! off to the weighted selector (C3).

use crate::registry::PoolRegistry;
use crate::selector;
use crate::types::{Member, PoolKey};

pub const FALLBACK_SENTINEL: &str = "fallback";
pub const NONE_SENTINEL: &str = "none";

/// Select a member for `pool_name`/`partition` from `candidates` (each an
/// `"ip:port"` string in the caller's preferred order). Never fails: every
/// input that can't produce a real member yields one of the two sentinels.
pub async fn select_member(
    registry: &PoolRegistry,
    pool_name: &str,
    partition: &str,
    candidates: &[String],
) -> String {
    let key = PoolKey::new(pool_name, partition);
    let Some(handle) = registry.get(&key) else {
        return NONE_SENTINEL.to_string();
    };
    let pool = handle.read().await;

    if pool.pool_fallback {
        return FALLBACK_SENTINEL.to_string();
    }

    let candidate_keys: Vec<(std::net::IpAddr, u16)> = candidates
        .iter()
        .filter_map(|c| match Member::parse_address(c) {
            Some(addr) => Some(addr),
            None => {
                tracing::warn!(candidate = %c, "skipping unparsable candidate address");
                None
            }
        })
        .collect();

    let intersected: Vec<&Member> = pool
        .members
        .iter()
        .filter(|m| candidate_keys.contains(&m.key()))
        .collect();

    let filtered: Vec<Member> = intersected
        .into_iter()
        .filter(|m| within_thresholds(m, pool.member_running_req_threshold, pool.member_waiting_queue_threshold))
        .cloned()
        .collect();

    match selector::select(&filtered) {
        Some(chosen) => chosen.address(),
        None => NONE_SENTINEL.to_string(),
    }
}

/// Members without the relevant metric are kept (conservative policy):
/// a missing metric is never grounds for exclusion.
fn within_thresholds(member: &Member, running_req_threshold: Option<f64>, waiting_queue_threshold: Option<f64>) -> bool {
    if let (Some(threshold), Some(value)) = (running_req_threshold, member.metrics.running_req) {
        if value > threshold {
            return false;
        }
    }
    if let (Some(threshold), Some(value)) = (waiting_queue_threshold, member.metrics.waiting_queue) {
        if value > threshold {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngineType, Pool};

    fn member(ip: &str, port: u16, score: f64) -> Member {
        let mut m = Member::new(ip.parse().unwrap(), port);
        m.score = score;
        m
    }

    #[tokio::test]
    async fn unknown_pool_returns_none_sentinel() {
        let registry = PoolRegistry::new();
        let result = select_member(&registry, "missing", "Common", &[]).await;
        assert_eq!(result, NONE_SENTINEL);
    }

    #[tokio::test]
    async fn pool_fallback_short_circuits() {
        let registry = PoolRegistry::new();
        let mut pool = Pool::new(PoolKey::new("p", "Common"), EngineType::Vllm, vec![member("10.0.0.1", 8000, 1.0)]);
        pool.pool_fallback = true;
        registry.upsert(pool);
        let result = select_member(&registry, "p", "Common", &["10.0.0.1:8000".to_string()]).await;
        assert_eq!(result, FALLBACK_SENTINEL);
    }

    #[tokio::test]
    async fn intersection_excludes_non_candidate_members() {
        let registry = PoolRegistry::new();
        let pool = Pool::new(
            PoolKey::new("p", "Common"),
            EngineType::Vllm,
            vec![member("10.0.0.1", 8000, 1.0), member("10.0.0.2", 8000, 1.0)],
        );
        registry.upsert(pool);
        let result = select_member(&registry, "p", "Common", &["10.0.0.2:8000".to_string()]).await;
        assert_eq!(result, "10.0.0.2:8000");
    }

    #[tokio::test]
    async fn empty_intersection_returns_none_sentinel() {
        let registry = PoolRegistry::new();
        registry.upsert(Pool::new(
            PoolKey::new("p", "Common"),
            EngineType::Vllm,
            vec![member("10.0.0.1", 8000, 1.0)],
        ));
        let result = select_member(&registry, "p", "Common", &["10.9.9.9:1".to_string()]).await;
        assert_eq!(result, NONE_SENTINEL);
    }

    #[tokio::test]
    async fn member_over_waiting_queue_threshold_is_dropped() {
        let registry = PoolRegistry::new();
        let mut m = member("10.0.0.1", 8000, 1.0);
        m.metrics.waiting_queue = Some(50.0);
        let mut pool = Pool::new(PoolKey::new("p", "Common"), EngineType::Vllm, vec![m]);
        pool.member_waiting_queue_threshold = Some(10.0);
        registry.upsert(pool);
        let result = select_member(&registry, "p", "Common", &["10.0.0.1:8000".to_string()]).await;
        assert_eq!(result, NONE_SENTINEL);
    }

    #[tokio::test]
    async fn member_missing_metric_is_kept_despite_threshold() {
        let registry = PoolRegistry::new();
        let m = member("10.0.0.1", 8000, 1.0); // no waiting_queue set
        let mut pool = Pool::new(PoolKey::new("p", "Common"), EngineType::Vllm, vec![m]);
        pool.member_waiting_queue_threshold = Some(10.0);
        registry.upsert(pool);
        let result = select_member(&registry, "p", "Common", &["10.0.0.1:8000".to_string()]).await;
        assert_eq!(result, "10.0.0.1:8000");
    }
}
