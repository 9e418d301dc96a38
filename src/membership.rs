//! src/membership.rs
//!
//! C5 (loop half): periodically walks every configured pool, fetches its
//! membership from the load-balancer session, reconciles it into the
//! registry, and tracks `consecutive_failures` through to removal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::app_state::SharedState;
use crate::errors::LoadBalancerError;
use crate::lb_client::LoadBalancerClient;
use crate::registry::PoolRegistry;
use crate::settings::PoolConfig;
use crate::types::{EngineType, Pool, PoolKey};

/// Run one fetch-reconcile pass over every pool in `pool_configs`. Exposed
/// separately from the loop driver so the hot-reload controller and tests
/// can trigger a single pass on demand.
pub async fn run_fetch_cycle(
    client: &LoadBalancerClient,
    registry: &PoolRegistry,
    pool_configs: &[PoolConfig],
    failure_threshold: u32,
) {
    for pool_cfg in pool_configs {
        fetch_one_pool(client, registry, pool_cfg, failure_threshold).await;
    }
}

async fn fetch_one_pool(
    client: &LoadBalancerClient,
    registry: &PoolRegistry,
    pool_cfg: &PoolConfig,
    failure_threshold: u32,
) {
    let key = PoolKey::new(&pool_cfg.name, &pool_cfg.partition);

    match client.get_pool_members(&pool_cfg.name, &pool_cfg.partition).await {
        Ok(members) => {
            let engine_type = EngineType::parse(&pool_cfg.engine_type).unwrap_or(EngineType::Vllm);
            let handle = match registry.get(&key) {
                Some(handle) => handle,
                None => registry.upsert(Pool::new(key.clone(), engine_type, Vec::new())),
            };
            let mut pool = handle.write().await;
            pool.engine_type = engine_type;
            pool.pool_fallback = pool_cfg.fallback.pool_fallback;
            pool.member_running_req_threshold = pool_cfg.fallback.member_running_req_threshold;
            pool.member_waiting_queue_threshold = pool_cfg.fallback.member_waiting_queue_threshold;
            let stats = pool.reconcile_members(members);
            tracing::info!(
                pool = %key,
                preserved = stats.preserved,
                added = stats.added,
                removed = stats.removed,
                total = stats.total,
                "membership reconciled"
            );
        }
        Err(err) => handle_failure(registry, &key, &err, failure_threshold).await,
    }
}

async fn handle_failure(
    registry: &PoolRegistry,
    key: &PoolKey,
    err: &LoadBalancerError,
    failure_threshold: u32,
) {
    tracing::warn!(pool = %key, error = %err, label = err.label(), "membership fetch failed");
    if !err.is_serious() {
        return;
    }

    let Some(handle) = registry.get(key) else {
        return;
    };
    let removed = {
        let mut pool = handle.write().await;
        pool.consecutive_failures += 1;
        pool.consecutive_failures >= failure_threshold
    };
    if removed {
        tracing::error!(pool = %key, "consecutive failure threshold reached, removing pool");
        registry.remove(key);
    }
}

/// Drive `run_fetch_cycle` on a cadence read fresh from `state.config` on
/// every iteration, so a hot-reloaded `pool_fetch_interval_s` takes effect
/// on the loop's own next tick rather than needing external task restart.
pub async fn run_membership_loop(state: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut current_secs = state.config.read().await.scheduler.pool_fetch_interval_s;
    let mut ticker = interval(Duration::from_secs(current_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (pool_configs, threshold) = {
                    let cfg = state.config.read().await;
                    (cfg.pools.clone(), cfg.global.consecutive_failure_threshold)
                };
                let client = state.lb_client.read().await.clone();
                run_fetch_cycle(&client, &state.registry, &pool_configs, threshold).await;

                let new_secs = state.config.read().await.scheduler.pool_fetch_interval_s;
                if new_secs != current_secs {
                    current_secs = new_secs;
                    ticker = interval(Duration::from_secs(current_secs.max(1)));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("membership loop shutting down");
                    break;
                }
            }
        }
    }
}
