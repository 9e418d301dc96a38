//! src/hot_reload.rs
//!
//! C7: polls the configuration file for changes, validates a candidate
//! reload before touching any live state, then diffs it against the running
//! configuration and applies only what changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::time::interval;

use crate::app_state::SharedState;
use crate::errors::ConfigError;
use crate::lb_client::LoadBalancerClient;
use crate::registry::PoolRegistry;
use crate::settings::AppConfig;
use crate::types::{EngineType, PoolKey};

#[derive(Debug, Clone, PartialEq)]
struct ConfigBaseline {
    mtime: SystemTime,
    hash: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn read_baseline(path: &Path) -> std::io::Result<ConfigBaseline> {
    let bytes = std::fs::read(path)?;
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(ConfigBaseline {
        mtime,
        hash: sha256_hex(&bytes),
    })
}

/// Result of one `poll()` call.
pub enum PollOutcome {
    /// First sample, or the file is unchanged since the last sample.
    NoChange,
    /// The file changed but failed to parse/validate; running config kept.
    Rejected(ConfigError),
    /// The file changed and the new configuration validated successfully.
    Applied,
}

pub struct HotReloadController {
    path: PathBuf,
    baseline: tokio::sync::Mutex<Option<ConfigBaseline>>,
}

impl HotReloadController {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            baseline: tokio::sync::Mutex::new(None),
        }
    }

    /// Sample the file, and if both mtime and hash differ from the stored
    /// baseline, validate and apply the new configuration against `state`.
    pub async fn poll(&self, state: &Arc<SharedState>) -> PollOutcome {
        let current = match read_baseline(&self.path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not sample configuration file");
                return PollOutcome::NoChange;
            }
        };

        let mut baseline = self.baseline.lock().await;
        let changed = match baseline.as_ref() {
            None => false, // first sample only establishes the baseline
            Some(prev) => prev.mtime != current.mtime && prev.hash != current.hash,
        };

        if baseline.is_none() {
            *baseline = Some(current);
            return PollOutcome::NoChange;
        }
        if !changed {
            return PollOutcome::NoChange;
        }

        let new_config = match AppConfig::load(&self.path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "rejected configuration reload: validation failed");
                return PollOutcome::Rejected(e);
            }
        };

        *baseline = Some(current);
        drop(baseline);

        apply_reload(state, new_config).await;
        PollOutcome::Applied
    }
}

async fn apply_reload(state: &Arc<SharedState>, new_config: AppConfig) {
    let old_config = state.config.read().await.clone();

    if old_config.global.log_level != new_config.global.log_level {
        tracing::info!(
            from = %old_config.global.log_level,
            to = %new_config.global.log_level,
            "log level changed, reload the tracing filter handle"
        );
    }

    if old_config.loadbalancer != new_config.loadbalancer {
        tracing::info!("load-balancer endpoint or credentials changed, recreating client");
        let mut client = state.lb_client.write().await;
        *client = LoadBalancerClient::new(new_config.loadbalancer.clone());
    }

    if old_config.global.api_host != new_config.global.api_host
        || old_config.global.api_port != new_config.global.api_port
    {
        tracing::warn!("api_host/api_port changed; restart the process for this to take effect");
    }

    reconcile_pool_set(&state.registry, &old_config, &new_config).await;

    *state.config.write().await = new_config;
    tracing::info!("configuration reload applied");
}

/// Removes registry entries whose key is gone from the new pool list (and
/// whose `consecutive_failures == 0`, to avoid racing the failure-driven
/// cleanup in the membership loop), and mutates the engine type of retained
/// pools whose configuration changed it, immediately rather than waiting for
/// the next membership fetch. Added pools are left for the next membership
/// fetch to create.
async fn reconcile_pool_set(registry: &PoolRegistry, old: &AppConfig, new: &AppConfig) {
    let new_keys: Vec<PoolKey> = new
        .pools
        .iter()
        .map(|p| PoolKey::new(p.name.clone(), p.partition.clone()))
        .collect();

    let stale: Vec<PoolKey> = old
        .pools
        .iter()
        .map(|p| PoolKey::new(p.name.clone(), p.partition.clone()))
        .filter(|key| !new_keys.contains(key))
        .collect();

    for key in stale {
        if let Some(handle) = registry.get(&key) {
            let zero_failures = handle.read().await.consecutive_failures == 0;
            if zero_failures {
                registry.remove(&key);
            }
        }
    }

    for pool_cfg in &new.pools {
        let Some(new_engine) = EngineType::parse(&pool_cfg.engine_type) else {
            continue;
        };
        let key = PoolKey::new(pool_cfg.name.clone(), pool_cfg.partition.clone());
        if let Some(handle) = registry.get(&key) {
            let mut pool = handle.write().await;
            if pool.engine_type != new_engine {
                tracing::info!(
                    pool = %key,
                    from = %pool.engine_type,
                    to = %new_engine,
                    "engine_type changed, updating live record"
                );
                pool.engine_type = new_engine;
            }
        }
    }
}

/// Periodically drive `poll` until `shutdown` resolves.
pub async fn run_hot_reload_loop(
    controller: HotReloadController,
    state: Arc<SharedState>,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.poll(&state).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("hot-reload loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PoolConfig;
    use crate::types::Pool;

    fn pool_config(name: &str) -> PoolConfig {
        PoolConfig {
            name: name.to_string(),
            partition: "Common".to_string(),
            engine_type: "vllm".to_string(),
            fallback: Default::default(),
            metrics: Default::default(),
        }
    }

    #[tokio::test]
    async fn reconcile_removes_only_pools_absent_from_new_config_with_no_failures() {
        let registry = PoolRegistry::new();
        registry.upsert(Pool::new(PoolKey::new("alpha", "Common"), EngineType::Vllm, Vec::new()));
        registry.upsert(Pool::new(PoolKey::new("beta", "Common"), EngineType::Vllm, Vec::new()));

        let mut old = AppConfig::default();
        old.pools = vec![pool_config("alpha"), pool_config("beta")];
        let mut new = AppConfig::default();
        new.pools = vec![pool_config("alpha")];

        reconcile_pool_set(&registry, &old, &new).await;

        assert!(registry.get(&PoolKey::new("alpha", "Common")).is_some());
        assert!(registry.get(&PoolKey::new("beta", "Common")).is_none());
    }

    #[tokio::test]
    async fn pool_with_active_failures_is_not_removed_by_reconcile() {
        let registry = PoolRegistry::new();
        let handle = registry.upsert(Pool::new(PoolKey::new("beta", "Common"), EngineType::Vllm, Vec::new()));
        handle.write().await.consecutive_failures = 2;

        let mut old = AppConfig::default();
        old.pools = vec![pool_config("beta")];
        let new = AppConfig::default();

        reconcile_pool_set(&registry, &old, &new).await;

        assert!(registry.get(&PoolKey::new("beta", "Common")).is_some());
    }

    #[tokio::test]
    async fn reconcile_mutates_engine_type_for_retained_pool() {
        let registry = PoolRegistry::new();
        registry.upsert(Pool::new(PoolKey::new("alpha", "Common"), EngineType::Vllm, Vec::new()));

        let mut old = AppConfig::default();
        old.pools = vec![pool_config("alpha")];
        let mut new = AppConfig::default();
        new.pools = vec![PoolConfig {
            engine_type: "sglang".to_string(),
            ..pool_config("alpha")
        }];

        reconcile_pool_set(&registry, &old, &new).await;

        let handle = registry.get(&PoolKey::new("alpha", "Common")).unwrap();
        assert_eq!(handle.read().await.engine_type, EngineType::Sglang);
    }

    #[test]
    fn baseline_hash_is_stable_for_identical_bytes() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }
}
