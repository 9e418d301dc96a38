//! src/metrics_collector.rs
//!
//! C6: scrapes every pool member's Prometheus endpoint on a fixed cadence,
//! all pools and all members within a pool running in parallel, then
//! triggers the score calculator (C2) for each pool as soon as its own
//! scrape set completes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::app_state::SharedState;
use crate::registry::PoolRegistry;
use crate::score_calculator::calculate_pool_scores;
use crate::settings::{MetricsConfig, ModeConfig, PoolConfig};
use crate::types::{EngineType, Metrics, PoolKey};

fn extract_metric_values(body: &str, metric_name: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || !line.starts_with(metric_name) {
            continue;
        }
        let rest = &line[metric_name.len()..];
        match rest.chars().next() {
            Some('{') | Some(' ') | None => {}
            _ => continue, // a longer metric name merely sharing this prefix
        }
        if let Some(value_str) = rest.rsplit(' ').find(|s| !s.is_empty()) {
            if let Ok(v) = value_str.parse::<f64>() {
                values.push(v);
            }
        }
    }
    values
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn metrics_url(ip: IpAddr, member_port: u16, cfg: &MetricsConfig) -> String {
    let port = cfg.port.unwrap_or(member_port);
    format!("{}://{}:{}{}", cfg.schema, ip, port, cfg.path)
}

/// Scrape a single member. Any failure (non-200, transport error, empty
/// parse) is swallowed into `Metrics::default()` — the caller treats that the
/// same as "leave the previous score untouched".
async fn scrape_member(
    http: &reqwest::Client,
    ip: IpAddr,
    port: u16,
    cfg: &MetricsConfig,
    engine: EngineType,
) -> Metrics {
    let url = metrics_url(ip, port, cfg);
    let mut request = http.get(&url).timeout(Duration::from_secs(cfg.timeout_s));

    if let Some(key) = &cfg.api_key {
        request = request.bearer_auth(key);
    } else if let Some(user) = &cfg.user {
        request = request.basic_auth(user, cfg.password.clone());
    }

    let body = match request.send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "failed reading metrics response body");
                return Metrics::default();
            }
        },
        Ok(resp) => {
            tracing::debug!(url = %url, status = %resp.status(), "metrics scrape returned non-200");
            return Metrics::default();
        }
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "metrics scrape failed");
            return Metrics::default();
        }
    };

    let names = engine.metric_names();
    Metrics {
        waiting_queue: mean(&extract_metric_values(&body, names.waiting_queue)),
        cache_usage: mean(&extract_metric_values(&body, names.cache_usage)),
        running_req: mean(&extract_metric_values(&body, names.running_req)),
    }
}

/// One sweep over every pool currently in the registry. Every pool's scrape
/// runs on its own `tokio::spawn`ed task, and within each pool every member
/// scrape is itself `tokio::spawn`ed, so the whole sweep fans out to real
/// concurrent tasks rather than a sequential loop.
pub async fn run_scrape_cycle(
    http: &reqwest::Client,
    registry: &PoolRegistry,
    metrics_configs: &HashMap<PoolKey, MetricsConfig>,
    active_mode: &ModeConfig,
) {
    let handles = registry.handles();
    let mut pool_tasks = Vec::with_capacity(handles.len());

    for (key, handle) in handles {
        let Some(cfg) = metrics_configs.get(&key).cloned() else {
            continue;
        };
        let http = http.clone();
        let active_mode = active_mode.clone();
        pool_tasks.push(tokio::spawn(scrape_pool(key, handle, http, cfg, active_mode)));
    }

    for task in pool_tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "pool scrape task panicked");
        }
    }
}

async fn scrape_pool(
    key: PoolKey,
    handle: crate::registry::PoolHandle,
    http: reqwest::Client,
    cfg: MetricsConfig,
    active_mode: ModeConfig,
) {
    let (engine, addresses): (EngineType, Vec<(IpAddr, u16)>) = {
        let pool = handle.read().await;
        (pool.engine_type, pool.members.iter().map(|m| m.key()).collect())
    };

    let member_tasks: Vec<_> = addresses
        .iter()
        .map(|&(ip, port)| {
            let http = http.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move { scrape_member(&http, ip, port, &cfg, engine).await })
        })
        .collect();

    let mut results = Vec::with_capacity(member_tasks.len());
    for task in member_tasks {
        results.push(task.await.unwrap_or_default());
    }

    let mut pool = handle.write().await;
    for (member, metrics) in pool.members.iter_mut().zip(results) {
        if !metrics.is_empty() {
            member.metrics = metrics;
        }
    }
    if let Err(e) = calculate_pool_scores(&mut pool.members, &active_mode) {
        tracing::warn!(pool = %key, error = %e, "score calculation failed for this sweep");
    }
}

pub fn build_metrics_config_map(pool_configs: &[PoolConfig]) -> HashMap<PoolKey, MetricsConfig> {
    pool_configs
        .iter()
        .map(|p| (PoolKey::new(p.name.clone(), p.partition.clone()), p.metrics.clone()))
        .collect()
}

/// As `run_membership_loop`, but for `metrics_fetch_interval_ms` and the
/// active algorithm mode — both re-read from `state.config` each cycle so a
/// hot reload of either takes effect without external task restart. Pool
/// `metrics` settings are similarly re-derived each cycle, picking up
/// per-pool scrape-config changes on the very next scrape as specified.
pub async fn run_metrics_loop(state: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut current_ms = state.config.read().await.scheduler.metrics_fetch_interval_ms;
    let mut ticker = interval(Duration::from_millis(current_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (metrics_configs, active_mode) = {
                    let cfg = state.config.read().await;
                    (build_metrics_config_map(&cfg.pools), cfg.modes.first().cloned().unwrap_or_default())
                };
                run_scrape_cycle(&state.http, &state.registry, &metrics_configs, &active_mode).await;

                let new_ms = state.config.read().await.scheduler.metrics_fetch_interval_ms;
                if new_ms != current_ms {
                    current_ms = new_ms;
                    ticker = interval(Duration::from_millis(current_ms.max(1)));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("metrics loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VLLM_BODY: &str = "# HELP vllm:num_requests_waiting docs\nvllm:num_requests_waiting{model=\"a\"} 3.0\nvllm:num_requests_waiting{model=\"b\"} 5.0\nvllm:gpu_cache_usage_perc 0.42\n";

    #[test]
    fn extracts_and_averages_multi_label_series() {
        let values = extract_metric_values(VLLM_BODY, "vllm:num_requests_waiting");
        assert_eq!(values, vec![3.0, 5.0]);
        assert_eq!(mean(&values), Some(4.0));
    }

    #[test]
    fn does_not_match_longer_metric_name_sharing_a_prefix() {
        let body = "vllm:num_requests_waiting_total 7.0\n";
        assert!(extract_metric_values(body, "vllm:num_requests_waiting").is_empty());
    }

    #[test]
    fn single_value_series_parses() {
        let values = extract_metric_values(VLLM_BODY, "vllm:gpu_cache_usage_perc");
        assert_eq!(values, vec![0.42]);
    }

    #[test]
    fn missing_metric_yields_none() {
        assert_eq!(mean(&extract_metric_values(VLLM_BODY, "sglang:token_usage")), None);
    }

    #[test]
    fn metrics_url_prefers_configured_port_over_member_port() {
        let cfg = MetricsConfig {
            port: Some(9000),
            ..Default::default()
        };
        let url = metrics_url("10.0.0.1".parse().unwrap(), 8000, &cfg);
        assert_eq!(url, "http://10.0.0.1:9000/metrics");
    }
}
