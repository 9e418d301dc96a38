//! src/api.rs
//!
//! C9: the HTTP surface over the scheduler core. A thin `axum` dispatcher —
//! every route either reads the registry directly or delegates to C8/C3.
//! Grounded in the same `axum::Router`/extractor idiom the pack's
//! `Wolftown-io-canis` service uses, since the teacher carries no
//! server-side web framework of its own (only `reqwest` as a client).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::app_state::SharedState;
use crate::selection::select_member;
use crate::selector;
use crate::types::{Pool, PoolKey};

pub fn build_router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/scheduler/select", post(select_handler))
        .route("/pools/status", get(all_status_handler))
        .route("/pools/:name/:partition/status", get(one_status_handler))
        .route("/pools/:name/:partition/simulate", post(simulate_handler))
        .route("/pools/:name/:partition/analyze", post(analyze_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    pool_name: String,
    partition: String,
    members: Vec<String>,
}

async fn select_handler(
    State(state): State<Arc<SharedState>>,
    Json(req): Json<SelectRequest>,
) -> Response {
    if req.pool_name.is_empty() || req.partition.is_empty() {
        return (StatusCode::BAD_REQUEST, "pool_name and partition are required").into_response();
    }
    let chosen = select_member(&state.registry, &req.pool_name, &req.partition, &req.members).await;
    (StatusCode::OK, chosen).into_response()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct MemberStatus {
    ip: String,
    port: u16,
    score: f64,
    percent: f64,
    metrics: crate::types::Metrics,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct PoolStatus {
    name: String,
    partition: String,
    engine_type: String,
    member_count: usize,
    members: Vec<MemberStatus>,
}

async fn pool_status(pool: &Pool) -> PoolStatus {
    let total: f64 = pool.members.iter().filter(|m| m.score > 0.0).map(|m| m.score).sum();
    let members = pool
        .members
        .iter()
        .map(|m| {
            let percent = if total > 0.0 {
                let raw = 100.0 * m.score / total;
                (raw * 100.0).round() / 100.0
            } else {
                0.0
            };
            MemberStatus {
                ip: m.ip.to_string(),
                port: m.port,
                score: m.score,
                percent,
                metrics: m.metrics.clone(),
            }
        })
        .collect();
    PoolStatus {
        name: pool.name().to_string(),
        partition: pool.partition().to_string(),
        engine_type: pool.engine_type.to_string(),
        member_count: pool.members.len(),
        members,
    }
}

async fn all_status_handler(State(state): State<Arc<SharedState>>) -> Response {
    let mut pools = Vec::new();
    for (_, handle) in state.registry.handles() {
        let pool = handle.read().await;
        pools.push(pool_status(&pool).await);
    }
    Json(serde_json::json!({ "pools": pools })).into_response()
}

async fn one_status_handler(
    State(state): State<Arc<SharedState>>,
    Path((name, partition)): Path<(String, String)>,
) -> Response {
    let key = PoolKey::new(name, partition);
    match state.registry.get(&key) {
        Some(handle) => Json(pool_status(&*handle.read().await).await).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct IterationsQuery {
    iterations: Option<u32>,
}

fn default_iterations(q: &IterationsQuery) -> u32 {
    q.iterations.unwrap_or(1000).max(1)
}

async fn simulate_handler(
    State(state): State<Arc<SharedState>>,
    Path((name, partition)): Path<(String, String)>,
    Query(q): Query<IterationsQuery>,
) -> Response {
    let key = PoolKey::new(name, partition);
    match state.registry.get(&key) {
        Some(handle) => {
            let pool = handle.read().await;
            let freqs = selector::simulate(&pool.members, default_iterations(&q));
            Json(freqs).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn analyze_handler(
    State(state): State<Arc<SharedState>>,
    Path((name, partition)): Path<(String, String)>,
    Query(q): Query<IterationsQuery>,
) -> Response {
    let key = PoolKey::new(name, partition);
    match state.registry.get(&key) {
        Some(handle) => {
            let pool = handle.read().await;
            let report = selector::analyze(&pool.members, default_iterations(&q));
            Json(serde_json::json!({
                "iterations": report.iterations,
                "max_deviation": report.max_deviation,
                "quality": report.quality,
                "members": report.members.iter().map(|m| serde_json::json!({
                    "address": m.address,
                    "theoretical": m.theoretical,
                    "observed": m.observed,
                    "deviation": m.deviation,
                })).collect::<Vec<_>>(),
            }))
            .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health_handler(State(state): State<Arc<SharedState>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "pools": state.registry.len(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngineType, Member};

    #[tokio::test]
    async fn pool_status_round_trips_through_json() {
        let mut m = Member::new("10.0.0.1".parse().unwrap(), 8000);
        m.score = 0.5;
        m.metrics.waiting_queue = Some(3.0);
        let pool = Pool::new(PoolKey::new("p", "Common"), EngineType::Vllm, vec![m]);

        let status = pool_status(&pool).await;
        let json = serde_json::to_string(&status).unwrap();
        let parsed: PoolStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, parsed);
    }

    #[tokio::test]
    async fn pool_status_percent_sums_to_one_hundred() {
        let mut a = Member::new("10.0.0.1".parse().unwrap(), 8000);
        a.score = 0.25;
        let mut b = Member::new("10.0.0.2".parse().unwrap(), 8000);
        b.score = 0.75;
        let pool = Pool::new(PoolKey::new("p", "Common"), EngineType::Vllm, vec![a, b]);

        let status = pool_status(&pool).await;
        let total_percent: f64 = status.members.iter().map(|m| m.percent).sum();
        assert!((total_percent - 100.0).abs() < 0.01);
    }
}
