//! Integration test for the HTTP surface (C9): binds the real `axum::Router`
//! built by `api::build_router` to `127.0.0.1:0` and drives it with a plain
//! `reqwest` client, exercising the full request path rather than calling
//! handlers directly.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use inference_scheduler_core::api::build_router;
use inference_scheduler_core::app_state::SharedState;
use inference_scheduler_core::settings::AppConfig;
use inference_scheduler_core::types::{EngineType, Member, Pool, PoolKey};

async fn spawn_app(state: std::sync::Arc<SharedState>) -> SocketAddr {
    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener.into_std().unwrap())
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    addr
}

fn seeded_state() -> std::sync::Arc<SharedState> {
    let mut config = AppConfig::default();
    config.loadbalancer.host = "127.0.0.1".to_string();
    config.pools.push(test_pool_config());
    let state = SharedState::new(config);

    let mut a = Member::new("10.0.0.1".parse().unwrap(), 8000);
    a.score = 0.25;
    let mut b = Member::new("10.0.0.2".parse().unwrap(), 8000);
    b.score = 0.75;
    state
        .registry
        .upsert(Pool::new(PoolKey::new("mypool", "Common"), EngineType::Vllm, vec![a, b]));
    state
}

fn test_pool_config() -> inference_scheduler_core::settings::PoolConfig {
    inference_scheduler_core::settings::PoolConfig {
        name: "mypool".to_string(),
        partition: "Common".to_string(),
        engine_type: "vllm".to_string(),
        fallback: Default::default(),
        metrics: Default::default(),
    }
}

#[tokio::test]
async fn health_endpoint_reports_pool_count() {
    let state = seeded_state();
    let addr = spawn_app(state).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["pools"], 1);
}

#[tokio::test]
async fn pools_status_reports_percent_shares() {
    let state = seeded_state();
    let addr = spawn_app(state).await;

    let resp = reqwest::get(format!("http://{addr}/pools/mypool/Common/status"))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let total_percent: f64 = members.iter().map(|m| m["percent"].as_f64().unwrap()).sum();
    assert!((total_percent - 100.0).abs() < 0.01);
}

#[tokio::test]
async fn select_endpoint_returns_a_candidate_member() {
    let state = seeded_state();
    let addr = spawn_app(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/scheduler/select"))
        .json(&serde_json::json!({
            "pool_name": "mypool",
            "partition": "Common",
            "members": ["10.0.0.1:8000", "10.0.0.2:8000"],
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body = resp.text().await.unwrap();
    assert!(body == "10.0.0.1:8000" || body == "10.0.0.2:8000");
}

#[tokio::test]
async fn unknown_pool_status_is_404() {
    let state = seeded_state();
    let addr = spawn_app(state).await;

    let resp = reqwest::get(format!("http://{addr}/pools/ghost/Common/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
