//! src/app_state.rs
//!
//! The mutable state shared by every background task and the HTTP surface:
//! the pool registry, the live configuration, and the load-balancer session.
//! Held behind an `Arc` and cloned into each task; individual fields use
//! their own lock so a config reload never blocks an in-flight scrape.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::lb_client::LoadBalancerClient;
use crate::registry::PoolRegistry;
use crate::settings::AppConfig;

pub struct SharedState {
    pub registry: PoolRegistry,
    pub config: RwLock<AppConfig>,
    pub lb_client: RwLock<LoadBalancerClient>,
    pub http: reqwest::Client,
}

impl SharedState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let lb_client = LoadBalancerClient::new(config.loadbalancer.clone());
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client configuration is static and always valid");
        Arc::new(Self {
            registry: PoolRegistry::new(),
            config: RwLock::new(config),
            lb_client: RwLock::new(lb_client),
            http,
        })
    }

    /// The first configured algorithm mode is the active one.
    pub async fn active_mode(&self) -> crate::settings::ModeConfig {
        self.config
            .read()
            .await
            .modes
            .first()
            .cloned()
            .unwrap_or_default()
    }
}
