//! src/lb_client.rs
//!
//! C5 (session half): an iControl-REST-compatible client for the upstream
//! load-balancer. Maintains a single cached auth token behind a mutex so at
//! most one login is ever in flight, and classifies every failure into the
//! serious/transient split the membership-fetch loop needs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::LoadBalancerError;
use crate::settings::LoadBalancerConfig;
use crate::types::Member;

const TOKEN_EXTEND_CEILING: Duration = Duration::from_secs(10 * 60 * 60);

#[derive(Debug, Clone)]
struct TokenState {
    token: String,
    name: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: String,
    name: String,
    #[serde(default)]
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    items: Vec<MemberItem>,
}

#[derive(Debug, Deserialize)]
struct MemberItem {
    address: String,
    name: String,
}

/// A session against one load-balancer endpoint. Cheap to clone (the inner
/// state is reference-counted); safe to share across the membership loop and
/// hot-reload controller.
#[derive(Clone)]
pub struct LoadBalancerClient {
    http: reqwest::Client,
    config: LoadBalancerConfig,
    token: Arc<Mutex<Option<TokenState>>>,
}

impl LoadBalancerClient {
    pub fn new(config: LoadBalancerConfig) -> Self {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self {
            http,
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}:{}", self.config.scheme, self.config.host, self.config.port)
    }

    async fn login(&self) -> Result<TokenState, LoadBalancerError> {
        let url = format!("{}/mgmt/shared/authn/login", self.base_url());
        let body = serde_json::json!({
            "username": self.config.username,
            "password": self.config.password,
            "loginProviderName": "tmos",
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_http_status(status, "login"));
        }

        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| LoadBalancerError::Auth(e.to_string()))?;

        let lifetime = if parsed.token.timeout > 0 {
            Duration::from_secs(parsed.token.timeout)
        } else {
            TOKEN_EXTEND_CEILING
        };

        let state = TokenState {
            token: parsed.token.token,
            name: parsed.token.name,
            expires_at: Instant::now() + lifetime.min(TOKEN_EXTEND_CEILING),
        };

        self.extend(&state.name).await;
        Ok(state)
    }

    /// Best-effort lifetime extension; failures here don't invalidate the
    /// freshly obtained token.
    async fn extend(&self, token_name: &str) {
        let url = format!("{}/mgmt/shared/authz/tokens/{}", self.base_url(), token_name);
        let body = serde_json::json!({ "timeout": TOKEN_EXTEND_CEILING.as_secs() });
        if let Err(e) = self.http.patch(&url).json(&body).send().await {
            tracing::warn!(error = %e, "failed to extend load-balancer token lifetime");
        }
    }

    async fn ensure_token(&self) -> Result<String, LoadBalancerError> {
        let mut guard = self.token.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.expires_at > Instant::now() {
                return Ok(state.token.clone());
            }
        }
        let state = self.login().await?;
        let token = state.token.clone();
        *guard = Some(state);
        Ok(token)
    }

    async fn drop_token(&self) {
        let mut guard = self.token.lock().await;
        *guard = None;
    }

    /// Fetch the current membership list for `pool_name`/`partition`. Retries
    /// once, after re-authenticating, on a `401`/`403`.
    pub async fn get_pool_members(
        &self,
        pool_name: &str,
        partition: &str,
    ) -> Result<Vec<(std::net::IpAddr, u16)>, LoadBalancerError> {
        let token = self.ensure_token().await?;
        match self.fetch_members(pool_name, partition, &token).await {
            Err(LoadBalancerError::Auth(_)) => {
                self.drop_token().await;
                let token = self.ensure_token().await?;
                self.fetch_members(pool_name, partition, &token).await
            }
            other => other,
        }
    }

    async fn fetch_members(
        &self,
        pool_name: &str,
        partition: &str,
        token: &str,
    ) -> Result<Vec<(std::net::IpAddr, u16)>, LoadBalancerError> {
        let url = format!(
            "{}/mgmt/tm/ltm/pool/~{}~{}/members",
            self.base_url(),
            partition,
            pool_name
        );

        let response = self
            .http
            .get(&url)
            .header("X-F5-Auth-Token", token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LoadBalancerError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(classify_http_status(status, "get pool members"));
        }

        let parsed: MembersResponse = response
            .json()
            .await
            .map_err(|e| LoadBalancerError::Api(e.to_string()))?;

        let mut members = Vec::with_capacity(parsed.items.len());
        for item in parsed.items {
            match Member::parse_address(&item.name) {
                Some(addr) => members.push(addr),
                None => tracing::warn!(address = %item.address, name = %item.name, "skipping unparsable member"),
            }
        }
        Ok(members)
    }
}

fn classify_transport_error(e: reqwest::Error) -> LoadBalancerError {
    if e.is_timeout() {
        LoadBalancerError::Timeout
    } else {
        LoadBalancerError::Network(e.to_string())
    }
}

fn classify_http_status(status: StatusCode, context: &str) -> LoadBalancerError {
    if status == StatusCode::NOT_FOUND {
        LoadBalancerError::NotFound(format!("{context}: 404"))
    } else if status.is_server_error() {
        LoadBalancerError::ServerError {
            status: status.as_u16(),
            message: context.to_string(),
        }
    } else {
        LoadBalancerError::Api(format!("{context}: unexpected status {status}"))
    }
}
