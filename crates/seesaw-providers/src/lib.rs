//! Backend provider adapters. Each provider implements plan → deploy →
//! destroy behind one trait; the router never touches any of this, it
//! only knows about URLs.

pub mod modal;
pub mod registry;
pub mod runpod;
pub mod skyserve;

use std::time::Duration;

use async_trait::async_trait;

use seesaw_common::{DeployRequest, DeploymentResult, Error, ProviderPlan};

/// Capability contract every backend implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier: "modal", "runpod", "skyserve".
    fn name(&self) -> &'static str;

    /// Render the deployment artifact from the request and the shared vLLM
    /// command. Pure, no I/O. Fails with `Config` when the request is
    /// incompatible with this provider (e.g. unsupported GPU), before any
    /// deploy attempt.
    fn plan(&self, request: &DeployRequest, vllm_cmd: &str) -> Result<ProviderPlan, Error>;

    /// Execute the plan. "This backend didn't come up" failures (network,
    /// quota, timeout) are reported in the result's `error` field, never as
    /// an Err; callers decide whether a failed leg is fatal. Safe to run
    /// concurrently with other providers' deploys; adapters share no
    /// mutable state.
    async fn deploy(&self, plan: &ProviderPlan) -> DeploymentResult;

    /// Bearer token the router must present when proxying to this backend.
    /// Empty when the backend is unauthenticated.
    fn auth_token(&self) -> String {
        String::new()
    }

    /// Cheap status query for operator display.
    async fn status(&self, service_name: &str) -> serde_json::Value;

    /// Best-effort teardown. Errors are returned for aggregation but must
    /// never stop the caller from tearing down the other components.
    async fn destroy(&self, result: &DeploymentResult) -> Result<(), Error>;

    /// Health probe: GET the result's health URL, 2xx within 5s is healthy.
    async fn health_check(&self, result: &DeploymentResult) -> bool {
        let Some(url) = result.health_url.as_deref() else {
            return false;
        };
        let Ok(client) = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        else {
            return false;
        };
        match client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
