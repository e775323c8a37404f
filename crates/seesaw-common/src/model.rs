use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog;

/// How aggressively the backends trade cold-start latency for throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartMode {
    /// Enforce eager execution and memory snapshots for the fastest boot.
    FastBoot,
    /// Let the engine compile CUDA graphs; slower to start, faster to serve.
    Normal,
}

/// Spot-side autoscaling knobs, passed through to the SkyServe service spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotScaling {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_qps: u32,
    pub upscale_delay: u32,
    pub downscale_delay: u32,
}

impl Default for SpotScaling {
    fn default() -> Self {
        Self {
            min_replicas: 0,
            max_replicas: 5,
            target_qps: 10,
            upscale_delay: 5,
            downscale_delay: 300,
        }
    }
}

/// Serverless-side scaling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerlessScaling {
    pub concurrency: u32,
    pub scaledown_window: u32,
    /// Per-request execution timeout in seconds.
    pub timeout: u32,
    pub workers_min: u32,
    pub workers_max: u32,
}

impl Default for ServerlessScaling {
    fn default() -> Self {
        Self {
            concurrency: 32,
            scaledown_window: 60,
            timeout: 600,
            workers_min: 0,
            workers_max: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub spot: SpotScaling,
    pub serverless: ServerlessScaling,
}

impl ScalingPolicy {
    /// Disable scale-to-zero on both backends: keep at least one spot
    /// replica and one warm serverless worker around.
    pub fn without_scale_to_zero(mut self) -> Self {
        self.spot.min_replicas = self.spot.min_replicas.max(1);
        self.serverless.workers_min = self.serverless.workers_min.max(1);
        self.serverless.scaledown_window = 300;
        self
    }
}

/// What the user asks for. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub model_name: String,
    /// Canonical GPU short name (aliases resolved at construction).
    pub gpu: String,
    pub gpu_count: u32,
    pub tp_size: u32,
    pub max_model_len: u32,
    /// Serverless provider name: "modal", "runpod".
    pub serverless_provider: String,
    /// Cloud for the spot leg, e.g. "aws", "gcp".
    pub spot_cloud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub cold_start_mode: ColdStartMode,
    pub scaling: ScalingPolicy,
    /// Unique key for the deployment. Auto-generated when not supplied.
    pub service_name: String,
    /// Skip spot + router, deploy serverless alone.
    pub serverless_only: bool,
    /// vLLM version pinned to match the serverless provider's worker image.
    pub vllm_version: String,
}

impl DeployRequest {
    /// Normalize the GPU name through the catalog aliases and fill in a
    /// generated service name when none was given. Unknown GPUs are left
    /// as-is here; the planner rejects them with a proper error.
    pub fn new(model_name: impl Into<String>, gpu: &str) -> Self {
        let gpu = catalog::normalize_gpu_name(gpu).unwrap_or_else(|_| gpu.to_string());
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            model_name: model_name.into(),
            gpu,
            gpu_count: 1,
            tp_size: 1,
            max_model_len: 4096,
            serverless_provider: "modal".to_string(),
            spot_cloud: "aws".to_string(),
            region: None,
            cold_start_mode: ColdStartMode::FastBoot,
            scaling: ScalingPolicy::default(),
            service_name: format!("seesaw-{}", &short_id[..8]),
            serverless_only: false,
            vllm_version: "0.15.1".to_string(),
        }
    }
}

/// Rendered deployment artifact, ready to execute. Consumed exactly once
/// by the owning provider's deploy step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPlan {
    pub provider: String,
    /// File contents (Python script, service YAML); empty for pure-REST providers.
    pub rendered_script: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Outcome of a single backend deployment. `endpoint_url` and `error` are
/// mutually exclusive; a new result replaces the old one on redeploy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeploymentResult {
    pub fn failed(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none() && self.endpoint_url.is_some()
    }
}

/// Lifecycle status of a persisted deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Active,
    Degraded,
    Destroyed,
    Failed,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Active => "active",
            DeployStatus::Degraded => "degraded",
            DeployStatus::Destroyed => "destroyed",
            DeployStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(DeployStatus::Active),
            "degraded" => Some(DeployStatus::Degraded),
            "destroyed" => Some(DeployStatus::Destroyed),
            "failed" => Some(DeployStatus::Failed),
            _ => None,
        }
    }
}

/// Combined result returned to the user. The spot field is filled in
/// asynchronously by the background completion watcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless: Option<DeploymentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<DeploymentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<DeploymentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_url: Option<String>,
}

impl HybridDeployment {
    /// Derive the deployment status from component outcomes: both backends
    /// failed is a hard failure, exactly one failing is degraded.
    pub fn status(&self) -> DeployStatus {
        let serverless_ok = self.serverless.as_ref().is_some_and(|r| r.ok());
        let spot_ok = self.spot.as_ref().is_some_and(|r| r.ok());
        match (serverless_ok, spot_ok) {
            (true, true) => DeployStatus::Active,
            (false, false) => DeployStatus::Failed,
            _ => DeployStatus::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_autogenerated() {
        let req = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        assert!(req.service_name.starts_with("seesaw-"));
        assert_eq!(req.service_name.len(), "seesaw-".len() + 8);
    }

    #[test]
    fn test_gpu_alias_normalized() {
        let req = DeployRequest::new("m", "A100");
        assert_eq!(req.gpu, "A100_80GB");
    }

    #[test]
    fn test_unknown_gpu_passes_through() {
        // Planner-level validation rejects it later with context.
        let req = DeployRequest::new("m", "TPU_V5");
        assert_eq!(req.gpu, "TPU_V5");
    }

    #[test]
    fn test_status_derivation() {
        let ok = DeploymentResult {
            provider: "modal".to_string(),
            endpoint_url: Some("http://a".to_string()),
            ..Default::default()
        };
        let bad = DeploymentResult::failed("skyserve", "quota");

        let both = HybridDeployment {
            serverless: Some(ok.clone()),
            spot: Some(ok.clone()),
            ..Default::default()
        };
        assert_eq!(both.status(), DeployStatus::Active);

        let degraded = HybridDeployment {
            serverless: Some(ok),
            spot: Some(bad.clone()),
            ..Default::default()
        };
        assert_eq!(degraded.status(), DeployStatus::Degraded);

        let failed = HybridDeployment {
            serverless: Some(bad.clone()),
            spot: Some(bad),
            ..Default::default()
        };
        assert_eq!(failed.status(), DeployStatus::Failed);
    }

    #[test]
    fn test_no_scale_to_zero_floors() {
        let policy = ScalingPolicy::default().without_scale_to_zero();
        assert_eq!(policy.spot.min_replicas, 1);
        assert_eq!(policy.serverless.workers_min, 1);
        assert_eq!(policy.serverless.scaledown_window, 300);
    }
}
