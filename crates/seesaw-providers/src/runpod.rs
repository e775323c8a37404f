//! RunPod serverless adapter: drives the RunPod REST API directly, no
//! rendered script involved. The deploy is two calls: create a template
//! (image + env), then create an endpoint bound to it.

use std::collections::HashMap;
use std::time::Duration;

use seesaw_common::{
    catalog, ColdStartMode, DeployRequest, DeploymentResult, Error, ProviderPlan,
};

use crate::Provider;

const API_BASE: &str = "https://rest.runpod.io/v1";
const WORKER_IMAGE: &str = "runpod/worker-v1-vllm:v2.11.3";

pub struct RunPodProvider {
    api_base: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl RunPodProvider {
    pub fn from_env() -> Self {
        Self::new(API_BASE, std::env::var("RUNPOD_API_KEY").ok())
    }

    pub fn new(api_base: &str, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }

    fn key(&self) -> Result<&str, String> {
        self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            "RUNPOD_API_KEY environment variable is not set".to_string()
        })
    }

    async fn delete(&self, path: &str, key: &str) -> Result<(), reqwest::Error> {
        self.http
            .delete(format!("{}{}", self.api_base, path))
            .bearer_auth(key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for RunPodProvider {
    fn name(&self) -> &'static str {
        "runpod"
    }

    fn plan(&self, request: &DeployRequest, _vllm_cmd: &str) -> Result<ProviderPlan, Error> {
        let endpoint_name = format!("{}-serverless", request.service_name);
        let gpu_type_id = catalog::provider_gpu_id(&request.gpu, "runpod")?;
        let serverless = &request.scaling.serverless;

        // The worker image runs vLLM itself; configuration travels as env vars.
        let mut env = HashMap::new();
        env.insert("MODEL_NAME".to_string(), request.model_name.clone());
        env.insert("MAX_MODEL_LEN".to_string(), request.max_model_len.to_string());
        env.insert("TENSOR_PARALLEL_SIZE".to_string(), request.tp_size.to_string());
        env.insert("GPU_MEMORY_UTILIZATION".to_string(), "0.95".to_string());
        env.insert("MAX_CONCURRENCY".to_string(), serverless.concurrency.to_string());
        env.insert("DISABLE_LOG_REQUESTS".to_string(), "true".to_string());
        if request.cold_start_mode == ColdStartMode::FastBoot {
            env.insert("ENFORCE_EAGER".to_string(), "true".to_string());
        }
        if let Ok(hf_token) = std::env::var("HF_TOKEN") {
            if !hf_token.is_empty() {
                env.insert("HF_TOKEN".to_string(), hf_token);
            }
        }

        let fast_boot = request.cold_start_mode == ColdStartMode::FastBoot;
        let mut metadata = HashMap::new();
        metadata.insert("endpoint_name".to_string(), endpoint_name);
        metadata.insert("image_name".to_string(), WORKER_IMAGE.to_string());
        metadata.insert("gpu_type_id".to_string(), gpu_type_id.to_string());
        metadata.insert("gpu_count".to_string(), request.gpu_count.to_string());
        metadata.insert("workers_min".to_string(), serverless.workers_min.to_string());
        metadata.insert("workers_max".to_string(), serverless.workers_max.to_string());
        metadata.insert("idle_timeout".to_string(), serverless.scaledown_window.to_string());
        metadata.insert(
            "execution_timeout_ms".to_string(),
            (u64::from(serverless.timeout) * 1000).to_string(),
        );
        metadata.insert("flashboot".to_string(), fast_boot.to_string());

        Ok(ProviderPlan {
            provider: self.name().to_string(),
            rendered_script: String::new(),
            env,
            metadata,
        })
    }

    async fn deploy(&self, plan: &ProviderPlan) -> DeploymentResult {
        let Some(endpoint_name) = plan.metadata.get("endpoint_name").cloned() else {
            return DeploymentResult::failed(self.name(), "plan missing endpoint_name metadata");
        };
        let key = match self.key() {
            Ok(k) => k.to_string(),
            Err(e) => return DeploymentResult::failed(self.name(), e),
        };

        tracing::info!(endpoint=%endpoint_name, "creating runpod template");
        let template_payload = serde_json::json!({
            "name": endpoint_name,
            "imageName": plan.metadata.get("image_name"),
            "containerDiskInGb": 50,
            "env": plan.env,
            "isServerless": true,
        });

        let template_id = match self
            .http
            .post(format!("{}/templates", self.api_base))
            .bearer_auth(&key)
            .json(&template_payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(v) => match v.get("id").and_then(|id| id.as_str()) {
                    Some(id) => id.to_string(),
                    None => {
                        return DeploymentResult::failed(
                            self.name(),
                            "template response missing id",
                        )
                    }
                },
                Err(e) => {
                    return DeploymentResult::failed(
                        self.name(),
                        format!("template creation failed: {e}"),
                    )
                }
            },
            Err(e) => {
                return DeploymentResult::failed(
                    self.name(),
                    format!("template creation failed: {e}"),
                )
            }
        };

        tracing::info!(endpoint=%endpoint_name, template=%template_id, "creating runpod endpoint");
        let meta_int = |k: &str| {
            plan.metadata.get(k).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0)
        };
        let endpoint_payload = serde_json::json!({
            "name": endpoint_name,
            "templateId": template_id,
            "gpuTypeIds": [plan.metadata.get("gpu_type_id")],
            "gpuCount": meta_int("gpu_count"),
            "workersMin": meta_int("workers_min"),
            "workersMax": meta_int("workers_max"),
            "idleTimeout": meta_int("idle_timeout"),
            "executionTimeoutMs": meta_int("execution_timeout_ms"),
            "flashboot": plan.metadata.get("flashboot").map(|v| v == "true").unwrap_or(false),
            "scalerType": "QUEUE_DELAY",
            "scalerValue": 4,
        });

        let endpoint_id = match self
            .http
            .post(format!("{}/endpoints", self.api_base))
            .bearer_auth(&key)
            .json(&endpoint_payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(v) => v.get("id").and_then(|id| id.as_str()).map(|s| s.to_string()),
                Err(_) => None,
            },
            Err(e) => {
                // Clean up the template we just created.
                tracing::warn!(template=%template_id, "endpoint creation failed, removing template");
                let _ = self.delete(&format!("/templates/{template_id}"), &key).await;
                let mut result = DeploymentResult::failed(
                    self.name(),
                    format!("endpoint creation failed: {e}"),
                );
                result.metadata.insert("endpoint_name".to_string(), endpoint_name);
                result.metadata.insert("template_id".to_string(), template_id);
                return result;
            }
        };

        let Some(endpoint_id) = endpoint_id else {
            let _ = self.delete(&format!("/templates/{template_id}"), &key).await;
            return DeploymentResult::failed(self.name(), "endpoint response missing id");
        };

        let endpoint_url = format!("https://api.runpod.ai/v2/{endpoint_id}/openai/v1");
        let health_url = format!("https://api.runpod.ai/v2/{endpoint_id}/health");
        tracing::info!(endpoint=%endpoint_name, url=%endpoint_url, "runpod endpoint deployed");

        let mut metadata = HashMap::new();
        metadata.insert("endpoint_id".to_string(), endpoint_id);
        metadata.insert("template_id".to_string(), template_id);
        metadata.insert("endpoint_name".to_string(), endpoint_name);

        DeploymentResult {
            provider: self.name().to_string(),
            endpoint_url: Some(endpoint_url),
            health_url: Some(health_url),
            error: None,
            metadata,
        }
    }

    fn auth_token(&self) -> String {
        self.api_key.clone().unwrap_or_default()
    }

    async fn status(&self, service_name: &str) -> serde_json::Value {
        let endpoint_name = format!("{service_name}-serverless");
        let key = match self.key() {
            Ok(k) => k,
            Err(e) => {
                return serde_json::json!({
                    "provider": self.name(), "status": "unknown", "error": e,
                })
            }
        };

        let endpoints = match self
            .http
            .get(format!("{}/endpoints", self.api_base))
            .bearer_auth(key)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => resp.json::<Vec<serde_json::Value>>().await.unwrap_or_default(),
            Err(e) => {
                return serde_json::json!({
                    "provider": self.name(), "status": "unknown", "error": e.to_string(),
                })
            }
        };

        // RunPod may append " -fb" to flashboot endpoint names.
        let found = endpoints.iter().find(|ep| {
            ep.get("name").and_then(|n| n.as_str()).is_some_and(|n| {
                n == endpoint_name || n == format!("{endpoint_name} -fb")
            })
        });

        match found {
            Some(ep) => serde_json::json!({
                "provider": self.name(),
                "endpoint_name": endpoint_name,
                "endpoint_id": ep.get("id"),
                "status": "running",
            }),
            None => serde_json::json!({
                "provider": self.name(),
                "endpoint_name": endpoint_name,
                "status": "not found",
            }),
        }
    }

    async fn destroy(&self, result: &DeploymentResult) -> Result<(), Error> {
        let key = match self.key() {
            Ok(k) => k.to_string(),
            Err(e) => return Err(Error::Teardown(vec![("runpod".to_string(), e)])),
        };

        let mut errors = Vec::new();

        if let Some(endpoint_id) = result.metadata.get("endpoint_id") {
            tracing::info!(endpoint=%endpoint_id, "deleting runpod endpoint");
            if let Err(e) = self.delete(&format!("/endpoints/{endpoint_id}"), &key).await {
                errors.push(("runpod endpoint".to_string(), e.to_string()));
            }
        }
        if let Some(template_id) = result.metadata.get("template_id") {
            tracing::info!(template=%template_id, "deleting runpod template");
            if let Err(e) = self.delete(&format!("/templates/{template_id}"), &key).await {
                errors.push(("runpod template".to_string(), e.to_string()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RunPodProvider {
        RunPodProvider::new(API_BASE, Some("test-key".to_string()))
    }

    #[test]
    fn test_plan_builds_worker_env() {
        let req = DeployRequest::new("mistralai/Mistral-7B-Instruct-v0.3", "A100_80GB");
        let plan = provider().plan(&req, "unused").unwrap();
        assert_eq!(plan.env.get("MODEL_NAME").unwrap(), "mistralai/Mistral-7B-Instruct-v0.3");
        assert_eq!(plan.env.get("ENFORCE_EAGER").unwrap(), "true");
        assert_eq!(plan.metadata.get("gpu_type_id").unwrap(), "NVIDIA A100-SXM4-80GB");
        assert_eq!(plan.metadata.get("flashboot").unwrap(), "true");
        assert!(plan.rendered_script.is_empty());
    }

    #[test]
    fn test_plan_rejects_unsupported_gpu() {
        let req = DeployRequest::new("m", "T4"); // T4 not offered by RunPod
        let err = provider().plan(&req, "unused").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_normal_mode_skips_eager_and_flashboot() {
        let mut req = DeployRequest::new("m", "L4");
        req.cold_start_mode = ColdStartMode::Normal;
        let plan = provider().plan(&req, "unused").unwrap();
        assert!(!plan.env.contains_key("ENFORCE_EAGER"));
        assert_eq!(plan.metadata.get("flashboot").unwrap(), "false");
    }
}
