//! SkyServe spot adapter: deploys vLLM on spot GPUs via the `sky` CLI.
//! Slow path: `sky serve up` returns quickly but the endpoint takes minutes
//! to materialize, so deploy polls `sky serve status --endpoint`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::Command;

use seesaw_common::{template, DeployRequest, DeploymentResult, Error, ProviderPlan};

use crate::Provider;

const SERVICE_TEMPLATE: &str = include_str!("../templates/skyserve.yaml.tpl");
const UP_TIMEOUT: Duration = Duration::from_secs(600);
const ENDPOINT_POLL_ATTEMPTS: u32 = 10;
const ENDPOINT_POLL_DELAY: Duration = Duration::from_secs(15);
const DOWN_ATTEMPTS: u32 = 6;
const DOWN_RETRY_DELAY: Duration = Duration::from_secs(10);

pub struct SkyServeProvider;

#[async_trait::async_trait]
impl Provider for SkyServeProvider {
    fn name(&self) -> &'static str {
        "skyserve"
    }

    fn plan(&self, request: &DeployRequest, vllm_cmd: &str) -> Result<ProviderPlan, Error> {
        let service_name = format!("{}-spot", request.service_name);
        let spot = &request.scaling.spot;

        // Only constrain placement when the user asked for a region.
        let region_block = match &request.region {
            Some(region) => format!(
                "  any_of:\n    - infra: {}/{}",
                request.spot_cloud.to_lowercase(),
                region
            ),
            None => String::new(),
        };

        let mut replacements = HashMap::new();
        replacements.insert("gpu".to_string(), request.gpu.clone());
        replacements.insert("gpu_count".to_string(), request.gpu_count.to_string());
        replacements.insert("port".to_string(), "8001".to_string());
        replacements.insert("vllm_cmd".to_string(), vllm_cmd.to_string());
        replacements.insert("vllm_version".to_string(), request.vllm_version.clone());
        replacements.insert("min_replicas".to_string(), spot.min_replicas.to_string());
        replacements.insert("max_replicas".to_string(), spot.max_replicas.to_string());
        replacements.insert("target_qps".to_string(), spot.target_qps.to_string());
        replacements.insert("upscale_delay".to_string(), spot.upscale_delay.to_string());
        replacements.insert("downscale_delay".to_string(), spot.downscale_delay.to_string());
        replacements.insert("region_block".to_string(), region_block);

        let rendered = template::render(SERVICE_TEMPLATE, &replacements)?;

        let mut metadata = HashMap::new();
        metadata.insert("service_name".to_string(), service_name);

        Ok(ProviderPlan {
            provider: self.name().to_string(),
            rendered_script: rendered,
            env: HashMap::new(),
            metadata,
        })
    }

    async fn deploy(&self, plan: &ProviderPlan) -> DeploymentResult {
        let Some(service_name) = plan.metadata.get("service_name").cloned() else {
            return DeploymentResult::failed(self.name(), "plan missing service_name metadata");
        };

        let yaml_path = std::env::temp_dir().join(format!("seesaw_sky_{service_name}.yaml"));
        if let Err(e) = tokio::fs::write(&yaml_path, &plan.rendered_script).await {
            return DeploymentResult::failed(self.name(), format!("write service yaml: {e}"));
        }

        tracing::info!(service=%service_name, yaml=%yaml_path.display(), "launching skyserve service");

        let output = tokio::time::timeout(
            UP_TIMEOUT,
            Command::new("sky")
                .args(["serve", "up"])
                .arg(&yaml_path)
                .args(["--service-name", &service_name, "-y"])
                .output(),
        )
        .await;
        let _ = tokio::fs::remove_file(&yaml_path).await;

        let output = match output {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return DeploymentResult::failed(self.name(), format!("sky serve up failed: {e}"))
            }
            Err(_) => return DeploymentResult::failed(self.name(), "sky serve up timed out"),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(service=%service_name, error=%stderr, "sky serve up failed");
            let mut result =
                DeploymentResult::failed(self.name(), format!("sky serve up failed: {stderr}"));
            result.metadata.insert("service_name".to_string(), service_name);
            return result;
        }

        let Some(endpoint) = poll_endpoint(&service_name).await else {
            tracing::warn!(
                service=%service_name,
                "sky serve up succeeded but endpoint not yet available; still provisioning"
            );
            let mut result = DeploymentResult::failed(
                self.name(),
                "endpoint not yet available (still provisioning)",
            );
            result.metadata.insert("service_name".to_string(), service_name);
            return result;
        };

        tracing::info!(service=%service_name, endpoint=%endpoint, "skyserve service up");
        DeploymentResult {
            provider: self.name().to_string(),
            endpoint_url: Some(endpoint.clone()),
            health_url: Some(format!("{}/health", endpoint.trim_end_matches('/'))),
            error: None,
            metadata: plan.metadata.clone(),
        }
    }

    async fn status(&self, service_name: &str) -> serde_json::Value {
        let spot_service = format!("{service_name}-spot");
        let output = Command::new("sky")
            .args(["serve", "status", &spot_service])
            .output()
            .await;
        match output {
            Ok(out) => serde_json::json!({
                "provider": self.name(),
                "service_name": spot_service,
                "raw": String::from_utf8_lossy(&out.stdout).trim(),
            }),
            Err(e) => serde_json::json!({
                "provider": self.name(),
                "service_name": spot_service,
                "error": e.to_string(),
            }),
        }
    }

    async fn destroy(&self, result: &DeploymentResult) -> Result<(), Error> {
        let Some(service_name) = result.metadata.get("service_name") else {
            return Err(Error::Teardown(vec![(
                "skyserve".to_string(),
                "no service_name in metadata, cannot destroy".to_string(),
            )]));
        };

        tracing::info!(service=%service_name, "tearing down skyserve service");

        // The controller may still be starting when a destroy arrives, in
        // which case `sky serve down` silently does nothing; verify the
        // service is gone and retry.
        for attempt in 0..DOWN_ATTEMPTS {
            let _ = Command::new("sky")
                .args(["serve", "down", service_name, "-y"])
                .output()
                .await;

            if service_is_gone(service_name).await {
                return Ok(());
            }

            tracing::warn!(
                service=%service_name,
                attempt = attempt + 1,
                "service still exists after sky serve down, retrying"
            );
            tokio::time::sleep(DOWN_RETRY_DELAY).await;
        }

        Err(Error::Teardown(vec![(
            "skyserve".to_string(),
            format!("could not confirm deletion of {service_name} after {DOWN_ATTEMPTS} attempts"),
        )]))
    }
}

async fn service_is_gone(service_name: &str) -> bool {
    let output = Command::new("sky")
        .args(["serve", "status", service_name])
        .output()
        .await;
    let Ok(out) = output else {
        // Can't reach the sky CLI, controller probably still INIT.
        return false;
    };
    let stdout = String::from_utf8_lossy(&out.stdout);
    let combined = format!("{}{}", stdout, String::from_utf8_lossy(&out.stderr));
    if combined.contains("No existing services") {
        return true;
    }
    if !stdout.contains(service_name) {
        return true;
    }
    if stdout.contains("SHUTTING_DOWN") {
        tracing::info!(service=%service_name, "service still shutting down");
    }
    false
}

/// Poll `sky serve status --endpoint` until the service URL appears.
async fn poll_endpoint(service_name: &str) -> Option<String> {
    for attempt in 0..ENDPOINT_POLL_ATTEMPTS {
        let output = Command::new("sky")
            .args(["serve", "status", service_name, "--endpoint"])
            .output()
            .await;

        if let Ok(out) = output {
            let endpoint = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if endpoint.starts_with("http") {
                return Some(endpoint);
            }
        }

        tracing::debug!(
            service=%service_name,
            attempt = attempt + 1,
            "endpoint not yet available"
        );
        if attempt + 1 < ENDPOINT_POLL_ATTEMPTS {
            tokio::time::sleep(ENDPOINT_POLL_DELAY).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_renders_replica_policy() {
        let req = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        let plan = SkyServeProvider
            .plan(&req, "vllm serve Qwen/Qwen2.5-7B-Instruct --port 8001")
            .unwrap();
        assert!(plan.rendered_script.contains("min_replicas: 0"));
        assert!(plan.rendered_script.contains("max_replicas: 5"));
        assert!(plan.rendered_script.contains("accelerators: L4:1"));
        assert!(plan.rendered_script.contains("use_spot: true"));
        assert!(plan.metadata.get("service_name").unwrap().ends_with("-spot"));
    }

    #[test]
    fn test_plan_region_block() {
        let mut req = DeployRequest::new("m", "L4");
        req.region = Some("us-east-1".to_string());
        req.spot_cloud = "AWS".to_string();
        let plan = SkyServeProvider.plan(&req, "vllm serve m").unwrap();
        assert!(plan.rendered_script.contains("infra: aws/us-east-1"));

        req.region = None;
        let plan = SkyServeProvider.plan(&req, "vllm serve m").unwrap();
        assert!(!plan.rendered_script.contains("any_of"));
    }
}
