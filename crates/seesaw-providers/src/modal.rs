//! Modal serverless adapter: deploys the rendered vLLM app script with
//! the `modal` CLI and resolves the web endpoint from `modal app list`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use seesaw_common::{
    catalog, template, ColdStartMode, DeployRequest, DeploymentResult, Error, ProviderPlan,
};

use crate::Provider;

const APP_TEMPLATE: &str = include_str!("../templates/modal_app.py.tpl");
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(600);
const URL_RESOLVE_RETRIES: u32 = 5;
const URL_RESOLVE_DELAY: Duration = Duration::from_secs(3);

pub struct ModalProvider;

#[async_trait::async_trait]
impl Provider for ModalProvider {
    fn name(&self) -> &'static str {
        "modal"
    }

    fn plan(&self, request: &DeployRequest, vllm_cmd: &str) -> Result<ProviderPlan, Error> {
        let app_name = format!("{}-serverless", request.service_name);
        let fast_boot = request.cold_start_mode == ColdStartMode::FastBoot;
        let gpu = catalog::provider_gpu_id(&request.gpu, "modal")?;

        // Modal serves on port 8000 internally.
        let modal_vllm_cmd = vllm_cmd.replace("--port 8001", "--port 8000");
        let serverless = &request.scaling.serverless;

        let mut replacements = HashMap::new();
        replacements.insert("app_name".to_string(), app_name.clone());
        replacements.insert("gpu".to_string(), gpu.to_string());
        replacements.insert("port".to_string(), "8000".to_string());
        replacements.insert("vllm_cmd".to_string(), modal_vllm_cmd);
        replacements.insert("vllm_version".to_string(), request.vllm_version.clone());
        replacements.insert("max_concurrency".to_string(), serverless.concurrency.to_string());
        replacements.insert("timeout_s".to_string(), serverless.timeout.to_string());
        replacements.insert(
            "scaledown_window_s".to_string(),
            serverless.scaledown_window.to_string(),
        );
        replacements.insert("startup_timeout_s".to_string(), "600".to_string());
        replacements.insert(
            "enable_memory_snapshot".to_string(),
            if fast_boot { "True" } else { "False" }.to_string(),
        );
        replacements.insert(
            "experimental_options_line".to_string(),
            if fast_boot {
                "experimental_options={\"enable_gpu_snapshot\": True},".to_string()
            } else {
                String::new()
            },
        );

        let rendered = template::render(APP_TEMPLATE, &replacements)?;

        let mut env = HashMap::new();
        env.insert("MODEL_ID".to_string(), request.model_name.clone());

        let mut metadata = HashMap::new();
        metadata.insert("app_name".to_string(), app_name);
        metadata.insert("function_name".to_string(), "serve".to_string());

        Ok(ProviderPlan {
            provider: self.name().to_string(),
            rendered_script: rendered,
            env,
            metadata,
        })
    }

    async fn deploy(&self, plan: &ProviderPlan) -> DeploymentResult {
        let Some(app_name) = plan.metadata.get("app_name").cloned() else {
            return DeploymentResult::failed(self.name(), "plan missing app_name metadata");
        };

        let script_path = match write_script(&app_name, &plan.rendered_script).await {
            Ok(p) => p,
            Err(e) => return DeploymentResult::failed(self.name(), format!("write script: {e}")),
        };

        tracing::info!(app=%app_name, script=%script_path.display(), "deploying modal app");

        let mut cmd = Command::new("modal");
        cmd.arg("deploy").arg(&script_path).envs(plan.env.clone());

        let output = tokio::time::timeout(DEPLOY_TIMEOUT, cmd.output()).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        let output = match output {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return DeploymentResult::failed(self.name(), format!("modal deploy failed: {e}"))
            }
            Err(_) => return DeploymentResult::failed(self.name(), "modal deploy timed out"),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(app=%app_name, error=%stderr, "modal deploy failed");
            let mut result =
                DeploymentResult::failed(self.name(), format!("modal deploy failed: {stderr}"));
            result.metadata.insert("app_name".to_string(), app_name);
            return result;
        }

        // The URL printed by `modal deploy` may lag; resolve via app list
        // with retries.
        let url = match resolve_web_url(&app_name).await {
            Some(url) => url,
            None => {
                let mut result =
                    DeploymentResult::failed(self.name(), "deployed but could not resolve web URL");
                result.metadata.insert("app_name".to_string(), app_name);
                return result;
            }
        };

        tracing::info!(app=%app_name, url=%url, "modal app deployed");
        DeploymentResult {
            provider: self.name().to_string(),
            endpoint_url: Some(url.clone()),
            health_url: Some(format!("{}/health", url.trim_end_matches('/'))),
            error: None,
            metadata: plan.metadata.clone(),
        }
    }

    fn auth_token(&self) -> String {
        std::env::var("MODAL_PROXY_TOKEN").unwrap_or_default()
    }

    async fn status(&self, service_name: &str) -> serde_json::Value {
        let app_name = format!("{service_name}-serverless");
        let output = Command::new("modal").args(["app", "list"]).output().await;
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let state = if stdout.contains(&app_name) { "running" } else { "not found" };
                serde_json::json!({
                    "provider": self.name(),
                    "app_name": app_name,
                    "status": state,
                })
            }
            Err(e) => serde_json::json!({
                "provider": self.name(),
                "app_name": app_name,
                "error": e.to_string(),
            }),
        }
    }

    async fn destroy(&self, result: &DeploymentResult) -> Result<(), Error> {
        let Some(app_name) = result.metadata.get("app_name") else {
            return Err(Error::Teardown(vec![(
                "modal".to_string(),
                "no app_name in metadata, cannot destroy".to_string(),
            )]));
        };

        tracing::info!(app=%app_name, "stopping modal app");
        let output = Command::new("modal")
            .args(["app", "stop", app_name])
            .output()
            .await
            .map_err(|e| {
                Error::Teardown(vec![("modal".to_string(), format!("modal app stop: {e}"))])
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(Error::Teardown(vec![("modal".to_string(), stderr)]));
        }
        Ok(())
    }
}

async fn write_script(app_name: &str, contents: &str) -> std::io::Result<PathBuf> {
    // The script may carry tokens from template substitution.
    let path = std::env::temp_dir().join(format!("seesaw_modal_{app_name}.py"));
    tokio::fs::write(&path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(path)
}

/// Resolve the deployed function's web URL from `modal app list --json`.
/// Retries because the URL may not be available right after deploy returns.
async fn resolve_web_url(app_name: &str) -> Option<String> {
    for attempt in 0..URL_RESOLVE_RETRIES {
        let output = Command::new("modal")
            .args(["app", "list", "--json"])
            .output()
            .await;

        if let Ok(out) = output {
            if let Ok(apps) =
                serde_json::from_slice::<Vec<serde_json::Value>>(&out.stdout)
            {
                let url = apps.iter().find_map(|app| {
                    if app.get("Name").and_then(|n| n.as_str()) == Some(app_name) {
                        app.get("WebUrl").and_then(|u| u.as_str()).map(|s| s.to_string())
                    } else {
                        None
                    }
                });
                if let Some(url) = url {
                    if !url.is_empty() {
                        return Some(url);
                    }
                }
            }
        }

        tracing::debug!(app=%app_name, attempt = attempt + 1, "web URL not yet available");
        if attempt + 1 < URL_RESOLVE_RETRIES {
            tokio::time::sleep(URL_RESOLVE_DELAY).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_renders_fast_boot_flags() {
        let req = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        let plan = ModalProvider
            .plan(&req, "vllm serve Qwen/Qwen2.5-7B-Instruct --port 8001")
            .unwrap();
        assert!(plan.rendered_script.contains("enable_memory_snapshot=True"));
        assert!(plan.rendered_script.contains("enable_gpu_snapshot"));
        assert!(plan.rendered_script.contains("--port 8000"));
        assert!(!plan.rendered_script.contains("--port 8001"));
        assert_eq!(plan.env.get("MODEL_ID").unwrap(), "Qwen/Qwen2.5-7B-Instruct");
        assert!(plan.metadata.get("app_name").unwrap().ends_with("-serverless"));
    }

    #[test]
    fn test_plan_rejects_unsupported_gpu() {
        let mut req = DeployRequest::new("m", "L4");
        req.gpu = "RTX4090".to_string(); // RunPod-only GPU
        let err = ModalProvider.plan(&req, "vllm serve m").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_plan_normal_mode_disables_snapshot() {
        let mut req = DeployRequest::new("m", "L4");
        req.cold_start_mode = ColdStartMode::Normal;
        let plan = ModalProvider.plan(&req, "vllm serve m --port 8001").unwrap();
        assert!(plan.rendered_script.contains("enable_memory_snapshot=False"));
        assert!(!plan.rendered_script.contains("enable_gpu_snapshot"));
    }
}
