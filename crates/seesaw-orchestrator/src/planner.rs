//! Pre-deploy validation and plan rendering. Everything here is pure;
//! any failure surfaces before a single provider API call is made.

use seesaw_common::{catalog, template, ColdStartMode, DeployRequest, Error, ProviderPlan};
use seesaw_providers::registry;

const VLLM_CMD_TEMPLATE: &str = include_str!("../templates/vllm_serve_cmd.txt");

/// Plans for every backend this deployment targets. `spot` is absent in
/// serverless-only mode.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub serverless: ProviderPlan,
    pub spot: Option<ProviderPlan>,
}

/// Reject malformed requests with a `Validation` error before planning.
pub fn validate(request: &DeployRequest) -> Result<(), Error> {
    if request.model_name.trim().is_empty() {
        return Err(Error::Validation("model name must not be empty".to_string()));
    }
    if catalog::get_gpu_spec(&request.gpu).is_none() {
        return Err(Error::Validation(format!(
            "unknown GPU type '{}'",
            request.gpu
        )));
    }
    if request.gpu_count == 0 || request.tp_size == 0 {
        return Err(Error::Validation(
            "gpu_count and tp_size must be at least 1".to_string(),
        ));
    }
    if request.tp_size > request.gpu_count {
        return Err(Error::Validation(format!(
            "tp_size {} exceeds gpu_count {}",
            request.tp_size, request.gpu_count
        )));
    }
    if !request
        .service_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
        || request.service_name.is_empty()
    {
        return Err(Error::Validation(format!(
            "service name '{}' must be non-empty alphanumeric-with-dashes",
            request.service_name
        )));
    }

    // The serverless provider must actually offer this GPU.
    catalog::provider_gpu_id(&request.gpu, &request.serverless_provider)?;

    if let Some(region) = &request.region {
        let regions = catalog::provider_regions(&request.gpu, &request.serverless_provider);
        if !regions.is_empty() && !regions.contains(&region.as_str()) {
            return Err(Error::Validation(format!(
                "region '{}' not offered by {} for {} (available: {})",
                region,
                request.serverless_provider,
                request.gpu,
                regions.join(", ")
            )));
        }
    }
    Ok(())
}

/// Render the vLLM serve command shared by every backend. The port
/// differs per provider; adapters rewrite it in their own plans.
pub fn render_vllm_cmd(request: &DeployRequest, port: u16) -> Result<String, Error> {
    let mut extra_flags = String::new();
    if request.cold_start_mode == ColdStartMode::FastBoot {
        // Skip CUDA graph capture so the engine serves sooner.
        extra_flags.push_str(" --enforce-eager");
    }

    let mut vars = std::collections::HashMap::new();
    vars.insert("model_name".to_string(), request.model_name.clone());
    vars.insert("port".to_string(), port.to_string());
    vars.insert("max_model_len".to_string(), request.max_model_len.to_string());
    vars.insert("tp_size".to_string(), request.tp_size.to_string());
    vars.insert("extra_flags".to_string(), extra_flags);

    Ok(template::render(VLLM_CMD_TEMPLATE, &vars)?.trim().to_string())
}

/// Validate, then ask each target provider for its rendered plan.
pub fn plan(request: &DeployRequest) -> Result<LaunchPlan, Error> {
    validate(request)?;

    let serverless = registry::get(&request.serverless_provider)?;
    let serverless_plan = serverless.plan(request, &render_vllm_cmd(request, 8000)?)?;

    let spot_plan = if request.serverless_only {
        None
    } else {
        let spot = registry::get("skyserve")?;
        Some(spot.plan(request, &render_vllm_cmd(request, 8001)?)?)
    };

    Ok(LaunchPlan {
        serverless: serverless_plan,
        spot: spot_plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_unknown_gpu() {
        let mut req = DeployRequest::new("m", "L4");
        req.gpu = "TPU_V5".to_string();
        assert!(matches!(validate(&req), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_tp_larger_than_gpus() {
        let mut req = DeployRequest::new("m", "L4");
        req.tp_size = 4;
        req.gpu_count = 2;
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_service_name() {
        let mut req = DeployRequest::new("m", "L4");
        req.service_name = "has spaces".to_string();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_validate_checks_provider_offering() {
        let mut req = DeployRequest::new("m", "A100_40GB");
        // RunPod's catalog has no 40GB A100 entry.
        req.serverless_provider = "runpod".to_string();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_vllm_cmd_fast_boot_flag() {
        let mut req = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        let cmd = render_vllm_cmd(&req, 8001).unwrap();
        assert!(cmd.contains("--port 8001"));
        assert!(cmd.contains("--enforce-eager"));

        req.cold_start_mode = ColdStartMode::Normal;
        let cmd = render_vllm_cmd(&req, 8000).unwrap();
        assert!(!cmd.contains("--enforce-eager"));
    }

    #[test]
    fn test_plan_skips_spot_when_serverless_only() {
        let mut req = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        req.serverless_only = true;
        let plan = plan(&req).unwrap();
        assert!(plan.spot.is_none());
        assert_eq!(plan.serverless.provider, "modal");
    }
}
