//! Parallel backend launch. Both deploys start at the same instant; the
//! serverless leg is awaited with a bound, the spot leg keeps running in
//! the background for as long as it takes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use seesaw_common::{DeploymentResult, Error, ProviderPlan};
use seesaw_providers::Provider;

pub const SERVERLESS_DEPLOY_TIMEOUT: Duration = Duration::from_secs(600);

/// Handle for the still-running spot deploy. Dropped handles keep
/// running; `wait` consumes the handle and yields the final result.
pub struct SpotHandle {
    handle: JoinHandle<DeploymentResult>,
}

impl SpotHandle {
    pub async fn wait(self) -> DeploymentResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => DeploymentResult::failed("skyserve", format!("spot deploy task failed: {e}")),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct LaunchOutcome {
    pub serverless: DeploymentResult,
    pub spot: Option<SpotHandle>,
}

/// Kick off both deploys concurrently. Returns once the serverless leg
/// resolves (success, failure, or timeout); the spot leg is handed back
/// as a handle. A serverless failure never cancels the spot deploy.
pub async fn launch_backends(
    serverless: Arc<dyn Provider>,
    serverless_plan: ProviderPlan,
    spot: Option<(Arc<dyn Provider>, ProviderPlan)>,
    serverless_timeout: Duration,
) -> LaunchOutcome {
    let spot_handle = spot.map(|(provider, plan)| {
        let handle = tokio::spawn(async move { provider.deploy(&plan).await });
        SpotHandle { handle }
    });

    let provider_name = serverless.name();
    let serverless_task = tokio::spawn(async move { serverless.deploy(&serverless_plan).await });

    let serverless_result = match tokio::time::timeout(serverless_timeout, serverless_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(error=%e, "serverless deploy task failed");
            DeploymentResult::failed(provider_name, format!("deploy task failed: {e}"))
        }
        Err(_) => {
            tracing::error!(
                timeout_s = serverless_timeout.as_secs(),
                "serverless deploy timed out"
            );
            DeploymentResult::failed(
                provider_name,
                format!("deploy timed out after {}s", serverless_timeout.as_secs()),
            )
        }
    };

    LaunchOutcome {
        serverless: serverless_result,
        spot: spot_handle,
    }
}

/// Destroy every backend independently, collecting failures instead of
/// stopping at the first one.
pub async fn teardown(backends: Vec<(Arc<dyn Provider>, DeploymentResult)>) -> Result<(), Error> {
    let mut errors: Vec<(String, String)> = Vec::new();
    for (provider, result) in backends {
        let name = provider.name().to_string();
        tracing::info!(provider=%name, "destroying backend");
        match provider.destroy(&result).await {
            Ok(()) => {}
            Err(Error::Teardown(mut partial)) => errors.append(&mut partial),
            Err(e) => errors.push((name, e.to_string())),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Teardown(errors))
    }
}
