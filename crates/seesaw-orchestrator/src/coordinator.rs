//! Deployment lifecycle coordinator. Owns the embedded router, drives
//! the parallel launch, and keeps the record store in sync as the slow
//! spot leg completes in the background.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use seesaw_common::{DeployRequest, DeployStatus, DeploymentResult, Error, HybridDeployment};
use seesaw_providers::registry;
use seesaw_router::{ConfigPatch, RouterConfig};

use crate::launch::{self, SERVERLESS_DEPLOY_TIMEOUT};
use crate::planner;
use crate::store::{DeploymentRecord, Store};

const CONFIG_PUSH_ATTEMPTS: u32 = 5;
const CONFIG_PUSH_DELAY: Duration = Duration::from_secs(3);
const WARMUP_TIMEOUT: Duration = Duration::from_secs(300);
const WARMUP_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub router_listen_addr: String,
    pub router_api_key: Option<String>,
    pub serverless_timeout: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            router_listen_addr: "0.0.0.0:18080".to_string(),
            router_api_key: None,
            serverless_timeout: SERVERLESS_DEPLOY_TIMEOUT,
        }
    }
}

/// A hybrid deployment whose router is serving from this process. Hold
/// on to it for the lifetime of the deployment; `shutdown()` stops the
/// router gracefully.
pub struct ActiveDeployment {
    pub record: DeploymentRecord,
    pub router_url: Option<String>,
    shutdown: CancellationToken,
}

impl ActiveDeployment {
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the router is asked to stop (ctrl-c handling lives in
    /// the caller).
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await;
    }
}

pub struct Coordinator {
    store: Store,
    http: reqwest::Client,
}

impl Coordinator {
    pub fn new(store: Store) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { store, http }
    }

    /// Full hybrid launch:
    /// router first (public endpoint exists before any backend), then
    /// both backends in parallel, then config pushes as each resolves.
    pub async fn deploy_hybrid(
        &self,
        request: DeployRequest,
        opts: DeployOptions,
    ) -> Result<ActiveDeployment, Error> {
        if request.serverless_only {
            return self.deploy_serverless_only(request).await;
        }

        let plan = planner::plan(&request)?;
        let serverless = registry::get(&request.serverless_provider)?;
        let spot = registry::get("skyserve")?;

        // 1. Router up immediately, with nothing to route to yet.
        let router_cfg = RouterConfig {
            api_key: opts.router_api_key.clone(),
            ..Default::default()
        };
        let (router_state, router_app) = seesaw_router::build(router_cfg);
        let listener = tokio::net::TcpListener::bind(&opts.router_listen_addr)
            .await
            .map_err(|e| {
                Error::Config(format!("bind router on {}: {e}", opts.router_listen_addr))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Config(e.to_string()))?;
        let router_url = format!("http://{local_addr}");
        let shutdown = CancellationToken::new();
        let serve_state = router_state;
        let serve_token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) =
                seesaw_router::serve(listener, serve_state, router_app, serve_token).await
            {
                tracing::error!(error=%e, "router exited");
            }
        });
        tracing::info!(url=%router_url, "router listening");

        // 2. Both backends, launched together.
        let spot_plan = plan.spot.clone().map(|p| (spot.clone(), p));
        let outcome = launch::launch_backends(
            serverless.clone(),
            plan.serverless.clone(),
            spot_plan,
            opts.serverless_timeout,
        )
        .await;

        if outcome.serverless.ok() {
            let patch = ConfigPatch {
                serverless_url: outcome.serverless.endpoint_url.clone(),
                serverless_auth_token: Some(serverless.auth_token()),
                ..Default::default()
            };
            self.push_router_config(&router_url, &patch).await;
        } else {
            tracing::error!(
                error = outcome.serverless.error.as_deref().unwrap_or("unknown"),
                "serverless deploy failed, waiting on the spot leg"
            );
        }

        let deployment = HybridDeployment {
            serverless: Some(outcome.serverless.clone()),
            spot: None,
            router: Some(DeploymentResult {
                provider: "router".to_string(),
                endpoint_url: Some(router_url.clone()),
                ..Default::default()
            }),
            router_url: Some(router_url.clone()),
        };

        // 3. Spot resolves whenever it resolves; the watcher pushes the
        // URL and refreshes the stored status.
        if let Some(handle) = outcome.spot {
            let store = self.store.clone();
            let http = self.http.clone();
            let service_name = request.service_name.clone();
            let watcher_router_url = router_url.clone();
            let serverless_ok = outcome.serverless.ok();
            tokio::spawn(async move {
                let result = handle.wait().await;
                if result.ok() {
                    let patch = ConfigPatch {
                        spot_url: result.endpoint_url.clone(),
                        ..Default::default()
                    };
                    push_config(&http, &watcher_router_url, &patch).await;
                    tracing::info!(
                        endpoint = result.endpoint_url.as_deref().unwrap_or("-"),
                        "spot backend online"
                    );
                } else {
                    tracing::warn!(
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "spot deploy failed, staying serverless-only"
                    );
                }

                let status = match (serverless_ok, result.ok()) {
                    (true, true) => DeployStatus::Active,
                    (false, false) => DeployStatus::Failed,
                    _ => DeployStatus::Degraded,
                };
                if let Ok(Some(mut record)) = store.load(&service_name).await {
                    record.deployment.spot = Some(result);
                    record.status = status;
                    if let Err(e) = store.save(&record).await {
                        tracing::warn!(error=%e, "failed to persist spot outcome");
                    }
                } else if let Err(e) = store.update_status(&service_name, status).await {
                    tracing::warn!(error=%e, "failed to update deployment status");
                }
            });
        }

        // 4. Persist what we know now; the watcher overwrites the spot
        // column later. A pending spot leg counts as not-yet-failed.
        let mut record = DeploymentRecord::new(request, deployment);
        if record.status == DeployStatus::Failed && outcome.serverless.error.is_some() {
            // Spot still pending: only the serverless leg has actually failed.
            record.status = DeployStatus::Degraded;
        }
        self.store.save(&record).await?;

        Ok(ActiveDeployment {
            record,
            router_url: Some(router_url),
            shutdown,
        })
    }

    /// Serverless-only mode: no spot leg, no router. The provider's own
    /// endpoint is the public URL; we block until it answers health.
    async fn deploy_serverless_only(
        &self,
        request: DeployRequest,
    ) -> Result<ActiveDeployment, Error> {
        let plan = planner::plan(&request)?;
        let provider = registry::get(&request.serverless_provider)?;

        let result = provider.deploy(&plan.serverless).await;
        if !result.ok() {
            let record = DeploymentRecord::new(
                request,
                HybridDeployment {
                    serverless: Some(result.clone()),
                    ..Default::default()
                },
            );
            self.store.save(&record).await?;
            return Err(Error::ProviderDeploy {
                provider: provider.name().to_string(),
                reason: result.error.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        self.warm_up(&result).await;

        let endpoint = result.endpoint_url.clone();
        let record = DeploymentRecord::new(
            request,
            HybridDeployment {
                serverless: Some(result),
                router_url: endpoint.clone(),
                ..Default::default()
            },
        );
        self.store.save(&record).await?;

        Ok(ActiveDeployment {
            record,
            router_url: endpoint,
            shutdown: CancellationToken::new(),
        })
    }

    /// Poll the backend's health URL until it answers or the warmup
    /// window closes. Best-effort only.
    async fn warm_up(&self, result: &DeploymentResult) {
        let Some(health_url) = result.health_url.as_deref() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + WARMUP_TIMEOUT;
        loop {
            match self.http.get(health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(url=%health_url, "backend warm");
                    return;
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(url=%health_url, "backend not warm within the window");
                return;
            }
            tokio::time::sleep(WARMUP_POLL).await;
        }
    }

    async fn push_router_config(&self, router_url: &str, patch: &ConfigPatch) {
        push_config(&self.http, router_url, patch).await;
    }

    /// Tear down every component that has a result, independently.
    pub async fn destroy_hybrid(&self, service_name: &str) -> Result<(), Error> {
        let Some(record) = self.store.load(service_name).await? else {
            return Err(Error::Validation(format!(
                "no deployment named '{service_name}'"
            )));
        };

        let mut backends = Vec::new();
        if let Some(result) = &record.deployment.serverless {
            if result.ok() || !result.metadata.is_empty() {
                backends.push((registry::get(&result.provider)?, result.clone()));
            }
        }
        if let Some(result) = &record.deployment.spot {
            if result.ok() || !result.metadata.is_empty() {
                backends.push((registry::get(&result.provider)?, result.clone()));
            }
        }

        let outcome = launch::teardown(backends).await;
        self.store
            .update_status(service_name, DeployStatus::Destroyed)
            .await?;
        outcome
    }

    /// Live status: stored record, router health when a router URL is
    /// known, and each provider's own view.
    pub async fn status_hybrid(&self, service_name: &str) -> Result<serde_json::Value, Error> {
        let Some(record) = self.store.load(service_name).await? else {
            return Err(Error::Validation(format!(
                "no deployment named '{service_name}'"
            )));
        };

        let serverless_only = record.request.serverless_only;
        let router_health = match record.deployment.router_url.as_deref() {
            Some(url) if !serverless_only => {
                match self.http.get(format!("{url}/router/health")).send().await {
                    Ok(resp) => resp.json::<serde_json::Value>().await.ok(),
                    Err(e) => Some(serde_json::json!({"error": e.to_string()})),
                }
            }
            _ => None,
        };

        let mut providers = serde_json::Map::new();
        if let Some(result) = &record.deployment.serverless {
            let provider = registry::get(&result.provider)?;
            providers.insert(
                result.provider.clone(),
                provider.status(&record.service_name).await,
            );
        }
        if record.deployment.spot.is_some() {
            let provider = registry::get("skyserve")?;
            providers.insert(
                "skyserve".to_string(),
                provider.status(&record.service_name).await,
            );
        }

        Ok(serde_json::json!({
            "service_name": record.service_name,
            "model_name": record.model_name,
            "gpu": record.gpu,
            "status": record.status.as_str(),
            "serverless_only": serverless_only,
            "router_url": record.deployment.router_url,
            "router_health": router_health,
            "providers": providers,
        }))
    }
}

async fn push_config(http: &reqwest::Client, router_url: &str, patch: &ConfigPatch) {
    let url = format!("{router_url}/router/config");
    for attempt in 1..=CONFIG_PUSH_ATTEMPTS {
        match http.post(&url).json(patch).send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                tracing::warn!(status=%resp.status(), attempt, "router config push rejected")
            }
            Err(e) => tracing::warn!(error=%e, attempt, "router config push failed"),
        }
        if attempt < CONFIG_PUSH_ATTEMPTS {
            tokio::time::sleep(CONFIG_PUSH_DELAY).await;
        }
    }
    tracing::error!(url=%url, "giving up on router config push");
}
