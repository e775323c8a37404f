//! Router server assembly. Used two ways: embedded in the deploy
//! coordinator (which binds the listener itself before the backends
//! exist) and standalone via the `router` CLI subcommand.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;

use crate::handlers::{healthz, proxy, router_config, router_health};
use crate::metrics::{metrics_handler, track_requests, Metrics};
use crate::probe::{ProbeConfig, Prober};
use crate::state::RoutingState;

const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub probe: ProbeConfig,
    /// When set, proxied requests must present this key (`x-api-key`
    /// or bearer). Admin and health endpoints stay open.
    pub api_key: Option<String>,
    pub max_request_body_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            api_key: None,
            max_request_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub state: Arc<RoutingState>,
    pub prober: Arc<Prober>,
    pub http: reqwest::Client,
    pub metrics: Arc<Metrics>,
    pub api_key: Option<String>,
    pub max_request_body_bytes: usize,
}

/// Build the shared state and the axum app. The prober is created but
/// not yet running; callers spawn `prober.run()` themselves so they
/// control its lifetime.
pub fn build(cfg: RouterConfig) -> (AppState, Router) {
    let state = Arc::new(RoutingState::new());
    let prober = Prober::new(state.clone(), cfg.probe.clone());

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_default();

    let st = AppState {
        state,
        prober,
        http,
        metrics: Arc::new(Metrics::default()),
        api_key: cfg.api_key,
        max_request_body_bytes: cfg.max_request_body_bytes,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/router/health", get(router_health))
        .route("/router/config", post(router_config))
        .fallback(proxy)
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st.clone());

    (st, app)
}

/// Serve on an already-bound listener until the token fires. Spawns the
/// prober alongside and cancels it on the way out.
pub async fn serve(
    listener: tokio::net::TcpListener,
    st: AppState,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let prober = st.prober.clone();
    let prober_task = tokio::spawn(prober.run());

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    st.prober.cancel_token().cancel();
    let _ = prober_task.await;
    Ok(())
}
