mod args;

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use seesaw_router::{build, serve, ConfigPatch, ProbeConfig, RouterConfig};

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    seesaw_common::telemetry::init_tracing("seesaw-router", &args.log_format);

    let cfg = RouterConfig {
        probe: ProbeConfig {
            interval: Duration::from_millis(args.probe_interval_ms),
            timeout: Duration::from_millis(args.probe_timeout_ms),
            ready_path: args.probe_path.clone(),
        },
        api_key: args.api_key.clone(),
        ..Default::default()
    };

    let (st, app) = build(cfg);
    st.state.apply(&ConfigPatch {
        serverless_url: args.serverless_url.clone(),
        serverless_auth_token: args.serverless_auth_token.clone(),
        spot_url: args.spot_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(addr=%args.listen_addr, "router listening");

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown_for_signal.cancel();
        }
    });

    serve(listener, st, app, shutdown).await
}
