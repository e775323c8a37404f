mod args;
mod output;

use anyhow::{bail, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use seesaw_common::{catalog, ColdStartMode, DeployRequest};
use seesaw_orchestrator::{Coordinator, DeployOptions, Store};

use crate::args::{Args, Command};
use crate::output::{print_deploy_summary, print_gpu_catalog, print_records, print_status};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    seesaw_common::telemetry::init_tracing("seesaw", "text");

    match args.command {
        Command::Deploy {
            model,
            gpu,
            gpu_count,
            tp_size,
            max_model_len,
            provider,
            spot_cloud,
            region,
            name,
            normal_boot,
            no_scale_to_zero,
            serverless_only,
            listen_addr,
            api_key,
        } => {
            let mut request = DeployRequest::new(model, &gpu);
            request.gpu_count = gpu_count;
            request.tp_size = tp_size;
            request.max_model_len = max_model_len;
            request.spot_cloud = spot_cloud;
            request.region = region;
            request.serverless_only = serverless_only;
            if let Some(name) = name {
                request.service_name = name;
            }
            if normal_boot {
                request.cold_start_mode = ColdStartMode::Normal;
            }
            if no_scale_to_zero {
                request.scaling = request.scaling.without_scale_to_zero();
            }
            request.serverless_provider = match provider {
                Some(p) => p,
                None => {
                    let offerings = catalog::query(Some(&request.gpu), None, None, None);
                    let Some(best) = catalog::cheapest(&offerings) else {
                        bail!("no serverless provider offers GPU '{}'", request.gpu);
                    };
                    println!(
                        "→ auto-selected {} (${:.2}/gpu-hr for {})",
                        best.provider, best.price_per_gpu_hour, best.gpu
                    );
                    best.provider.to_string()
                }
            };

            let store = Store::open_default().await?;
            let coordinator = Coordinator::new(store);
            let opts = DeployOptions {
                router_listen_addr: listen_addr,
                router_api_key: api_key,
                ..Default::default()
            };

            println!("→ deploying {} ({})", request.model_name, request.service_name);
            let active = coordinator.deploy_hybrid(request, opts).await?;
            print_deploy_summary(&active.record, active.router_url.as_deref());

            if !active.record.request.serverless_only {
                println!("Routing proxy is serving; press ctrl-c to stop it.");
                println!("(Backends keep running; use `seesaw destroy {}` to tear them down.)",
                    active.record.service_name);
                wait_for_ctrl_c(&active).await;
            }
        }

        Command::Destroy { service } => {
            let store = Store::open_default().await?;
            let coordinator = Coordinator::new(store);
            println!("→ destroying {service}");
            match coordinator.destroy_hybrid(&service).await {
                Ok(()) => println!("✓ {service} destroyed"),
                Err(e) => {
                    eprintln!("✗ teardown incomplete: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Status { service } => {
            let store = Store::open_default().await?;
            let coordinator = Coordinator::new(store);
            let status = coordinator.status_hybrid(&service).await?;
            print_status(&status);
        }

        Command::List { all } => {
            let store = Store::open_default().await?;
            let mut records = store.list(None).await?;
            if !all {
                records.retain(|r| r.status != seesaw_common::DeployStatus::Destroyed);
            }
            print_records(&records);
        }

        Command::Gpus { gpu } => {
            let filter = match gpu {
                Some(g) => Some(catalog::normalize_gpu_name(&g)?),
                None => None,
            };
            print_gpu_catalog(filter.as_deref());
        }

        Command::Router {
            listen_addr,
            serverless_url,
            serverless_auth_token,
            spot_url,
            api_key,
        } => {
            let cfg = seesaw_router::RouterConfig {
                api_key,
                ..Default::default()
            };
            let (st, app) = seesaw_router::build(cfg);
            st.state.apply(&seesaw_router::ConfigPatch {
                serverless_url,
                serverless_auth_token,
                spot_url,
            });
            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            println!("→ router listening on {listen_addr}");

            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });
            seesaw_router::serve(listener, st, app, shutdown).await?;
        }
    }

    Ok(())
}

async fn wait_for_ctrl_c(active: &seesaw_orchestrator::ActiveDeployment) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\n→ stopping router");
            active.shutdown();
        }
        _ = active.wait_for_shutdown() => {}
    }
}
