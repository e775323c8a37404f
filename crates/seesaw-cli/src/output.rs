use seesaw_common::catalog;
use seesaw_common::DeploymentResult;
use seesaw_orchestrator::DeploymentRecord;

fn component_line(name: &str, result: Option<&DeploymentResult>) {
    match result {
        Some(r) if r.ok() => println!(
            "  ✓ {:<12} {}",
            name,
            r.endpoint_url.as_deref().unwrap_or("-")
        ),
        Some(r) => println!(
            "  ✗ {:<12} {}",
            name,
            r.error.as_deref().unwrap_or("failed")
        ),
        None => println!("  … {:<12} pending", name),
    }
}

pub fn print_deploy_summary(record: &DeploymentRecord, router_url: Option<&str>) {
    println!("\n=== Deployment {} ===", record.service_name);
    println!("  model:  {}", record.model_name);
    println!("  gpu:    {} x{}", record.gpu, record.request.gpu_count);
    println!("  status: {}", record.status.as_str());
    component_line("serverless", record.deployment.serverless.as_ref());
    if !record.request.serverless_only {
        component_line("spot", record.deployment.spot.as_ref());
    }
    if let Some(url) = router_url {
        println!("\n  endpoint: {url}");
        println!("  try: curl {url}/v1/models");
    }
    println!();
}

pub fn print_records(records: &[DeploymentRecord]) {
    if records.is_empty() {
        println!("No deployments found.");
        return;
    }
    println!(
        "{:<24} {:<32} {:<12} {:<10} {:<25}",
        "Service", "Model", "GPU", "Status", "Created"
    );
    println!("{:-<105}", "");
    for r in records {
        println!(
            "{:<24} {:<32} {:<12} {:<10} {:<25}",
            r.service_name,
            r.model_name,
            r.gpu,
            r.status.as_str(),
            r.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

pub fn print_status(status: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(status).unwrap_or_else(|_| status.to_string())
    );
}

pub fn print_gpu_catalog(filter: Option<&str>) {
    let offerings = catalog::query(filter, None, None, None);
    if offerings.is_empty() {
        println!("No offerings found.");
        return;
    }

    println!(
        "{:<12} {:<8} {:<10} {:<12} {:<12} {:<10}",
        "GPU", "VRAM", "Provider", "$/gpu-hr", "Spot $/hr", "Savings"
    );
    println!("{:-<68}", "");
    for o in &offerings {
        let vram = catalog::get_gpu_spec(o.gpu)
            .map(|s| format!("{}GB", s.vram_gb))
            .unwrap_or_else(|| "-".to_string());
        let spot = catalog::spot_price(o.gpu, "aws");
        let (spot_str, savings) = match spot {
            Some(p) if o.price_per_gpu_hour > 0.0 => {
                let pct = (1.0 - p.price_per_gpu_hour / o.price_per_gpu_hour) * 100.0;
                (format!("{:.2}", p.price_per_gpu_hour), format!("{pct:.0}%"))
            }
            Some(p) => (format!("{:.2}", p.price_per_gpu_hour), "-".to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        let price = if o.price_per_gpu_hour > 0.0 {
            format!("{:.2}", o.price_per_gpu_hour)
        } else {
            "-".to_string()
        };
        println!(
            "{:<12} {:<8} {:<10} {:<12} {:<12} {:<10}",
            o.gpu, vram, o.provider, price, spot_str, savings
        );
    }
}
