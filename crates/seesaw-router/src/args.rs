use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "SEESAW_ROUTER_LISTEN", default_value = "0.0.0.0:18080")]
    pub listen_addr: String,

    /// Serverless base URL to start with; usually pushed later via
    /// POST /router/config.
    #[arg(long, env = "SEESAW_SERVERLESS_URL")]
    pub serverless_url: Option<String>,

    #[arg(long, env = "SEESAW_SERVERLESS_TOKEN")]
    pub serverless_auth_token: Option<String>,

    /// Spot base URL to start with.
    #[arg(long, env = "SEESAW_SPOT_URL")]
    pub spot_url: Option<String>,

    /// Background probe tick in milliseconds (floored at 250).
    #[arg(long, env = "SEESAW_PROBE_INTERVAL_MS", default_value_t = 1000)]
    pub probe_interval_ms: u64,

    /// Probe request timeout in milliseconds (capped at 1000).
    #[arg(long, env = "SEESAW_PROBE_TIMEOUT_MS", default_value_t = 1000)]
    pub probe_timeout_ms: u64,

    #[arg(long, env = "SEESAW_PROBE_PATH", default_value = "/health")]
    pub probe_path: String,

    /// API key required on proxied requests. Unset means open.
    #[arg(long, env = "SEESAW_API_KEY")]
    pub api_key: Option<String>,

    /// "text" or "json".
    #[arg(long, env = "SEESAW_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}
