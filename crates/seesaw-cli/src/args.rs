use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "seesaw")]
#[command(about = "Hybrid serverless + spot LLM deployments", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a model to serverless + spot behind one routing endpoint
    Deploy {
        /// HuggingFace model name, e.g. Qwen/Qwen2.5-7B-Instruct
        #[arg(long)]
        model: String,

        /// GPU type (see `seesaw gpus`)
        #[arg(long, default_value = "L4")]
        gpu: String,

        #[arg(long, default_value_t = 1)]
        gpu_count: u32,

        /// Tensor parallel size
        #[arg(long, default_value_t = 1)]
        tp_size: u32,

        #[arg(long, default_value_t = 4096)]
        max_model_len: u32,

        /// Serverless provider; picks the cheapest offering when omitted
        #[arg(long)]
        provider: Option<String>,

        /// Cloud for the spot leg
        #[arg(long, default_value = "aws")]
        spot_cloud: String,

        /// Region constraint for the serverless leg
        #[arg(long)]
        region: Option<String>,

        /// Deployment name; auto-generated when omitted
        #[arg(long)]
        name: Option<String>,

        /// Skip fast-boot optimizations (memory snapshots, eager mode)
        #[arg(long)]
        normal_boot: bool,

        /// Keep at least one replica warm on both backends
        #[arg(long)]
        no_scale_to_zero: bool,

        /// Deploy the serverless leg only, no spot and no router
        #[arg(long)]
        serverless_only: bool,

        /// Router listen address
        #[arg(long, env = "SEESAW_ROUTER_LISTEN", default_value = "0.0.0.0:18080")]
        listen_addr: String,

        /// API key required on proxied requests
        #[arg(long, env = "SEESAW_API_KEY")]
        api_key: Option<String>,
    },

    /// Tear down a deployment's backends
    Destroy {
        /// Service name from `seesaw list`
        service: String,
    },

    /// Show live status of a deployment
    Status {
        service: String,
    },

    /// List known deployments
    List {
        /// Include destroyed deployments
        #[arg(long)]
        all: bool,
    },

    /// Show the GPU catalog with serverless and spot pricing
    Gpus {
        /// Filter to one GPU type
        #[arg(long)]
        gpu: Option<String>,
    },

    /// Run the routing proxy standalone
    Router {
        #[arg(long, env = "SEESAW_ROUTER_LISTEN", default_value = "0.0.0.0:18080")]
        listen_addr: String,

        #[arg(long, env = "SEESAW_SERVERLESS_URL")]
        serverless_url: Option<String>,

        #[arg(long, env = "SEESAW_SERVERLESS_TOKEN")]
        serverless_auth_token: Option<String>,

        #[arg(long, env = "SEESAW_SPOT_URL")]
        spot_url: Option<String>,

        #[arg(long, env = "SEESAW_API_KEY")]
        api_key: Option<String>,
    },
}
