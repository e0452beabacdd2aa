#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use themis_gateway::proxy::context::{full_body, BoxBody};
use themis_gateway::proxy::Downstream;
use themis_gateway::server;

#[derive(Parser)]
#[command(name = "themis-gateway", about = "Tier-aware load-adaptive rate limiting gateway")]
struct Cli {
    /// Path to gateway config file
    #[arg(short, long, default_value = "config.toml", env = "CONFIG_PATH")]
    config: PathBuf,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Admin API listen address (for health/metrics)
    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,
}

/// Stand-in application behind the limiter when the gateway runs
/// standalone. Deployments embed the middleware in front of their own
/// [`Downstream`] implementation instead.
struct AcceptedApp;

#[async_trait]
impl Downstream for AcceptedApp {
    async fn handle(&self, _req: hyper::Request<hyper::body::Incoming>) -> hyper::Response<BoxBody> {
        hyper::Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(
        server::bootstrap::BootstrapArgs {
            config_path: cli.config,
            listen: cli.listen,
            admin_listen: cli.admin_listen,
        },
        Arc::new(AcceptedApp),
    ))
}
