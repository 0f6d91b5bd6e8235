use clap::Parser;
use torusdb_core::Settings;
use torusdb_gateway::run_server;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "torusdb-gateway")]
#[command(about = "TorusDB front door: routing, replication, resharding", long_about = None)]
#[command(version)]
struct Cli {
    /// Bind address for the HTTP listener
    #[arg(long)]
    listen: Option<String>,

    /// Coordination service endpoints (comma separated)
    #[arg(long, env = "TORUSDB_ETCD_ENDPOINTS", value_delimiter = ',')]
    etcd_endpoints: Vec<String>,

    /// Base path for coordination records
    #[arg(long)]
    base_path: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let mut settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };
    if let Some(listen) = cli.listen {
        settings.gateway.listen_addr = listen;
    }
    if !cli.etcd_endpoints.is_empty() {
        settings.coordination.endpoints = cli.etcd_endpoints;
    }
    if let Some(base_path) = cli.base_path {
        settings.coordination.base_path = base_path;
    }

    if let Err(err) = run_server(settings).await {
        tracing::error!(error = %err, "gateway terminated with error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
