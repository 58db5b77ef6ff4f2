use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shunt_proxy::config::Config;
use shunt_proxy::proxy::create_http_client;
use shunt_proxy::server::{spawn_health_probes, HttpServer};
use shunt_proxy::socks::SocksServer;
use shunt_proxy::state::EngineState;

#[derive(Parser, Debug)]
#[command(
    name = "shunt-proxy",
    about = "Configurable HTTP request-interception engine with a SOCKS5 overlay proxy"
)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, env = "SHUNT_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    let socks_configured = config.socks.is_some();
    let state = EngineState::new(config);
    let client = create_http_client(&state.config().connection_pool);

    // Health probes are observability; their handles just keep them alive.
    let _health = spawn_health_probes(&state, &client);

    let http = HttpServer::new(state.clone(), client.clone());
    let mut http_task = tokio::spawn(http.run());

    let mut socks_task = if socks_configured {
        let socks = SocksServer::new(state.clone(), client.clone());
        tokio::spawn(socks.run())
    } else {
        tokio::spawn(std::future::pending::<Result<(), anyhow::Error>>())
    };

    info!("engine started");

    tokio::select! {
        result = &mut http_task => {
            result??;
        }
        result = &mut socks_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
