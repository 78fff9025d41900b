use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use event_relay::{
    RelayConfig, RpcSourceClient,
    admin::{self, AdminState},
    config::AbiCache,
    sink::ChannelDirectory,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version, about)]
struct Args {
    /// Relay configuration file.
    #[clap(env = "EVENT_RELAY_CONFIG", long, short, default_value = "relay.toml")]
    config: PathBuf,
    /// `.env` file loaded before the configuration is rendered.
    #[clap(env = "EVENT_RELAY_ENV", long)]
    env_file: Option<PathBuf>,
}

fn init_logging(config: &RelayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&config);
    info!(name = %config.relay.name, version = env!("CARGO_PKG_VERSION"), "Starting relay");

    let base = args.config.parent().map(PathBuf::from).unwrap_or_default();
    let catalog = config.catalog(&mut AbiCache::new(base))?;
    if catalog.is_empty() {
        bail!("no contracts configured");
    }

    let endpoints = config.endpoint_table()?;
    let client = RpcSourceClient::connect(&endpoints, |builder| config.configure_provider(builder))
        .await
        .context("connecting to RPC endpoints")?;

    let relay = config.relay_builder().build(client, catalog.sources())?;

    let discord = config.discord_directory();
    let directory = discord.as_ref().map(|discord| discord as &dyn ChannelDirectory);
    let disabled = config.register_sinks(relay.router(), &catalog, directory).await?;
    for err in &disabled {
        warn!(error = %err, "Sink disabled");
    }
    if relay.router().subscriptions().is_empty() {
        warn!("No sink is subscribed; events will only be logged");
    }

    let handle = relay.start().await.context("starting relay")?;

    if let Some(admin_config) = &config.admin {
        let listener = tokio::net::TcpListener::bind(admin_config.listen)
            .await
            .with_context(|| format!("binding admin server to {}", admin_config.listen))?;
        let state = AdminState::new(handle.reporter().clone(), handle.router().clone());
        let app = admin::routes(state);
        info!(listen = %admin_config.listen, "Admin server listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(error = %err, "Admin server stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    handle.shutdown().await;

    let status = handle.status();
    info!(
        events_processed = status.events_processed(),
        delivered = status.delivery.delivered,
        failed = status.delivery.failed,
        uptime = %status.uptime,
        "Relay exited"
    );
    Ok(())
}
