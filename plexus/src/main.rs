#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use args::Args;
use clap::Parser;
use plexus_config::{SystemConfig, UserConfig};
use plexus_server::{Gateway, GatewayOptions};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing();

    // Load configuration; any failure here is an unrecoverable startup
    // error and exits nonzero
    let user = UserConfig::load(&args.config)?;
    let system = SystemConfig::load_or_builtin(args.system_config.as_deref())?;

    let options = GatewayOptions {
        artifact_path: Some(args.pipeline_table.clone()),
        config_path: Some(args.config.clone()),
        events: None,
        config_name: args
            .config
            .file_stem()
            .map_or_else(|| "plexus".to_owned(), |s| s.to_string_lossy().into_owned()),
    };

    let port = args.port.unwrap_or(user.server.port);
    let host = user.server.host.clone();

    let gateway = Gateway::new(&user, system, options)
        .map_err(|e| anyhow::anyhow!("configuration invalid:\n{e}"))?;

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {host}:{port}: {e}"))?;

    tracing::info!(
        config_path = %args.config.display(),
        %host,
        port,
        "starting plexus"
    );

    // Graceful shutdown on SIGINT/SIGTERM
    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_trigger.cancel();
    });

    plexus_server::serve(gateway, listener, shutdown).await?;

    tracing::info!("plexus stopped");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
