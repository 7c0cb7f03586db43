use anyhow::{Context, Result};
use clap::Parser;
use fleet_remote::config::{resolve_config_path, Config};
use fleet_remote::{init_logging, FleetServer, FleetService, Shutdown};
use std::path::PathBuf;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "fleet-server", about = "Remote-control demo server")]
struct Cli {
    /// Config file (defaults to $FLEET_CONFIG, then ./config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fleet-server fatal error: {:?}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(resolve_config_path(cli.config))?;
    init_logging(&config.logging)?;

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_signal().await {
                Ok(()) => shutdown.trigger(),
                Err(e) => tracing::error!("signal handler failed: {}", e),
            }
        }
    });

    let service = FleetService::new(config.session.clone(), shutdown.clone());
    FleetServer::new(service, shutdown).serve(listener).await?;

    // Returning drops the runtime, which cuts any stream still running.
    tracing::info!("server stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
