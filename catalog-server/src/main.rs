//! The `catalogd` binary.
//!
//! Loads settings, builds the server, and serves until SIGINT/SIGTERM.
//! Exit code 0 on a normal shutdown; any fatal init error (unreadable
//! settings, invalid config, store unreachable) exits non-zero before the
//! listener binds.

use clap::Parser;
use std::net::SocketAddr;
use catalog_server::config::Settings;
use catalog_server::server::create_app;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML settings file.
    #[arg(short, long, default_value = "catalogd.toml")]
    config: String,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging filter, e.g. `info` or `catalog_server=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut settings = if std::path::Path::new(&args.config).exists() {
        Settings::load(&args.config)?
    } else {
        tracing::warn!("settings file '{}' not found, using defaults", args.config);
        let mut settings = Settings::default();
        settings.apply_env_overrides()?;
        settings
    };
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.validate()?;

    let grace = settings.server.shutdown_grace;
    let addr = SocketAddr::new(settings.server.host.parse()?, settings.server.port);
    let (app, state) = create_app(settings).await?;

    tracing::info!("catalogd listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background loops and flush in-flight overlays within the grace
    // period; a hung plugin must not block process exit.
    if tokio::time::timeout(grace, state.shutdown()).await.is_err() {
        tracing::warn!("shutdown grace period elapsed, exiting anyway");
    }
    tracing::info!("catalogd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation failed");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
