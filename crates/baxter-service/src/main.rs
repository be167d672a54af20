use std::path::PathBuf;

use anyhow::{Context, Result};
use baxter_core::config::Config;
use baxter_core::passphrase::PassphraseProvider;
use baxter_core::paths::StatePaths;
use baxter_service::{auth, http, Supervisor};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Baxter backup daemon", long_about = None)]
struct Cli {
    /// Path to config.toml. Defaults to the per-user state directory's copy.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind the control plane to a non-loopback address. Requires an auth
    /// token, supplied via `--token` or `BAXTER_IPC_TOKEN`.
    #[arg(long = "allow-remote-ipc")]
    allow_remote_ipc: bool,

    /// Auth token for the control plane; repeatable. Overrides
    /// `BAXTER_IPC_TOKEN` and the config file's `server.tokens`.
    #[arg(long)]
    token: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let paths = StatePaths::resolve().context("resolve state directory")?;
    paths.ensure_dirs().context("create state directories")?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_path());

    let mut config = Config::load(&config_path).context("load config")?;
    if cli.allow_remote_ipc {
        config.server.allow_remote = true;
    }
    if !cli.token.is_empty() {
        config.server.tokens = cli.token.clone();
    } else if config.server.allow_remote && config.server.tokens.is_empty() {
        if let Ok(env_tokens) = std::env::var("BAXTER_IPC_TOKEN") {
            config.server.tokens = env_tokens.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }
    config.save(&config_path).context("persist normalized config")?;

    let passphrase = PassphraseProvider::new(
        config.encryption.keychain_service.clone(),
        config.encryption.keychain_account.clone(),
    )
    .resolve()
    .context("resolve backup passphrase")?;

    let bind_addr = auth::resolve_bind_addr(&config.server).map_err(anyhow::Error::msg)?;

    let supervisor = Supervisor::new(paths, config, config_path, passphrase);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind control-plane listener on {bind_addr}"))?;
    info!(%bind_addr, "control plane listening");
    let app = http::router(supervisor.clone());
    let mut http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "control plane server exited with error");
        }
    });

    let backup_task = tokio::spawn(supervisor.clone().run_backup_scheduler(shutdown_rx.clone()));
    let verify_task = tokio::spawn(supervisor.clone().run_verify_scheduler(shutdown_rx.clone()));

    info!("baxter service started");
    signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("shutdown requested, draining");

    let _ = shutdown_tx.send(true);
    let drain = tokio::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(drain, async {
        let _ = backup_task.await;
        let _ = verify_task.await;
        let _ = http_task.await;
    })
    .await;

    info!("baxter service stopped");
    Ok(())
}
