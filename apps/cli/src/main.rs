mod cli;
mod host;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use tapvault_cloud_sync::{CloudSaveService, FileCredentialStorage, SyncConfig};
use tapvault_core::sync::Reconciliation;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::{Cli, Commands};
use crate::host::{EnvLoginCode, LogNotifier, OutgoingSnapshot, SnapshotFile, StdoutConsumer};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    run(cli).await
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
}

struct Host {
    service: CloudSaveService,
    session_file: PathBuf,
}

fn build_host(cli: &Cli) -> Result<Host> {
    let mut config = SyncConfig::from_env();
    if let Some(url) = cli.api_url.as_deref() {
        config = config
            .with_api_base_url(url)
            .context("invalid --api-url")?;
    }

    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => dirs::data_dir()
            .map(|dir| dir.join("tapvault"))
            .context("no platform data directory; pass --data-dir")?,
    };
    let storage = FileCredentialStorage::in_dir(&data_dir);
    let session_file = storage.path().to_path_buf();

    let service = CloudSaveService::with_http(config, Arc::new(storage), Arc::new(EnvLoginCode))
        .context("failed to set up the game API client")?;
    Ok(Host {
        service,
        session_file,
    })
}

async fn run(cli: Cli) -> Result<()> {
    let host = build_host(&cli)?;
    let service = &host.service;

    match cli.command {
        Commands::Status => {
            service.restore_session();
            let session = service.session();
            let status = serde_json::json!({
                "apiBaseUrl": service.config().api_base_url,
                "sessionFile": host.session_file.display().to_string(),
                "state": session.state,
                "signedIn": session.credential.is_some(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Login { code } => {
            let session = match code {
                Some(code) => service.sign_in_with_code(&code).await,
                None => service.sign_in().await,
            }
            .context("sign-in failed")?;
            info!(state = ?session.state, "Signed in");
            println!("Signed in. Session saved to {}", host.session_file.display());
        }
        Commands::Logout => {
            service.sign_out();
            println!("Signed out");
        }
        Commands::Pull { out, rate } => {
            service.ensure_session().await.context("sign-in failed")?;
            let loaded = match out.as_ref() {
                Some(path) => service.load_game(&SnapshotFile::new(path)).await,
                None => service.load_game(&StdoutConsumer).await,
            }
            .context("failed to load the saved game")?;

            if loaded.snapshot.is_none() {
                println!("No saved game on the server");
            }
            // Read-only: the reward is reported, never credited.
            match service.reconcile_offline(&loaded, Utc::now(), rate) {
                Reconciliation::Pending(pending) => {
                    println!(
                        "Offline earnings available: {} over {}s",
                        pending.amount(),
                        pending.elapsed_secs()
                    );
                    let _ = pending.discard();
                }
                Reconciliation::Settled(_) => println!("No offline earnings"),
            }
        }
        Commands::Push {
            file,
            rate,
            accept_offline,
        } => {
            let outgoing = OutgoingSnapshot::new(SnapshotFile::new(&file).read()?);
            service.ensure_session().await.context("sign-in failed")?;
            let loaded = service
                .load_game(&outgoing)
                .await
                .context("failed to load the saved game")?;

            let receipt = match service
                .reconcile_offline(&loaded, Utc::now(), rate)
                .into_receipt()
            {
                Ok(receipt) => receipt,
                Err(pending) if accept_offline => pending.accept(&outgoing),
                Err(pending) => {
                    info!(amount = pending.amount(), "Discarding offline earnings");
                    pending.discard()
                }
            };
            service.settle_offline(receipt);

            service
                .save_game(&outgoing.into_snapshot())
                .await
                .context("failed to save the game")?;
            println!("Saved {}", file.display());
        }
        Commands::Watch {
            file,
            rate,
            accept_offline,
        } => watch(service, file, rate, accept_offline).await?,
    }
    Ok(())
}

async fn watch(
    service: &CloudSaveService,
    file: PathBuf,
    rate: f64,
    accept_offline: bool,
) -> Result<()> {
    let game = Arc::new(SnapshotFile::new(file));
    service.ensure_session().await.context("sign-in failed")?;
    let loaded = service
        .load_game(game.as_ref())
        .await
        .context("failed to load the saved game")?;

    let receipt = match service
        .reconcile_offline(&loaded, Utc::now(), rate)
        .into_receipt()
    {
        Ok(receipt) => receipt,
        Err(pending) if accept_offline => pending.accept(game.as_ref()),
        Err(pending) => {
            info!(amount = pending.amount(), "Discarding offline earnings");
            pending.discard()
        }
    };

    let scheduler = service.scheduler(game.clone(), Arc::new(LogNotifier), receipt);
    scheduler.start().await;
    info!(
        "Watching {}; press Ctrl-C to stop",
        game.path().display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    scheduler.stop().await;

    let status = scheduler.status();
    info!(
        state = ?status.state,
        failures = status.consecutive_failures,
        "Stopped"
    );
    Ok(())
}
