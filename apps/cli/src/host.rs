//! Host-side adapters: platform login, UI hooks and a snapshot file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tapvault_cloud_sync::{PlatformLogin, SyncError, SyncNotifier};
use tapvault_core::sync::{GameSnapshot, SnapshotConsumer, SnapshotProvider};
use tracing::{error, info, warn};

pub const LOGIN_CODE_ENV: &str = "TAPVAULT_LOGIN_CODE";

/// Platform login that reads a one-time code from `TAPVAULT_LOGIN_CODE`.
pub struct EnvLoginCode;

#[async_trait]
impl PlatformLogin for EnvLoginCode {
    async fn obtain_exchange_code(&self) -> tapvault_cloud_sync::Result<String> {
        std::env::var(LOGIN_CODE_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SyncError::exchange_failed(format!(
                    "{} is not set. Sign in with `tapvault login --code <code>`.",
                    LOGIN_CODE_ENV
                ))
            })
    }
}

pub struct LogNotifier;

impl SyncNotifier for LogNotifier {
    fn on_circuit_open(&self) {
        error!("Network error: cloud saves are paused after repeated failures");
    }

    fn on_retry_state_changed(&self, label: &str, enabled: bool) {
        info!(label, enabled, "Retry control changed");
    }

    fn on_circuit_closed(&self) {
        info!("Cloud saves are back to normal");
    }
}

/// Game state kept in a JSON file, standing in for a running game.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<GameSnapshot> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a game snapshot", self.path.display()))
    }

    pub fn write(&self, snapshot: &GameSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let encoded = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&self.path, encoded)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn credit(&self, amount: u64) -> Result<()> {
        let mut snapshot = self.read().unwrap_or_default();
        snapshot.player_info.money += amount as f64;
        self.write(&snapshot)
    }
}

impl SnapshotProvider for SnapshotFile {
    fn snapshot(&self) -> Option<GameSnapshot> {
        match self.read() {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("Skipping save: {:#}", err);
                None
            }
        }
    }
}

impl SnapshotConsumer for SnapshotFile {
    fn apply_snapshot(&self, snapshot: &GameSnapshot) {
        if let Err(err) = self.write(snapshot) {
            error!("Failed to apply loaded game: {:#}", err);
        }
    }

    fn apply_offline_reward(&self, amount: u64) {
        match self.credit(amount) {
            Ok(()) => info!(amount, "Offline earnings credited"),
            Err(err) => error!("Failed to credit offline earnings: {:#}", err),
        }
    }
}

/// Prints a loaded game instead of applying it.
pub struct StdoutConsumer;

impl SnapshotConsumer for StdoutConsumer {
    fn apply_snapshot(&self, snapshot: &GameSnapshot) {
        match serde_json::to_string_pretty(snapshot) {
            Ok(json) => println!("{}", json),
            Err(err) => error!("Failed to render snapshot: {}", err),
        }
    }

    fn apply_offline_reward(&self, amount: u64) {
        println!("Offline earnings: {}", amount);
    }
}

/// A local snapshot about to be pushed. The server copy is ignored, and an
/// accepted reward is added to the local money.
pub struct OutgoingSnapshot {
    snapshot: Mutex<GameSnapshot>,
}

impl OutgoingSnapshot {
    pub fn new(snapshot: GameSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn into_snapshot(self) -> GameSnapshot {
        self.snapshot
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotConsumer for OutgoingSnapshot {
    fn apply_snapshot(&self, _snapshot: &GameSnapshot) {}

    fn apply_offline_reward(&self, amount: u64) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.player_info.money += amount as f64;
        info!(amount, "Offline earnings added to the pushed snapshot");
    }
}
