//! Facade the host application talks to.
//!
//! Wires the session store, re-authentication coordinator and pipeline over
//! one transport, and walks a session through its start-up order: sign in,
//! load, reconcile offline earnings, then start the scheduler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tapvault_core::sync::{
    reconcile_offline_earnings_with_grace, GameSnapshot, OfflineEarnings, Reconciliation,
    ReconciliationReceipt, SnapshotConsumer, SnapshotProvider,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::pipeline::AuthenticatedClient;
use crate::platform::PlatformLogin;
use crate::reauth::ReauthCoordinator;
use crate::scheduler::{SyncNotifier, SyncScheduler};
use crate::session::{Session, SessionStore};
use crate::storage::CredentialStorage;
use crate::transport::{HttpTransport, Transport};
use crate::types::RequestSpec;

/// Result of the initial load.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedGame {
    /// `None` for a player with no saved game.
    pub snapshot: Option<GameSnapshot>,
}

impl LoadedGame {
    pub fn last_update_time(&self) -> Option<&str> {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.last_update_time.as_deref())
    }
}

pub struct CloudSaveService {
    config: SyncConfig,
    session: Arc<SessionStore>,
    reauth: Arc<ReauthCoordinator>,
    client: Arc<AuthenticatedClient>,
    scheduler: Mutex<Option<SyncScheduler>>,
    settled: Mutex<Option<OfflineEarnings>>,
}

impl CloudSaveService {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn CredentialStorage>,
        platform: Arc<dyn PlatformLogin>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(
            Arc::clone(&transport),
            storage,
            config.read_timeout,
        ));
        let reauth = Arc::new(ReauthCoordinator::new(Arc::clone(&session), platform));
        let client = Arc::new(AuthenticatedClient::new(transport, Arc::clone(&reauth)));
        Self {
            config,
            session,
            reauth,
            client,
            scheduler: Mutex::new(None),
            settled: Mutex::new(None),
        }
    }

    /// Service over HTTP at `config.api_base_url`.
    pub fn with_http(
        config: SyncConfig,
        storage: Arc<dyn CredentialStorage>,
        platform: Arc<dyn PlatformLogin>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&config.api_base_url)?;
        Ok(Self::new(config, Arc::new(transport), storage, platform))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        self.session.session()
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    /// Restore a persisted credential, if there is one.
    pub fn restore_session(&self) -> Option<Session> {
        self.session.load_persisted().map(|_| self.session())
    }

    /// Sign in through the platform, replacing any current credential.
    pub async fn sign_in(&self) -> Result<Session> {
        let current = self.session.current_credential();
        self.reauth.reauthenticate(current.as_deref()).await?;
        Ok(self.session())
    }

    /// Sign in with an exchange code obtained out of band. A failed attempt
    /// keeps the current session.
    pub async fn sign_in_with_code(&self, code: &str) -> Result<Session> {
        self.reauth.sign_in_with_code(code).await?;
        Ok(self.session())
    }

    /// Use the credential in memory or on disk, signing in only if neither exists.
    pub async fn ensure_session(&self) -> Result<Session> {
        if self.session.current_credential().is_some() {
            return Ok(self.session());
        }
        if let Some(session) = self.restore_session() {
            debug!("[CloudSave] Using persisted session");
            return Ok(session);
        }
        self.sign_in().await
    }

    pub fn sign_out(&self) {
        self.session.clear();
        info!("[CloudSave] Signed out");
    }

    /// Load the saved game and hand it to `consumer`.
    ///
    /// Errors are returned as-is; the initial load is never retried here.
    /// Offline earnings must be settled again before a one-shot save.
    pub async fn load_game<C>(&self, consumer: &C) -> Result<LoadedGame>
    where
        C: SnapshotConsumer + ?Sized,
    {
        self.settled_slot().take();
        let data = self
            .client
            .request(&RequestSpec::load_user_data(self.config.read_timeout))
            .await?;
        let snapshot = GameSnapshot::from_server_data(&data)
            .map_err(|e| SyncError::malformed(format!("Invalid saved game: {}", e)))?;

        match &snapshot {
            Some(snapshot) => {
                consumer.apply_snapshot(snapshot);
                info!(
                    "[CloudSave] Loaded saved game (level {}, last update {})",
                    snapshot.player_info.player_level,
                    snapshot.last_update_time.as_deref().unwrap_or("unknown")
                );
            }
            None => info!("[CloudSave] No saved game on the server"),
        }
        Ok(LoadedGame { snapshot })
    }

    /// Compute offline earnings for the loaded game.
    pub fn reconcile_offline(
        &self,
        loaded: &LoadedGame,
        now: DateTime<Utc>,
        per_second_rate: f64,
    ) -> Reconciliation {
        reconcile_offline_earnings_with_grace(
            loaded.last_update_time(),
            now,
            per_second_rate,
            self.config.offline_grace,
        )
    }

    /// Record that offline earnings for the loaded game were accepted or
    /// discarded, allowing [`Self::save_game`] without a scheduler.
    pub fn settle_offline(&self, receipt: ReconciliationReceipt) {
        debug!(
            "[CloudSave] Offline earnings settled (amount {}, applied {})",
            receipt.earnings().amount,
            receipt.applied()
        );
        *self.settled_slot() = Some(receipt.earnings());
    }

    /// Build the scheduler for this session. Saves through the service go
    /// through it from now on.
    pub fn scheduler(
        &self,
        provider: Arc<dyn SnapshotProvider>,
        notifier: Arc<dyn SyncNotifier>,
        receipt: ReconciliationReceipt,
    ) -> SyncScheduler {
        *self.settled_slot() = Some(receipt.earnings());
        let scheduler = SyncScheduler::new(
            Arc::clone(&self.client),
            provider,
            notifier,
            &self.config,
            receipt,
        );
        *self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(scheduler.clone());
        scheduler
    }

    /// Save once, right now.
    ///
    /// With a scheduler built this is [`SyncScheduler::save_now`] and fails
    /// with [`SyncError::SaveInProgress`] while a timed save is in flight.
    /// Without one it is a single request with no retry, refused with
    /// [`SyncError::OfflineEarningsUnresolved`] until [`Self::settle_offline`].
    pub async fn save_game(&self, snapshot: &GameSnapshot) -> Result<()> {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(scheduler) = scheduler {
            return scheduler.save_now(snapshot.clone()).await;
        }

        if self.settled_slot().is_none() {
            warn!("[CloudSave] Save refused: offline earnings are not settled");
            return Err(SyncError::OfflineEarningsUnresolved);
        }

        let spec = RequestSpec::save_user_data(snapshot, self.config.save_timeout)?;
        self.client.request(&spec).await?;
        info!("[CloudSave] Game saved");
        Ok(())
    }

    fn settled_slot(&self) -> MutexGuard<'_, Option<OfflineEarnings>> {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
