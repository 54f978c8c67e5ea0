//! Periodic cloud save driver.
//!
//! Drives a [`SaveMachine`] from a fixed-cadence timer: each tick either
//! starts one save, folds into the save already in flight, or does nothing
//! while the circuit is open. Save results flow back into the machine and
//! out to the UI through [`SyncNotifier`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tapvault_core::sync::{
    GameSnapshot, OfflineEarnings, ReconciliationReceipt, SaveMachine, SaveOutcome, SaveStatus,
    SnapshotProvider, TickDecision,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::pipeline::AuthenticatedClient;
use crate::types::RequestSpec;

/// Label of the manual retry control while the circuit is open.
pub const RETRY_LABEL: &str = "Retry";

/// Label of the manual retry control while a retry is running.
pub const RETRYING_LABEL: &str = "Retrying...";

/// UI hooks. Fire-and-forget; called outside any scheduler lock.
pub trait SyncNotifier: Send + Sync {
    fn on_circuit_open(&self);
    fn on_retry_state_changed(&self, label: &str, enabled: bool);
    fn on_circuit_closed(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl SyncNotifier for NoopNotifier {
    fn on_circuit_open(&self) {}
    fn on_retry_state_changed(&self, _label: &str, _enabled: bool) {}
    fn on_circuit_closed(&self) {}
}

type SaveReply = oneshot::Sender<Result<()>>;

struct SchedulerInner {
    client: Arc<AuthenticatedClient>,
    provider: Arc<dyn SnapshotProvider>,
    notifier: Arc<dyn SyncNotifier>,
    save_interval: Duration,
    save_timeout: Duration,
    receipt: ReconciliationReceipt,
    machine: Mutex<SaveMachine>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    background: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerInner {
    fn machine(&self) -> MutexGuard<'_, SaveMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, payload: &GameSnapshot) -> Result<()> {
        let spec = RequestSpec::save_user_data(payload, self.save_timeout)?;
        self.client.request(&spec).await.map(|_| ())
    }

    fn finish(&self, result: &Result<()>) {
        match result {
            Ok(()) => {
                let outcome = self.machine().on_save_result(true);
                if let SaveOutcome::Saved {
                    recovered,
                    coalesced_ticks,
                } = outcome
                {
                    debug!(
                        "[Scheduler] Save landed ({} ticks coalesced)",
                        coalesced_ticks
                    );
                    if recovered {
                        info!("[Scheduler] Saves recovered");
                        self.notifier.on_circuit_closed();
                    }
                }
            }
            Err(err) if !err.counts_toward_circuit() => {
                self.machine().on_save_deferred();
                debug!("[Scheduler] Save deferred: {}", err);
            }
            Err(err) => {
                let outcome = self.machine().on_save_result(false);
                match outcome {
                    SaveOutcome::RetryScheduled {
                        consecutive_failures,
                    } => warn!(
                        "[Scheduler] Save failed ({} in a row), retrying on next tick: {}",
                        consecutive_failures, err
                    ),
                    SaveOutcome::CircuitOpened {
                        consecutive_failures,
                    } => {
                        error!(
                            "[Scheduler] Save failed {} times in a row, pausing saves: {}",
                            consecutive_failures, err
                        );
                        self.notifier.on_circuit_open();
                        self.notifier.on_retry_state_changed(RETRY_LABEL, true);
                    }
                    SaveOutcome::Saved { .. } | SaveOutcome::Ignored => {}
                }
            }
        }
    }
}

/// Handle to the periodic save loop. Cheap to clone.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    /// Build a scheduler. The receipt proves offline earnings were settled.
    pub fn new(
        client: Arc<AuthenticatedClient>,
        provider: Arc<dyn SnapshotProvider>,
        notifier: Arc<dyn SyncNotifier>,
        config: &SyncConfig,
        receipt: ReconciliationReceipt,
    ) -> Self {
        debug!(
            "[Scheduler] Offline earnings settled (amount={}, applied={})",
            receipt.earnings().amount,
            receipt.applied()
        );
        Self {
            inner: Arc::new(SchedulerInner {
                client,
                provider,
                notifier,
                save_interval: config.save_interval.max(Duration::from_millis(1)),
                save_timeout: config.save_timeout,
                receipt,
                machine: Mutex::new(SaveMachine::new(config.circuit_breaker_threshold)),
                in_flight: Mutex::new(None),
                background: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.inner.machine().status()
    }

    pub fn offline_earnings(&self) -> OfflineEarnings {
        self.inner.receipt.earnings()
    }

    /// Run one scheduler tick. Must be called inside a tokio runtime.
    pub fn tick(&self) -> TickDecision {
        let decision = {
            let mut machine = self.inner.machine();
            machine.on_tick(|| self.inner.provider.snapshot())
        };
        match &decision {
            TickDecision::Dispatch { payload, is_retry } => {
                debug!("[Scheduler] Dispatching save (retry={})", is_retry);
                self.spawn_save(payload.clone(), None);
            }
            TickDecision::Coalesced => debug!("[Scheduler] Save in flight, tick coalesced"),
            TickDecision::NotReady | TickDecision::CircuitOpen => {}
        }
        decision
    }

    /// Close an open circuit and immediately attempt a fresh save.
    ///
    /// Returns `false` when the circuit was not open.
    pub fn retry_now(&self) -> bool {
        if !self.inner.machine().reset() {
            debug!("[Scheduler] Manual retry ignored: circuit is not open");
            return false;
        }
        info!("[Scheduler] Manual retry requested");
        self.inner
            .notifier
            .on_retry_state_changed(RETRYING_LABEL, false);
        self.tick();
        true
    }

    /// Save `snapshot` right away, outside the timer.
    ///
    /// Fails with [`SyncError::SaveInProgress`] while a save is in flight. An
    /// open circuit is closed first, as with [`Self::retry_now`]. The result
    /// is also applied to the breaker like any timed save.
    pub async fn save_now(&self, snapshot: GameSnapshot) -> Result<()> {
        let was_open = {
            let mut machine = self.inner.machine();
            let was_open = machine.reset();
            if !machine.begin_manual(snapshot.clone()) {
                return Err(SyncError::SaveInProgress);
            }
            was_open
        };
        if was_open {
            self.inner
                .notifier
                .on_retry_state_changed(RETRYING_LABEL, false);
        }

        let (reply, outcome) = oneshot::channel();
        self.spawn_save(snapshot, Some(reply));
        outcome
            .await
            .unwrap_or_else(|_| Err(SyncError::Transport("save task was cancelled".to_string())))
    }

    /// Start the timer. Calling it while already running does nothing.
    pub async fn start(&self) {
        let mut background = self.inner.background.lock().await;
        if let Some(handle) = background.as_ref() {
            if !handle.is_finished() {
                debug!("[Scheduler] Already running");
                return;
            }
            background.take();
        }

        let period = self.inner.save_interval;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncScheduler { inner }.tick();
            }
        });
        *background = Some(handle);
        info!("[Scheduler] Started, saving every {}ms", period.as_millis());
    }

    /// Stop the timer and wait for the in-flight save, if any.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.background.lock().await.take() {
            handle.abort();
            info!("[Scheduler] Stopped");
        }
        self.settle().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .background
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the in-flight save to finish.
    pub async fn settle(&self) {
        let handle = self.inner.in_flight().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("[Scheduler] Save task ended abnormally: {}", err);
            }
        }
    }

    fn spawn_save(&self, payload: GameSnapshot, reply: Option<SaveReply>) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = inner.send(&payload).await;
            inner.finish(&result);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
        *self.inner.in_flight() = Some(handle);
    }

    #[cfg(test)]
    fn state(&self) -> tapvault_core::sync::SaveState {
        self.inner.machine().state()
    }
}
