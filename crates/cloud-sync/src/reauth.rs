//! Single-flight re-authentication.
//!
//! However many requests see their credential rejected at the same time, at
//! most one credential exchange runs. The first caller leads the exchange;
//! everyone arriving while it runs waits for its outcome and gets the same
//! result, in arrival order. An explicit sign-in with a code takes the same
//! slot, so it never overlaps a re-authentication.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::error::{Result, SyncError};
use crate::platform::PlatformLogin;
use crate::session::{redact, SessionStore};

type Waiter = oneshot::Sender<Result<String>>;

#[derive(Default)]
struct ReauthState {
    in_progress: bool,
    waiters: Vec<Waiter>,
    exchanges_started: u64,
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Result<String>>),
    Refreshed(String),
}

pub struct ReauthCoordinator {
    session: Arc<SessionStore>,
    platform: Arc<dyn PlatformLogin>,
    state: Mutex<ReauthState>,
}

impl ReauthCoordinator {
    pub fn new(session: Arc<SessionStore>, platform: Arc<dyn PlatformLogin>) -> Self {
        Self {
            session,
            platform,
            state: Mutex::new(ReauthState::default()),
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn in_progress(&self) -> bool {
        self.lock().in_progress
    }

    pub fn pending_waiters(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of credential exchanges led since construction.
    pub fn exchanges_started(&self) -> u64 {
        self.lock().exchanges_started
    }

    /// Obtain a fresh credential to replace `stale`.
    ///
    /// If another task already replaced `stale`, the current credential is
    /// returned without a new exchange.
    pub async fn reauthenticate(&self, stale: Option<&str>) -> Result<String> {
        let role = {
            let mut state = self.lock();
            if state.in_progress {
                Role::Follower(Self::enqueue(&mut state))
            } else {
                match self.session.current_credential() {
                    Some(current) if Some(current.as_str()) != stale => Role::Refreshed(current),
                    _ => {
                        state.in_progress = true;
                        state.exchanges_started += 1;
                        Role::Leader
                    }
                }
            }
        };

        match role {
            Role::Refreshed(credential) => {
                debug!(
                    "[Reauth] Credential already refreshed to {}",
                    redact(&credential)
                );
                Ok(credential)
            }
            Role::Follower(receiver) => Self::wait(receiver).await,
            Role::Leader => {
                info!("[Reauth] Credential rejected, starting re-authentication");
                self.lead(self.platform_exchange()).await
            }
        }
    }

    /// Exchange a code obtained out of band for a credential.
    ///
    /// Waits for any exchange already running, then leads its own. Callers
    /// queued behind it receive its outcome. On failure the credential held
    /// before the call stays in place.
    pub async fn sign_in_with_code(&self, code: &str) -> Result<String> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SyncError::exchange_failed("exchange code is empty"));
        }

        loop {
            let receiver = {
                let mut state = self.lock();
                if state.in_progress {
                    Self::enqueue(&mut state)
                } else {
                    state.in_progress = true;
                    state.exchanges_started += 1;
                    break;
                }
            };
            // The running exchange's outcome belongs to its own callers.
            let _ = Self::wait(receiver).await;
        }

        info!("[Reauth] Signing in with an exchange code");
        self.lead(self.code_exchange(code)).await
    }

    /// Wait for an exchange that is already running, if any.
    pub async fn join_in_flight(&self) -> Option<Result<String>> {
        let receiver = {
            let mut state = self.lock();
            if !state.in_progress {
                return None;
            }
            Self::enqueue(&mut state)
        };
        Some(Self::wait(receiver).await)
    }

    async fn lead<F>(&self, exchange: F) -> Result<String>
    where
        F: Future<Output = Result<String>>,
    {
        let mut flight = InFlight {
            coordinator: self,
            outcome: None,
        };

        let outcome = exchange.await;
        match &outcome {
            Ok(credential) => info!("[Reauth] Re-authenticated as {}", redact(credential)),
            Err(err) => warn!("[Reauth] Re-authentication failed: {}", err),
        }
        flight.outcome = Some(outcome.clone());
        outcome
    }

    async fn platform_exchange(&self) -> Result<String> {
        self.session.clear();
        let code = self
            .platform
            .obtain_exchange_code()
            .await
            .map_err(|err| match err {
                SyncError::AuthExchangeFailed(_) => err,
                other => SyncError::exchange_failed(other.to_string()),
            })?;
        self.code_exchange(&code).await
    }

    async fn code_exchange(&self, code: &str) -> Result<String> {
        self.session
            .exchange_credential(code)
            .await?
            .credential
            .ok_or_else(|| SyncError::exchange_failed("exchange installed no credential"))
    }

    fn enqueue(state: &mut ReauthState) -> oneshot::Receiver<Result<String>> {
        let (sender, receiver) = oneshot::channel();
        state.waiters.push(sender);
        debug!("[Reauth] Waiting on re-authentication ({} queued)", state.waiters.len());
        receiver
    }

    async fn wait(receiver: oneshot::Receiver<Result<String>>) -> Result<String> {
        receiver.await.unwrap_or_else(|_| {
            Err(SyncError::exchange_failed(
                "re-authentication was abandoned",
            ))
        })
    }

    fn lock(&self) -> MutexGuard<'_, ReauthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the single-flight slot and settles every waiter when the leader
/// finishes, fails or is dropped mid-exchange.
struct InFlight<'a> {
    coordinator: &'a ReauthCoordinator,
    outcome: Option<Result<String>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.coordinator.lock();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };
        let outcome = self.outcome.take().unwrap_or_else(|| {
            warn!("[Reauth] Re-authentication was cancelled");
            Err(SyncError::exchange_failed("re-authentication was cancelled"))
        });
        if !waiters.is_empty() {
            debug!("[Reauth] Releasing {} waiters", waiters.len());
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::storage::{CredentialStorage, MemoryCredentialStorage, CREDENTIAL_KEY};
    use crate::test_support::{
        login_ok, server_error, FakePlatform, Gate, ScriptedTransport, Step,
    };
    use crate::types::{TransportRequest, LOGIN_PATH};

    fn coordinator(
        transport: Arc<ScriptedTransport>,
        platform: Arc<FakePlatform>,
    ) -> Arc<ReauthCoordinator> {
        coordinator_with(transport, platform, Arc::new(MemoryCredentialStorage::new()))
    }

    fn coordinator_with(
        transport: Arc<ScriptedTransport>,
        platform: Arc<FakePlatform>,
        storage: Arc<MemoryCredentialStorage>,
    ) -> Arc<ReauthCoordinator> {
        let session = Arc::new(SessionStore::new(
            transport,
            storage,
            Duration::from_secs(10),
        ));
        Arc::new(ReauthCoordinator::new(session, platform))
    }

    fn login_code(request: &TransportRequest) -> String {
        request
            .body
            .as_ref()
            .and_then(|body| body.get("code"))
            .and_then(|code| code.as_str())
            .unwrap_or_default()
            .to_string()
    }

    async fn wait_for_waiters(coordinator: &ReauthCoordinator, count: usize) {
        for _ in 0..400 {
            if coordinator.pending_waiters() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} re-auth waiters", count);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_exchange() {
        let gate = Gate::new();
        let held = gate.clone();
        let transport = Arc::new(ScriptedTransport::new(move |_| {
            Step::after(&held, login_ok("tok-new"))
        }));
        let platform = Arc::new(FakePlatform::default());
        let coordinator = coordinator(transport.clone(), platform.clone());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reauthenticate(Some("tok-old")).await })
        };
        transport.wait_for_requests(LOGIN_PATH, 1).await;

        let followers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.reauthenticate(Some("tok-old")).await })
            })
            .collect();
        wait_for_waiters(&coordinator, 4).await;
        gate.release(1);

        assert_eq!(leader.await.expect("leader task"), Ok("tok-new".to_string()));
        for result in join_all(followers).await {
            assert_eq!(result.expect("follower task"), Ok("tok-new".to_string()));
        }
        assert_eq!(transport.login_count(), 1);
        assert_eq!(platform.calls(), 1);
        assert_eq!(coordinator.exchanges_started(), 1);
        assert!(!coordinator.in_progress());
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn failed_exchange_fails_every_waiter_and_clears_session() {
        let gate = Gate::new();
        let held = gate.clone();
        let transport = Arc::new(ScriptedTransport::new(move |_| {
            Step::after(
                &held,
                Ok(serde_json::json!({ "code": 500, "message": "code expired" })),
            )
        }));
        let coordinator = coordinator(transport.clone(), Arc::new(FakePlatform::default()));

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reauthenticate(None).await })
        };
        transport.wait_for_requests(LOGIN_PATH, 1).await;
        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.join_in_flight().await })
        };
        wait_for_waiters(&coordinator, 1).await;
        gate.release(1);

        let expected = Err(SyncError::exchange_failed("code expired"));
        assert_eq!(leader.await.expect("leader task"), expected);
        assert_eq!(follower.await.expect("follower task"), Some(expected));
        assert!(coordinator.session().current_credential().is_none());
    }

    #[tokio::test]
    async fn platform_failure_surfaces_as_exchange_failure() {
        let transport = Arc::new(ScriptedTransport::new(|_| Step::now(login_ok("unused"))));
        let coordinator = coordinator(transport.clone(), Arc::new(FakePlatform::failing()));

        let err = coordinator
            .reauthenticate(None)
            .await
            .expect_err("platform denied");

        assert!(matches!(err, SyncError::AuthExchangeFailed(_)));
        assert!(transport.requests().is_empty());
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn cancelled_leader_releases_waiters() {
        let gate = Gate::new();
        let held = gate.clone();
        let transport = Arc::new(ScriptedTransport::new(move |_| {
            Step::after(&held, login_ok("never"))
        }));
        let coordinator = coordinator(transport.clone(), Arc::new(FakePlatform::default()));

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reauthenticate(None).await })
        };
        transport.wait_for_requests(LOGIN_PATH, 1).await;
        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reauthenticate(None).await })
        };
        wait_for_waiters(&coordinator, 1).await;

        leader.abort();

        assert_eq!(
            follower.await.expect("follower task"),
            Err(SyncError::exchange_failed("re-authentication was cancelled"))
        );
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn already_replaced_credential_is_returned_without_exchange() {
        let transport = Arc::new(ScriptedTransport::new(|_| Step::now(login_ok("tok-2"))));
        let platform = Arc::new(FakePlatform::default());
        let coordinator = coordinator(transport.clone(), platform.clone());

        let first = coordinator.reauthenticate(Some("tok-1")).await;
        assert_eq!(first, Ok("tok-2".to_string()));

        // A late caller still holding tok-1 picks up tok-2.
        let late = coordinator.reauthenticate(Some("tok-1")).await;
        assert_eq!(late, Ok("tok-2".to_string()));
        assert_eq!(transport.login_count(), 1);
        assert_eq!(platform.calls(), 1);
    }

    #[tokio::test]
    async fn join_without_exchange_in_flight_returns_none() {
        let transport = Arc::new(ScriptedTransport::new(|_| Step::now(login_ok("tok"))));
        let coordinator = coordinator(transport, Arc::new(FakePlatform::default()));

        assert!(coordinator.join_in_flight().await.is_none());
    }

    #[tokio::test]
    async fn code_sign_in_waits_for_running_exchange() {
        let gate = Gate::new();
        let held = gate.clone();
        let transport = Arc::new(ScriptedTransport::new(move |request: &TransportRequest| {
            if login_code(request) == "manual-code" {
                Step::after(&held, login_ok("tok-manual"))
            } else {
                Step::after(&held, login_ok("tok-auto"))
            }
        }));
        let platform = Arc::new(FakePlatform::default());
        let coordinator = coordinator(transport.clone(), platform.clone());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reauthenticate(Some("tok-old")).await })
        };
        transport.wait_for_requests(LOGIN_PATH, 1).await;

        let manual = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sign_in_with_code(" manual-code ").await })
        };
        wait_for_waiters(&coordinator, 1).await;
        assert_eq!(transport.login_count(), 1);

        gate.release(1);
        assert_eq!(leader.await.expect("leader task"), Ok("tok-auto".to_string()));
        transport.wait_for_requests(LOGIN_PATH, 2).await;
        gate.release(1);

        assert_eq!(
            manual.await.expect("manual task"),
            Ok("tok-manual".to_string())
        );
        let codes: Vec<String> = transport
            .requests_to(LOGIN_PATH)
            .iter()
            .map(login_code)
            .collect();
        assert_eq!(codes[1], "manual-code");
        assert_eq!(platform.calls(), 1);
        assert_eq!(coordinator.exchanges_started(), 2);
        assert_eq!(
            coordinator.session().current_credential().as_deref(),
            Some("tok-manual")
        );
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn failed_code_sign_in_keeps_current_session() {
        let storage = Arc::new(MemoryCredentialStorage::new());
        storage.set_secret(CREDENTIAL_KEY, "tok-1").expect("seed");
        let transport = Arc::new(ScriptedTransport::new(|_| Step::now(server_error())));
        let coordinator = coordinator_with(
            transport.clone(),
            Arc::new(FakePlatform::default()),
            storage.clone(),
        );
        coordinator.session().load_persisted().expect("restored");

        let err = coordinator
            .sign_in_with_code("stale-code")
            .await
            .expect_err("rejected");

        assert!(matches!(err, SyncError::AuthExchangeFailed(_)));
        assert_eq!(
            coordinator.session().current_credential().as_deref(),
            Some("tok-1")
        );
        assert_eq!(
            storage.get_secret(CREDENTIAL_KEY).expect("read").as_deref(),
            Some("tok-1")
        );
        assert!(!coordinator.in_progress());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_network() {
        let transport = Arc::new(ScriptedTransport::new(|_| Step::now(login_ok("unused"))));
        let coordinator = coordinator(transport.clone(), Arc::new(FakePlatform::default()));

        let err = coordinator.sign_in_with_code("   ").await.expect_err("empty");

        assert!(matches!(err, SyncError::AuthExchangeFailed(_)));
        assert!(transport.requests().is_empty());
        assert_eq!(coordinator.exchanges_started(), 0);
    }
}
