//! Session store: the server-issued credential, its identity and persistence.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError, TransportError};
use crate::storage::{CredentialStorage, CREDENTIAL_KEY};
use crate::transport::Transport;
use crate::types::{ApiEnvelope, LoginData, RequestSpec, TransportRequest};

/// Identity used while no credential is held.
pub const ANONYMOUS_USER_ID: &str = "default_user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub user_id: String,
    pub state: SessionState,
}

#[derive(Debug)]
struct SessionInner {
    credential: Option<String>,
    user_id: String,
    state: SessionState,
}

impl SessionInner {
    fn anonymous() -> Self {
        Self {
            credential: None,
            user_id: ANONYMOUS_USER_ID.to_string(),
            state: SessionState::Unauthenticated,
        }
    }
}

/// Shorten a credential for logs.
pub(crate) fn redact(credential: &str) -> String {
    let prefix: String = credential.chars().take(6).collect();
    format!("{}…", prefix)
}

/// Owns the session credential.
///
/// Only this store and the re-authentication coordinator write the
/// credential; everything else reads it through [`SessionStore::current_credential`].
pub struct SessionStore {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn CredentialStorage>,
    auth_timeout: Duration,
    inner: RwLock<SessionInner>,
}

impl SessionStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn CredentialStorage>,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            storage,
            auth_timeout,
            inner: RwLock::new(SessionInner::anonymous()),
        }
    }

    pub fn current_credential(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credential
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn session(&self) -> Session {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Session {
            credential: inner.credential.clone(),
            user_id: inner.user_id.clone(),
            state: inner.state,
        }
    }

    /// Exchange a platform-issued code for a session credential.
    ///
    /// Talks to the transport directly: the login call must never go through
    /// the authenticated pipeline, which would recurse into re-authentication.
    /// A failed exchange leaves any credential already held in place.
    pub async fn exchange_credential(&self, exchange_token: &str) -> Result<Session> {
        self.set_state(SessionState::Authenticating);
        debug!("[Session] Exchanging platform code for a credential");

        let spec = RequestSpec::login(exchange_token, self.auth_timeout);
        let outcome = self
            .transport
            .send(TransportRequest::from_spec(&spec, None))
            .await;

        match Self::parse_login(outcome) {
            Ok(credential) => {
                info!("[Session] Signed in as {}", redact(&credential));
                self.install(&credential);
                self.persist(&credential);
                Ok(self.session())
            }
            Err(err) => {
                warn!("[Session] Credential exchange failed: {}", err);
                self.abandon_exchange();
                Err(err)
            }
        }
    }

    /// Restore a previously persisted credential. Storage failures are
    /// treated as "no credential".
    pub fn load_persisted(&self) -> Option<String> {
        let credential = match self.storage.get_secret(CREDENTIAL_KEY) {
            Ok(Some(value)) if !value.trim().is_empty() => value,
            Ok(_) => {
                debug!("[Session] No persisted credential");
                return None;
            }
            Err(err) => {
                warn!("[Session] Failed to read persisted credential: {}", err);
                return None;
            }
        };

        debug!("[Session] Restored credential {}", redact(&credential));
        self.install(&credential);
        Some(credential)
    }

    /// Wipe the in-memory and persisted credential.
    pub fn clear(&self) {
        self.reset_in_memory();
        if let Err(err) = self.storage.delete_secret(CREDENTIAL_KEY) {
            warn!("[Session] Failed to remove persisted credential: {}", err);
        }
        debug!("[Session] Session cleared");
    }

    /// Clear only if `credential` is still the one in use.
    pub(crate) fn clear_if_current(&self, credential: &str) {
        if self.current_credential().as_deref() == Some(credential) {
            self.clear();
        }
    }

    fn install(&self, credential: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.credential = Some(credential.to_string());
        inner.user_id = credential.to_string();
        inner.state = SessionState::Authenticated;
    }

    fn persist(&self, credential: &str) {
        if let Err(err) = self.storage.set_secret(CREDENTIAL_KEY, credential) {
            warn!(
                "[Session] Failed to persist credential; keeping it in memory only: {}",
                err
            );
        }
    }

    fn reset_in_memory(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = SessionInner::anonymous();
    }

    fn abandon_exchange(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.state = if inner.credential.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
    }

    fn set_state(&self, state: SessionState) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    fn parse_login(
        outcome: std::result::Result<serde_json::Value, TransportError>,
    ) -> Result<String> {
        let body = match outcome {
            Ok(body) => body,
            Err(TransportError::Status { status, body }) => {
                let message = body
                    .as_ref()
                    .and_then(ApiEnvelope::from_value)
                    .map(|envelope| envelope.message_or_default())
                    .unwrap_or_else(|| format!("HTTP status {}", status));
                return Err(SyncError::exchange_failed(message));
            }
            Err(err) => return Err(SyncError::exchange_failed(err.to_string())),
        };

        let envelope = ApiEnvelope::from_value(&body)
            .ok_or_else(|| SyncError::exchange_failed("login response has no code envelope"))?;
        if !envelope.is_ok() {
            return Err(SyncError::exchange_failed(envelope.message_or_default()));
        }

        let data: LoginData = serde_json::from_value(envelope.data)
            .map_err(|_| SyncError::exchange_failed("login response did not include a token"))?;
        if data.token.trim().is_empty() {
            return Err(SyncError::exchange_failed(
                "login response included an empty token",
            ));
        }
        Ok(data.token)
    }
}
