//! Authenticated request pipeline.
//!
//! Attaches the session credential to every business request, recognises a
//! rejected credential, re-authenticates through the single-flight
//! coordinator and replays the request once.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Result, SyncError, TransportError};
use crate::reauth::ReauthCoordinator;
use crate::session::SessionStore;
use crate::transport::Transport;
use crate::types::{ApiEnvelope, RequestSpec, TransportRequest, CODE_UNAUTHORIZED};

enum Attempt {
    Done(serde_json::Value),
    Unauthorized,
}

pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionStore>,
    reauth: Arc<ReauthCoordinator>,
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn Transport>, reauth: Arc<ReauthCoordinator>) -> Self {
        Self {
            transport,
            session: reauth.session().clone(),
            reauth,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn reauth(&self) -> &Arc<ReauthCoordinator> {
        &self.reauth
    }

    /// Send an authenticated request and return the envelope's `data`.
    pub async fn request(&self, spec: &RequestSpec) -> Result<serde_json::Value> {
        self.request_with(spec, false).await
    }

    /// Like [`Self::request`]; with `skip_auth` the request goes out without a
    /// credential and a 401 comes back as [`SyncError::AuthExpired`] with no
    /// re-authentication.
    pub async fn request_with(
        &self,
        spec: &RequestSpec,
        skip_auth: bool,
    ) -> Result<serde_json::Value> {
        if skip_auth {
            return match self.dispatch(spec, None).await? {
                Attempt::Done(data) => Ok(data),
                Attempt::Unauthorized => Err(SyncError::AuthExpired),
            };
        }

        let credential = match self.session.current_credential() {
            Some(credential) => credential,
            None => match self.reauth.join_in_flight().await {
                Some(outcome) => outcome?,
                None => {
                    debug!(
                        "[CloudSave] {} {} skipped: no credential",
                        spec.method.as_str(),
                        spec.path
                    );
                    return Err(SyncError::NoCredential);
                }
            },
        };

        if let Attempt::Done(data) = self.dispatch(spec, Some(&credential)).await? {
            return Ok(data);
        }

        info!(
            "[CloudSave] {} {} rejected the credential, re-authenticating",
            spec.method.as_str(),
            spec.path
        );
        let fresh = self.reauth.reauthenticate(Some(&credential)).await?;

        match self.dispatch(spec, Some(&fresh)).await? {
            Attempt::Done(data) => Ok(data),
            Attempt::Unauthorized => {
                warn!(
                    "[CloudSave] {} {} rejected the fresh credential",
                    spec.method.as_str(),
                    spec.path
                );
                self.session.clear_if_current(&fresh);
                Err(SyncError::exchange_failed(
                    "credential rejected after re-authentication",
                ))
            }
        }
    }

    async fn dispatch(&self, spec: &RequestSpec, credential: Option<&str>) -> Result<Attempt> {
        debug!("[CloudSave] {} {}", spec.method.as_str(), spec.path);
        let outcome = self
            .transport
            .send(TransportRequest::from_spec(spec, credential))
            .await;
        classify(outcome)
    }
}

/// The server signals an expired credential both ways: HTTP 401, or a 2xx
/// whose envelope code is 401. Either one means unauthorized.
fn classify(outcome: std::result::Result<serde_json::Value, TransportError>) -> Result<Attempt> {
    match outcome {
        Ok(body) => {
            let envelope = ApiEnvelope::from_value(&body)
                .ok_or_else(|| SyncError::malformed("response has no code envelope"))?;
            if envelope.is_unauthorized() {
                Ok(Attempt::Unauthorized)
            } else if envelope.is_ok() {
                Ok(Attempt::Done(envelope.data))
            } else {
                Err(SyncError::rejected(
                    envelope.code,
                    envelope.message_or_default(),
                ))
            }
        }
        Err(TransportError::Status { status, body }) => {
            let envelope = body.as_ref().and_then(ApiEnvelope::from_value);
            if i64::from(status) == CODE_UNAUTHORIZED
                || envelope.as_ref().is_some_and(ApiEnvelope::is_unauthorized)
            {
                return Ok(Attempt::Unauthorized);
            }
            match envelope {
                Some(envelope) if !envelope.is_ok() => Err(SyncError::rejected(
                    envelope.code,
                    envelope.message_or_default(),
                )),
                _ => Err(TransportError::Status { status, body }.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}
