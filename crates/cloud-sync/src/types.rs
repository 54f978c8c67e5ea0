//! Wire types and request descriptions for the game API.

use std::time::Duration;

use serde::Deserialize;
use tapvault_core::sync::GameSnapshot;

use crate::error::{Result, SyncError};

/// Credential exchange endpoint.
pub const LOGIN_PATH: &str = "/api/game/wx-login";

/// Load (GET) and save (POST) endpoint for the player's game.
pub const USER_DATA_PATH: &str = "/api/game/user-data";

/// Header that carries the session credential.
pub const TOKEN_HEADER: &str = "X-Token";

/// Envelope code for success.
pub const CODE_OK: i64 = 200;

/// Envelope code for a rejected credential.
pub const CODE_UNAUTHORIZED: i64 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A business request, independent of the credential it is sent with.
///
/// The pipeline replays the same request after a re-authentication, so it is
/// cheap to clone and carries everything needed to resend.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            timeout,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
            timeout,
        }
    }

    /// GET /api/game/user-data
    pub fn load_user_data(timeout: Duration) -> Self {
        Self::get(USER_DATA_PATH, timeout)
    }

    /// POST /api/game/user-data
    pub fn save_user_data(snapshot: &GameSnapshot, timeout: Duration) -> Result<Self> {
        let body = serde_json::to_value(snapshot)
            .map_err(|e| SyncError::Config(format!("Failed to encode snapshot: {}", e)))?;
        Ok(Self::post(USER_DATA_PATH, body, timeout))
    }

    /// POST /api/game/wx-login
    pub fn login(code: &str, timeout: Duration) -> Self {
        Self::post(LOGIN_PATH, serde_json::json!({ "code": code }), timeout)
    }
}

/// One HTTP round-trip as handed to a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// Build the round-trip for `spec`, attaching `credential` when present.
    pub fn from_spec(spec: &RequestSpec, credential: Option<&str>) -> Self {
        let headers = credential
            .map(|value| vec![(TOKEN_HEADER.to_string(), value.to_string())])
            .unwrap_or_default();
        Self {
            method: spec.method,
            path: spec.path.clone(),
            body: spec.body.clone(),
            headers,
            timeout: spec.timeout,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `{ code, message?, data? }` envelope used by every game endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ApiEnvelope {
    /// Decode an envelope, or `None` if the value does not have one.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == CODE_UNAUTHORIZED
    }

    pub fn message_or_default(&self) -> String {
        self.message
            .clone()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("code {}", self.code))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub token: String,
}
