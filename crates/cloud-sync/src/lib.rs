//! Cloud save engine for Tapvault.
//!
//! Holds the player's session, sends authenticated requests to the game API,
//! recovers from expired credentials with a single shared re-authentication,
//! and pushes the game state on a fixed cadence behind a circuit breaker.
//!
//! Start-up order for a host:
//! 1. [`CloudSaveService::ensure_session`]
//! 2. [`CloudSaveService::load_game`]
//! 3. [`CloudSaveService::reconcile_offline`], then accept or discard the reward
//! 4. [`CloudSaveService::scheduler`] with the resulting receipt, then
//!    [`SyncScheduler::start`]
//!
//! A host that only saves once passes the receipt to
//! [`CloudSaveService::settle_offline`] before [`CloudSaveService::save_game`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod reauth;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{SyncConfig, API_URL_ENV, DEFAULT_API_BASE_URL};
pub use error::{Result, StorageError, SyncError, TransportError};
pub use pipeline::AuthenticatedClient;
pub use platform::{PlatformLogin, UnavailablePlatformLogin};
pub use reauth::ReauthCoordinator;
pub use scheduler::{NoopNotifier, SyncNotifier, SyncScheduler, RETRYING_LABEL, RETRY_LABEL};
pub use service::{CloudSaveService, LoadedGame};
pub use session::{Session, SessionState, SessionStore, ANONYMOUS_USER_ID};
pub use storage::{
    CredentialStorage, FileCredentialStorage, MemoryCredentialStorage, CREDENTIAL_KEY,
};
pub use transport::{HttpTransport, Transport};
pub use types::{ApiEnvelope, HttpMethod, RequestSpec, TransportRequest};
