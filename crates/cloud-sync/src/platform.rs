//! Host platform login: the source of one-time exchange codes.

use async_trait::async_trait;

use crate::error::{Result, SyncError};

/// Obtains a one-time code that the server exchanges for a session credential.
#[async_trait]
pub trait PlatformLogin: Send + Sync {
    async fn obtain_exchange_code(&self) -> Result<String>;
}

/// Platform login for hosts that cannot produce codes on their own.
///
/// Re-authentication through it always fails, so an expired session ends
/// with [`SyncError::AuthExchangeFailed`] and the user signs in explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePlatformLogin;

#[async_trait]
impl PlatformLogin for UnavailablePlatformLogin {
    async fn obtain_exchange_code(&self) -> Result<String> {
        Err(SyncError::exchange_failed(
            "platform login is not available on this host",
        ))
    }
}
