//! Writing a coin's key material onto the physical token.
//!
//! Enrollment is only durable once the token carries the same keys as the
//! database. [`CredentialStore::enroll`](crate::CredentialStore::enroll)
//! therefore runs a [`CoinProvisioner`] between generating a coin and
//! persisting it.

#![allow(async_fn_in_trait)]

use keykeeper_core::Coin;
use thiserror::Error;

/// Errors reported by a provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Read-back did not match what was written
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// The operator declined to continue
    #[error("Provisioning cancelled")]
    Cancelled,

    /// I/O error talking to the programmer
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes coin key material onto a token.
///
/// Implementations must not log key material.
pub trait CoinProvisioner {
    /// Program `coin` onto the attached token, labelled `name`.
    async fn provision(&self, name: &str, coin: &Coin) -> Result<(), ProvisionError>;
}

impl<P: CoinProvisioner + ?Sized> CoinProvisioner for &P {
    async fn provision(&self, name: &str, coin: &Coin) -> Result<(), ProvisionError> {
        (**self).provision(name, coin).await
    }
}

/// Provisioner that accepts every coin without touching hardware.
///
/// Used when tokens are flashed out of band, and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvisioner;

impl CoinProvisioner for NoopProvisioner {
    async fn provision(&self, _name: &str, _coin: &Coin) -> Result<(), ProvisionError> {
        Ok(())
    }
}
