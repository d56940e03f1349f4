//! Credential database for the keykeeper hub.
//!
//! The database holds the central's BLE identity and the key material of
//! every enrolled coin. It lives in a single JSON file, optionally encrypted
//! under a password.
//!
//! # Components
//!
//! - [`Database`] - in-memory model with load/save and coin generation
//! - [`CredentialStore`] - shared, lock-protected handle that persists every
//!   mutation atomically
//! - [`CoinProvisioner`] - seam for writing a coin onto a physical token
//! - [`envelope`] - password-based encryption of the file
//!
//! # Example
//!
//! ```no_run
//! use keykeeper_storage::{CredentialStore, NoopProvisioner};
//!
//! # async fn example() -> Result<(), keykeeper_storage::StorageError> {
//! let store = CredentialStore::open("keykeeper.json", "secret").await?;
//!
//! let coin = store.enroll("Paul", &NoopProvisioner).await?;
//! println!("Paul's coin is {}", coin.address);
//!
//! store.remove_coin("Paul").await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
mod document;
pub mod envelope;
pub mod error;
mod lock;
pub mod provision;
pub mod store;

pub use database::Database;
pub use envelope::KdfParams;
pub use error::{StorageError, StorageResult};
pub use provision::{CoinProvisioner, NoopProvisioner, ProvisionError};
pub use store::CredentialStore;
