//! Shared types for keykeeper: BLE addresses, key material, the central
//! identity and coin credentials.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BleAddress, Coin, Identity, Key128, SecretKey, SpaceKey};
