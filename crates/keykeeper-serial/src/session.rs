//! Per-connection state.

use keykeeper_core::BleAddress;
use keykeeper_protocol::{Bond, SpaceKeyRecord};

/// The coin currently connected to the central.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSession {
    pub address: BleAddress,
    /// Last reported battery level in percent, if any was reported yet.
    pub battery_level: Option<u8>,
}

impl CoinSession {
    pub fn new(address: BleAddress) -> Self {
        Self {
            address,
            battery_level: None,
        }
    }
}

/// What the synchronizer has learned during one connection.
///
/// Created empty when a session starts and dropped when the port goes
/// away; nothing in here survives a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Identity address reported by `settings load`, or by the controller
    /// at startup.
    pub firmware_identity: Option<BleAddress>,
    /// Rows of `stats bonds`, in firmware order.
    pub bonds: Vec<Bond>,
    /// Rows of `stats spacekey`, in firmware order.
    pub space_keys: Vec<SpaceKeyRecord>,
    pub current_coin: Option<CoinSession>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }
}
