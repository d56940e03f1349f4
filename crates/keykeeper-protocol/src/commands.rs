//! Commands understood by the central firmware shell.
//!
//! # Command Set
//!
//! | Command | Wire text | Output ends with `done` |
//! |---------|-----------|-------------------------|
//! | [`Command::Flush`] | *(empty line)* | no |
//! | [`Command::Reboot`] | `reboot` | no (the port drops) |
//! | [`Command::SettingsLoad`] | `settings load` | no (identity log line) |
//! | [`Command::SettingsClear`] | `settings clear` | yes |
//! | [`Command::CentralSetup`] | `central_setup <addr> <irk>` | yes |
//! | [`Command::StatsBonds`] | `stats bonds` | yes |
//! | [`Command::StatsSpaceKey`] | `stats spacekey` | yes |
//! | [`Command::CoinAdd`] | `coin add <addr> <irk> <ltk> <spacekey>` | yes |
//! | [`Command::CoinDel`] | `coin del <addr>` | yes |
//! | [`Command::BleStart`] | `ble_start` | no |
//!
//! # Key Material
//!
//! [`Command::to_wire`] renders the full command, keys included, and must
//! only ever be handed to the transport. The `Display` implementation masks
//! key material and is what gets logged.
//!
//! ```
//! use keykeeper_core::{BleAddress, Key128};
//! use keykeeper_protocol::Command;
//!
//! let cmd = Command::CentralSetup {
//!     address: "EF:EF:5A:CB:C2:B6".parse().unwrap(),
//!     irk: Key128::from_bytes([0xAB; 16]),
//! };
//! assert_eq!(cmd.to_wire(), format!("central_setup EF:EF:5A:CB:C2:B6 {}", "AB".repeat(16)));
//! assert_eq!(cmd.to_string(), "central_setup EF:EF:5A:CB:C2:B6 <irk>");
//! ```

use std::fmt;

use keykeeper_core::{BleAddress, Coin, Identity, Key128, SpaceKey};

/// A command sent to the firmware shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line flushing whatever is pending at the prompt.
    Flush,
    Reboot,
    SettingsLoad,
    SettingsClear,
    CentralSetup {
        address: BleAddress,
        irk: Key128,
    },
    StatsBonds,
    StatsSpaceKey,
    CoinAdd {
        address: BleAddress,
        irk: Key128,
        ltk: Key128,
        space_key: SpaceKey,
    },
    CoinDel(BleAddress),
    BleStart,
}

impl Command {
    /// `central_setup` for the given identity.
    pub fn central_setup(identity: &Identity) -> Self {
        Command::CentralSetup {
            address: identity.address,
            irk: identity.irk.clone(),
        }
    }

    /// `coin add` carrying the coin's full key material.
    pub fn coin_add(coin: &Coin) -> Self {
        Command::CoinAdd {
            address: coin.address,
            irk: coin.irk.clone(),
            ltk: coin.ltk.clone(),
            space_key: coin.space_key.clone(),
        }
    }

    /// Full wire text without the line terminator.
    pub fn to_wire(&self) -> String {
        match self {
            Command::CentralSetup { address, irk } => {
                format!("central_setup {} {}", address, irk.to_hex())
            }
            Command::CoinAdd {
                address,
                irk,
                ltk,
                space_key,
            } => format!(
                "coin add {} {} {} {}",
                address,
                irk.to_hex(),
                ltk.to_hex(),
                space_key.to_hex()
            ),
            Command::CoinDel(address) => format!("coin del {}", address),
            other => other.verb().to_string(),
        }
    }

    /// Command word(s) without arguments.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Flush => "",
            Command::Reboot => "reboot",
            Command::SettingsLoad => "settings load",
            Command::SettingsClear => "settings clear",
            Command::CentralSetup { .. } => "central_setup",
            Command::StatsBonds => "stats bonds",
            Command::StatsSpaceKey => "stats spacekey",
            Command::CoinAdd { .. } => "coin add",
            Command::CoinDel(_) => "coin del",
            Command::BleStart => "ble_start",
        }
    }

    /// Whether the firmware terminates this command's output with `done`.
    pub fn ends_with_done(&self) -> bool {
        matches!(
            self,
            Command::SettingsClear
                | Command::CentralSetup { .. }
                | Command::StatsBonds
                | Command::StatsSpaceKey
                | Command::CoinAdd { .. }
                | Command::CoinDel(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Flush => write!(f, "<flush>"),
            Command::CentralSetup { address, .. } => write!(f, "central_setup {} <irk>", address),
            Command::CoinAdd { address, .. } => {
                write!(f, "coin add {} <irk> <ltk> <spacekey>", address)
            }
            other => write!(f, "{}", other.to_wire()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_coin() -> Coin {
        let mut space_key = [0x11u8; 32];
        space_key[0] = 0x9F;
        Coin {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            irk: Key128::from_bytes([0x01; 16]),
            ltk: Key128::from_bytes([0x02; 16]),
            space_key: SpaceKey::from_bytes(space_key),
        }
    }

    #[rstest]
    #[case(Command::Flush, "")]
    #[case(Command::Reboot, "reboot")]
    #[case(Command::SettingsLoad, "settings load")]
    #[case(Command::SettingsClear, "settings clear")]
    #[case(Command::StatsBonds, "stats bonds")]
    #[case(Command::StatsSpaceKey, "stats spacekey")]
    #[case(Command::BleStart, "ble_start")]
    fn test_plain_commands(#[case] command: Command, #[case] wire: &str) {
        assert_eq!(command.to_wire(), wire);
    }

    #[test]
    fn test_coin_add_wire() {
        let cmd = Command::coin_add(&sample_coin());
        let expected = format!(
            "coin add AA:BB:CC:DD:EE:FF {} {} 9F{}",
            "01".repeat(16),
            "02".repeat(16),
            "11".repeat(31)
        );
        assert_eq!(cmd.to_wire(), expected);
    }

    #[test]
    fn test_coin_del_wire() {
        let cmd = Command::CoinDel("AA:BB:CC:DD:EE:FF".parse().unwrap());
        assert_eq!(cmd.to_wire(), "coin del AA:BB:CC:DD:EE:FF");
        assert_eq!(cmd.to_string(), "coin del AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_display_masks_keys() {
        let cmd = Command::coin_add(&sample_coin());
        let shown = cmd.to_string();
        assert_eq!(shown, "coin add AA:BB:CC:DD:EE:FF <irk> <ltk> <spacekey>");
        assert!(!format!("{:?}", cmd).contains("0101"));
    }

    #[test]
    fn test_done_terminated_commands() {
        assert!(Command::SettingsClear.ends_with_done());
        assert!(Command::coin_add(&sample_coin()).ends_with_done());
        assert!(!Command::Reboot.ends_with_done());
        assert!(!Command::BleStart.ends_with_done());
        assert!(!Command::SettingsLoad.ends_with_done());
    }
}
