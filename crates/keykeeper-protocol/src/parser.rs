//! Firmware console line parser.
//!
//! The central firmware reports its runtime state through Zephyr log lines
//! (`<inf> module: message`) and answers table queries with bare rows. This
//! module maps both into typed values. Every function here is pure: one
//! line in, an optional value out. Lines that match nothing are simply not
//! events.
//!
//! # Status Lines
//!
//! | Kind | Grammar |
//! |------|---------|
//! | Identity | `<inf> bt_hci_core: Identity: <addr> (<descr>)` |
//! | DeviceFound | `<inf> app: Device found: [<addr>] (RSSI <int>) (TYPE <int>) (BONDED <0\|1>)` |
//! | BatteryLevel | `<inf> app: Battery Level: <0-100>%` |
//! | Connected | `<inf> app: Connected: [<addr>]` |
//! | Authenticated | `<inf> app: KEY AUTHENTICATED. OPEN DOOR PLEASE.` |
//! | Disconnected | `<inf> app: Disconnected: [<addr>] (reason <int>)` |
//!
//! Status grammars are searched anywhere in the line, so timestamps and
//! other log prefixes do not matter. The first grammar that matches wins.
//!
//! # Table Rows
//!
//! - `stats bonds` prints `[<addr>] keys: 34, flags: 17`
//! - `stats spacekey` prints `[<addr>] : <XX>...` where `XX` is the first
//!   space key byte
//!
//! Both tables end with a literal `done` line.
//!
//! # Examples
//!
//! ```
//! use keykeeper_protocol::parser::{StatusEvent, StatusKind, parse_status, match_status};
//!
//! let event = parse_status("<inf> app: Battery Level: 73%").unwrap();
//! assert_eq!(event, StatusEvent::BatteryLevel(73));
//!
//! let raw = match_status("<inf> app: Battery Level: 73%").unwrap();
//! assert_eq!(raw.kind, StatusKind::BatteryLevel);
//! assert_eq!(raw.fields, vec!["73".to_string()]);
//!
//! assert!(parse_status("uart:~$ ").is_none());
//! ```

use std::fmt;
use std::sync::LazyLock;

use keykeeper_core::BleAddress;
use regex::Regex;

/// Kind of a firmware status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Identity,
    DeviceFound,
    BatteryLevel,
    Connected,
    Authenticated,
    Disconnected,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            StatusKind::Identity => "Identity",
            StatusKind::DeviceFound => "DeviceFound",
            StatusKind::BatteryLevel => "BatteryLevel",
            StatusKind::Connected => "Connected",
            StatusKind::Authenticated => "Authenticated",
            StatusKind::Disconnected => "Disconnected",
        };
        write!(f, "{}", kind)
    }
}

/// Status grammars in match priority order.
static STATUS_PATTERNS: LazyLock<Vec<(StatusKind, Regex)>> = LazyLock::new(|| {
    [
        (
            StatusKind::Identity,
            r"<inf> bt_hci_core: Identity: (.{17}) \((.*)\)",
        ),
        (
            StatusKind::DeviceFound,
            r"<inf> app: Device found: \[(.{17})\] \(RSSI (-?\d+)\) \(TYPE (\d+)\) \(BONDED ([01])\)",
        ),
        (
            StatusKind::BatteryLevel,
            r"<inf> app: Battery Level: (\d{1,3})%",
        ),
        (StatusKind::Connected, r"<inf> app: Connected: \[(.{17})\]"),
        (
            StatusKind::Authenticated,
            r"<inf> app: KEY AUTHENTICATED\. OPEN DOOR PLEASE\.",
        ),
        (
            StatusKind::Disconnected,
            r"<inf> app: Disconnected: \[(.{17})\] \(reason (\d+)\)",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid status regex")))
    .collect()
});

static BOND_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(.{17})\] keys: 34, flags: 17$").expect("valid bond row regex")
});

static SPACE_KEY_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(.{17})\] : ([A-F0-9]{2})\.\.\.$").expect("valid space key row regex")
});

const STATIC_ADDRESS_UNSUPPORTED: &str = "bt_hci_core: Read Static Addresses command not available";

const DONE_SENTINEL: &str = "done";

/// Untyped match of a status line: its kind and captured text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMatch {
    pub kind: StatusKind,
    pub fields: Vec<String>,
}

/// Typed firmware status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The controller reported the central's identity address.
    Identity {
        address: BleAddress,
        descriptor: String,
    },

    /// A scan found an advertising device.
    DeviceFound {
        address: BleAddress,
        rssi: i32,
        kind: u8,
        bonded: bool,
    },

    /// Battery level of the connected coin, in percent.
    BatteryLevel(u8),

    /// A coin connected.
    Connected(BleAddress),

    /// The connected coin proved possession of its keys.
    Authenticated,

    /// A coin disconnected.
    Disconnected { address: BleAddress, reason: u32 },
}

impl StatusEvent {
    /// Kind of this event.
    pub fn kind(&self) -> StatusKind {
        match self {
            StatusEvent::Identity { .. } => StatusKind::Identity,
            StatusEvent::DeviceFound { .. } => StatusKind::DeviceFound,
            StatusEvent::BatteryLevel(_) => StatusKind::BatteryLevel,
            StatusEvent::Connected(_) => StatusKind::Connected,
            StatusEvent::Authenticated => StatusKind::Authenticated,
            StatusEvent::Disconnected { .. } => StatusKind::Disconnected,
        }
    }

    /// Field values as the firmware prints them, in capture order.
    pub fn fields(&self) -> Vec<String> {
        match self {
            StatusEvent::Identity {
                address,
                descriptor,
            } => vec![address.to_string(), descriptor.clone()],
            StatusEvent::DeviceFound {
                address,
                rssi,
                kind,
                bonded,
            } => vec![
                address.to_string(),
                rssi.to_string(),
                kind.to_string(),
                u8::from(*bonded).to_string(),
            ],
            StatusEvent::BatteryLevel(level) => vec![level.to_string()],
            StatusEvent::Connected(address) => vec![address.to_string()],
            StatusEvent::Authenticated => Vec::new(),
            StatusEvent::Disconnected { address, reason } => {
                vec![address.to_string(), reason.to_string()]
            }
        }
    }
}

impl TryFrom<StatusMatch> for StatusEvent {
    type Error = StatusMatch;

    /// Convert captured text into typed fields.
    ///
    /// Fails, handing the match back, when a capture does not hold a valid
    /// value (e.g. a malformed address or a battery level above 100).
    fn try_from(raw: StatusMatch) -> Result<Self, StatusMatch> {
        let event = match (raw.kind, raw.fields.as_slice()) {
            (StatusKind::Identity, [address, descriptor]) => {
                address.parse().ok().map(|address| StatusEvent::Identity {
                    address,
                    descriptor: descriptor.clone(),
                })
            }
            (StatusKind::DeviceFound, [address, rssi, kind, bonded]) => (|| {
                Some(StatusEvent::DeviceFound {
                    address: address.parse().ok()?,
                    rssi: rssi.parse().ok()?,
                    kind: kind.parse().ok()?,
                    bonded: bonded == "1",
                })
            })(),
            (StatusKind::BatteryLevel, [level]) => level
                .parse::<u8>()
                .ok()
                .filter(|level| *level <= 100)
                .map(StatusEvent::BatteryLevel),
            (StatusKind::Connected, [address]) => {
                address.parse().ok().map(StatusEvent::Connected)
            }
            (StatusKind::Authenticated, []) => Some(StatusEvent::Authenticated),
            (StatusKind::Disconnected, [address, reason]) => (|| {
                Some(StatusEvent::Disconnected {
                    address: address.parse().ok()?,
                    reason: reason.parse().ok()?,
                })
            })(),
            _ => None,
        };

        event.ok_or(raw)
    }
}

/// Match a line against the status grammars without typing the captures.
pub fn match_status(line: &str) -> Option<StatusMatch> {
    STATUS_PATTERNS.iter().find_map(|(kind, pattern)| {
        pattern.captures(line).map(|captures| StatusMatch {
            kind: *kind,
            fields: captures
                .iter()
                .skip(1)
                .map(|field| field.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect(),
        })
    })
}

/// Parse a line into a typed status event.
///
/// Returns `None` for lines that are not status events, and for status
/// lines whose captures are malformed.
pub fn parse_status(line: &str) -> Option<StatusEvent> {
    match_status(line).and_then(|raw| StatusEvent::try_from(raw).ok())
}

/// Bonding record reported by `stats bonds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    pub address: BleAddress,
}

/// Space key record reported by `stats spacekey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceKeyRecord {
    pub address: BleAddress,
    /// First byte of the space key stored on the firmware.
    pub prefix: u8,
}

/// Parse a `stats bonds` row.
///
/// ```
/// use keykeeper_protocol::parse_bond_row;
///
/// let bond = parse_bond_row("[AA:BB:CC:DD:EE:FF] keys: 34, flags: 17").unwrap();
/// assert_eq!(bond.address.to_string(), "AA:BB:CC:DD:EE:FF");
/// ```
pub fn parse_bond_row(line: &str) -> Option<Bond> {
    let captures = BOND_ROW.captures(line.trim_end())?;
    let address = captures[1].parse().ok()?;
    Some(Bond { address })
}

/// Parse a `stats spacekey` row.
///
/// ```
/// use keykeeper_protocol::parse_space_key_row;
///
/// let record = parse_space_key_row("[AA:BB:CC:DD:EE:FF] : 9F...").unwrap();
/// assert_eq!(record.prefix, 0x9F);
/// ```
pub fn parse_space_key_row(line: &str) -> Option<SpaceKeyRecord> {
    let captures = SPACE_KEY_ROW.captures(line.trim_end())?;
    let address = captures[1].parse().ok()?;
    let prefix = u8::from_str_radix(&captures[2], 16).ok()?;
    Some(SpaceKeyRecord { address, prefix })
}

/// Whether the line is the `done` sentinel closing a command's output.
pub fn is_done(line: &str) -> bool {
    line.trim_end() == DONE_SENTINEL
}

/// Whether the controller reported that it has no static address to offer.
///
/// `settings load` prints this instead of an identity line on a blank
/// firmware.
pub fn is_static_address_unsupported(line: &str) -> bool {
    line.contains(STATIC_ADDRESS_UNSUPPORTED)
}

/// Whether the line is the shell's echo of `command`.
///
/// The echo follows the prompt (`uart:~$ stats bonds`), so only the end of
/// the line is compared.
pub fn is_command_echo(line: &str, command: &str) -> bool {
    !command.is_empty() && line.trim_end().ends_with(command)
}
