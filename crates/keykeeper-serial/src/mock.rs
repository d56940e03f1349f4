//! Simulated central firmware for tests and dry runs.
//!
//! [`MockFirmware`] models the parts of the firmware the synchronizer talks
//! to: the stored identity, the bond and space key tables, and the effect of
//! every configuration command. Its state survives reconnects and reboots,
//! exactly like the flash of the real device. Each [`MockFirmware::connect`]
//! opens a new [`MockConnection`], which echoes commands at a shell prompt,
//! closes tables with `done` and drops off the bus on `reboot`.
//!
//! Everything exchanged is recorded in a transcript, so tests can check not
//! only what was sent but what had been read before each command.
//!
//! # Example
//!
//! ```
//! use keykeeper_serial::mock::MockFirmware;
//! use keykeeper_serial::LineTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let firmware = MockFirmware::new().with_identity("EF:EF:5A:CB:C2:B6".parse().unwrap());
//! let mut port = firmware.connect();
//!
//! port.send_line("settings load").await.unwrap();
//! assert_eq!(port.next_line().await.unwrap(), "uart:~$ settings load");
//! assert!(port.next_line().await.unwrap().contains("Identity: EF:EF:5A:CB:C2:B6"));
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use keykeeper_core::BleAddress;

use crate::error::{PortError, PortResult};
use crate::supervisor::Connector;
use crate::transport::LineTransport;

const PROMPT: &str = "uart:~$ ";

#[derive(Debug, Default)]
struct FirmwareState {
    identity: Option<BleAddress>,
    bonds: Vec<BleAddress>,
    space_keys: Vec<(BleAddress, u8)>,
    events: Vec<String>,
    withheld_done: Vec<String>,
    hang_when_idle: bool,
    refuse_connections: usize,
    connections: usize,
    reboots: usize,
    transcript: Vec<String>,
}

/// Simulated firmware; clones share the same device.
#[derive(Debug, Clone, Default)]
pub struct MockFirmware {
    state: Arc<Mutex<FirmwareState>>,
}

impl MockFirmware {
    /// Blank firmware: no identity, empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FirmwareState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_identity(self, address: BleAddress) -> Self {
        self.lock().identity = Some(address);
        self
    }

    /// Store a coin in both tables.
    pub fn with_coin(self, address: BleAddress, space_key_prefix: u8) -> Self {
        self.with_bond(address).with_space_key(address, space_key_prefix)
    }

    /// Add a bond row without a matching space key row.
    pub fn with_bond(self, address: BleAddress) -> Self {
        self.lock().bonds.push(address);
        self
    }

    /// Add a space key row without a matching bond row.
    pub fn with_space_key(self, address: BleAddress, prefix: u8) -> Self {
        self.lock().space_keys.push((address, prefix));
        self
    }

    /// Status lines printed after every `ble_start`.
    pub fn with_events<I, L>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.lock().events.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Never print `done` after `verb` (e.g. `"coin add"`).
    pub fn withhold_done(self, verb: &str) -> Self {
        self.lock().withheld_done.push(verb.to_string());
        self
    }

    /// Block instead of reporting a closed port once all output is read.
    pub fn hang_when_idle(self) -> Self {
        self.lock().hang_when_idle = true;
        self
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_connections(self, count: usize) -> Self {
        self.lock().refuse_connections = count;
        self
    }

    /// Open a new console session.
    pub fn connect(&self) -> MockConnection {
        let mut state = self.lock();
        state.connections += 1;
        state.transcript.push("-- connected".to_string());
        MockConnection {
            firmware: self.clone(),
            output: VecDeque::new(),
            closed: false,
        }
    }

    pub fn identity(&self) -> Option<BleAddress> {
        self.lock().identity
    }

    pub fn bonds(&self) -> Vec<BleAddress> {
        self.lock().bonds.clone()
    }

    pub fn space_keys(&self) -> Vec<(BleAddress, u8)> {
        self.lock().space_keys.clone()
    }

    /// Successful connections so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn reboots(&self) -> usize {
        self.lock().reboots
    }

    /// Every non-blank line written by the host, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .transcript
            .iter()
            .filter_map(|entry| entry.strip_prefix("> "))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Interleaved log of the session: `> ` for lines written by the host,
    /// `< ` for lines the host read, `-- connected` at each connection.
    pub fn transcript(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }
}

impl Connector for MockFirmware {
    type Transport = MockConnection;

    async fn connect(&mut self) -> PortResult<MockConnection> {
        {
            let mut state = self.lock();
            if state.refuse_connections > 0 {
                state.refuse_connections -= 1;
                return Err(PortError::Open {
                    path: "mock".to_string(),
                    reason: "No such file or directory".to_string(),
                });
            }
        }
        Ok(MockFirmware::connect(self))
    }
}

/// One console session on a [`MockFirmware`].
#[derive(Debug)]
pub struct MockConnection {
    firmware: MockFirmware,
    output: VecDeque<String>,
    closed: bool,
}

impl MockConnection {
    fn print(&mut self, line: impl Into<String>) {
        self.output.push_back(line.into());
    }

    fn done(&mut self, state: &FirmwareState, verb: &str) {
        if !state.withheld_done.iter().any(|v| v == verb) {
            self.print("done");
        }
    }

    fn execute(&mut self, line: &str) {
        let firmware = self.firmware.clone();
        let mut state = firmware.lock();
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => {}
            ["reboot"] => {
                state.reboots += 1;
                state.transcript.push("-- rebooted".to_string());
                self.output.clear();
                self.closed = true;
            }
            ["settings", "load"] => match state.identity {
                Some(address) => self.print(format!(
                    "[00:00:00.004,000] <inf> bt_hci_core: Identity: {address} (random)"
                )),
                None => self.print(
                    "[00:00:00.004,000] <wrn> bt_hci_core: Read Static Addresses command not available",
                ),
            },
            ["settings", "clear"] => {
                state.identity = None;
                state.bonds.clear();
                state.space_keys.clear();
                self.done(&state, "settings clear");
            }
            ["central_setup", address, _irk] => {
                state.identity = address.parse().ok();
                self.done(&state, "central_setup");
            }
            ["stats", "bonds"] => {
                for address in state.bonds.clone() {
                    self.print(format!("[{address}] keys: 34, flags: 17"));
                }
                self.done(&state, "stats bonds");
            }
            ["stats", "spacekey"] => {
                for (address, prefix) in state.space_keys.clone() {
                    self.print(format!("[{address}] : {prefix:02X}..."));
                }
                self.done(&state, "stats spacekey");
            }
            ["coin", "add", address, _irk, _ltk, space_key] => {
                let prefix = space_key
                    .get(..2)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let (Ok(address), Some(prefix)) = (address.parse::<BleAddress>(), prefix) {
                    state.bonds.push(address);
                    state.space_keys.push((address, prefix));
                }
                self.done(&state, "coin add");
            }
            ["coin", "del", address] => {
                if let Ok(address) = address.parse::<BleAddress>() {
                    state.bonds.retain(|a| *a != address);
                    state.space_keys.retain(|(a, _)| *a != address);
                }
                self.done(&state, "coin del");
            }
            ["ble_start"] => {
                for event in state.events.clone() {
                    self.print(event);
                }
            }
            [other, ..] => self.print(format!("{other}: command not found")),
        }
    }
}

impl LineTransport for MockConnection {
    async fn next_line(&mut self) -> PortResult<String> {
        if let Some(line) = self.output.pop_front() {
            self.firmware.lock().transcript.push(format!("< {line}"));
            return Ok(line);
        }

        let hang = self.firmware.lock().hang_when_idle;
        if hang && !self.closed {
            std::future::pending::<()>().await;
        }
        Err(PortError::Closed)
    }

    async fn send_line(&mut self, line: &str) -> PortResult<()> {
        if self.closed {
            return Err(PortError::Closed);
        }
        self.firmware.lock().transcript.push(format!("> {line}"));
        self.print(format!("{PROMPT}{line}"));
        self.execute(line);
        Ok(())
    }
}
