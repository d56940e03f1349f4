//! Per-connection protocol driver.
//!
//! # States
//!
//! ```text
//!   connect
//!      │
//!   ┌──▼──┐  first connection   ┌─────────┐
//!   │Boot ├────────────────────►│ reboot  │ InitialReboot
//!   └──┬──┘                     └─────────┘
//!      │ not yet synced
//!   ┌──▼───────┐                ┌─────────┐
//!   │ConfigSync├───────────────►│ reboot  │ Rebooted
//!   └──────────┘                └─────────┘
//!      │ already synced
//!   ┌──▼────┐
//!   │Running│ until the port fails
//!   └───────┘
//! ```
//!
//! Every session starts by flushing the prompt with a blank line. The very
//! first connection of the process only reboots the central so it starts
//! from a known state. The next one re-reads the credential database, reads
//! the firmware configuration, corrects it and reboots again. From then
//! on every connection starts the BLE stack and follows status events.
//!
//! Every wait for firmware output is bounded by the sentinel timeout, so a
//! firmware that stops answering ends the session instead of hanging it.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keykeeper_core::BleAddress;
use keykeeper_protocol::{
    Command, StatusEvent, is_command_echo, is_done, is_static_address_unsupported,
    parse_bond_row, parse_space_key_row, parse_status,
};
use keykeeper_storage::CredentialStore;
use tracing::{debug, info, trace, warn};

use crate::error::{PortError, PortResult};
use crate::reconcile::plan_reconciliation;
use crate::session::{CoinSession, SessionContext};
use crate::status::{AuthenticationHandler, StatusSink};
use crate::transport::LineTransport;

/// Default bound on waiting for an identity line or a `done` sentinel.
pub const DEFAULT_SENTINEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Phase a session enters after the initial flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Boot,
    ConfigSync,
    Running,
}

/// How a session ended without a port error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The first connection of the process rebooted the central.
    InitialReboot,
    /// The configuration was synchronized and the central rebooted.
    Rebooted,
}

/// Drives one connection at a time through Boot, ConfigSync and Running.
///
/// The synchronizer outlives connections: it remembers whether the initial
/// reboot and the configuration sync already happened in this process.
pub struct Synchronizer<S, A> {
    store: Arc<CredentialStore>,
    status: S,
    auth: A,
    sentinel_timeout: Duration,
    first_connection: bool,
    config_synced: bool,
}

impl<S: StatusSink, A: AuthenticationHandler> Synchronizer<S, A> {
    pub fn new(store: Arc<CredentialStore>, status: S, auth: A) -> Self {
        Self {
            store,
            status,
            auth,
            sentinel_timeout: DEFAULT_SENTINEL_TIMEOUT,
            first_connection: true,
            config_synced: false,
        }
    }

    /// Bound on every wait for firmware output.
    pub fn sentinel_timeout(mut self, timeout: Duration) -> Self {
        self.sentinel_timeout = timeout;
        self
    }

    pub fn status(&self) -> &S {
        &self.status
    }

    pub fn is_config_synced(&self) -> bool {
        self.config_synced
    }

    /// Phase the next session will enter.
    pub fn next_state(&self) -> SyncState {
        if self.first_connection {
            SyncState::Boot
        } else if !self.config_synced {
            SyncState::ConfigSync
        } else {
            SyncState::Running
        }
    }

    /// Run one session over a freshly opened transport.
    ///
    /// Returns when the session ends on purpose (a reboot was issued).
    /// Running never ends on purpose, so a session in that state only ever
    /// returns the port error that ended it.
    pub async fn run_session<T: LineTransport>(
        &mut self,
        transport: &mut T,
    ) -> PortResult<SessionOutcome> {
        let mut context = SessionContext::new();
        transport.send_command(&Command::Flush).await?;

        match self.next_state() {
            SyncState::Boot => {
                self.first_connection = false;
                self.status.central_status("Rebooting central");
                transport.send_command(&Command::Reboot).await?;
                info!("Initial reboot issued");
                Ok(SessionOutcome::InitialReboot)
            }
            SyncState::ConfigSync => {
                self.configure(transport, &mut context).await?;
                Ok(SessionOutcome::Rebooted)
            }
            SyncState::Running => {
                let Err(err) = self.run_events(transport, &mut context).await;
                Err(err)
            }
        }
    }

    async fn configure<T: LineTransport>(
        &mut self,
        transport: &mut T,
        context: &mut SessionContext,
    ) -> PortResult<()> {
        self.status.central_status("Synchronizing configuration");
        self.store.reload().await?;

        context.firmware_identity = self.read_settings(transport).await?;
        context.bonds = self
            .query_table(transport, &Command::StatsBonds, parse_bond_row)
            .await?;
        context.space_keys = self
            .query_table(transport, &Command::StatsSpaceKey, parse_space_key_row)
            .await?;

        info!(
            identity = ?context.firmware_identity.map(|a| a.to_string()),
            bonds = context.bonds.len(),
            space_keys = context.space_keys.len(),
            "Firmware configuration read"
        );

        let db = self.store.snapshot().await;
        let plan = plan_reconciliation(context, &db);
        if plan.is_empty() {
            info!("Firmware configuration is up to date");
        } else {
            info!(commands = plan.len(), "Correcting firmware configuration");
        }

        for command in &plan {
            self.execute(transport, command).await?;
        }

        self.config_synced = true;
        self.status.central_status("Rebooting central");
        transport.send_command(&Command::Reboot).await?;
        self.drain(transport).await;
        Ok(())
    }

    /// `settings load`, then wait for the identity the controller reports.
    async fn read_settings<T: LineTransport>(
        &self,
        transport: &mut T,
    ) -> PortResult<Option<BleAddress>> {
        self.status.command_status("settings load");
        transport.send_command(&Command::SettingsLoad).await?;

        self.bounded("identity", read_identity(transport)).await
    }

    /// Send a table command and collect the rows `parse` accepts until `done`.
    async fn query_table<T, R>(
        &self,
        transport: &mut T,
        command: &Command,
        parse: fn(&str) -> Option<R>,
    ) -> PortResult<Vec<R>>
    where
        T: LineTransport,
    {
        self.status.command_status(&command.to_string());
        transport.send_command(command).await?;

        let verb = command.verb();
        self.bounded(verb, read_table(transport, verb, parse)).await
    }

    /// Send a command and, if the firmware closes its output with `done`,
    /// wait for it.
    async fn execute<T: LineTransport>(
        &self,
        transport: &mut T,
        command: &Command,
    ) -> PortResult<()> {
        self.status.command_status(&command.to_string());
        transport.send_command(command).await?;

        if command.ends_with_done() {
            self.bounded(command.verb(), wait_for_done(transport)).await?;
        }
        Ok(())
    }

    /// Read until the port goes away after a reboot.
    async fn drain<T: LineTransport>(&self, transport: &mut T) {
        let until_closed = async {
            loop {
                if let Err(err) = transport.next_line().await {
                    return err;
                }
            }
        };

        match tokio::time::timeout(self.sentinel_timeout, until_closed).await {
            Ok(err) => debug!(error = %err, "Central disconnected after reboot"),
            Err(_) => warn!(
                timeout_ms = self.sentinel_timeout.as_millis() as u64,
                "Central still connected after reboot"
            ),
        }
    }

    async fn run_events<T: LineTransport>(
        &mut self,
        transport: &mut T,
        context: &mut SessionContext,
    ) -> PortResult<Infallible> {
        self.status.central_status("Running");
        transport.send_command(&Command::BleStart).await?;

        loop {
            let line = transport.next_line().await?;
            match parse_status(&line) {
                Some(event) => self.apply_event(context, event).await,
                None => trace!(line = %line, "Console"),
            }
        }
    }

    async fn apply_event(&mut self, context: &mut SessionContext, event: StatusEvent) {
        match event {
            StatusEvent::Identity { address, .. } => {
                debug!(address = %address, "Central identity");
                context.firmware_identity = Some(address);
            }
            StatusEvent::DeviceFound {
                address,
                rssi,
                bonded,
                ..
            } => {
                debug!(address = %address, rssi, bonded, "Device found");
            }
            StatusEvent::BatteryLevel(level) => match context.current_coin.as_mut() {
                Some(coin) => {
                    debug!(address = %coin.address, level, "Battery level");
                    coin.battery_level = Some(level);
                }
                None => debug!(level, "Battery level without a connected coin"),
            },
            StatusEvent::Connected(address) => {
                info!(address = %address, "Coin connected");
                self.status
                    .central_status(&format!("Coin {address} connected"));
                context.current_coin = Some(CoinSession::new(address));
            }
            StatusEvent::Authenticated => {
                let name = match &context.current_coin {
                    Some(coin) => self
                        .store
                        .read()
                        .await
                        .name_of(&coin.address)
                        .map(str::to_owned),
                    None => None,
                };
                info!(name = ?name, "Key authenticated");
                self.auth.on_authenticated(context.current_coin.as_ref());
            }
            StatusEvent::Disconnected { address, reason } => {
                info!(address = %address, reason, "Coin disconnected");
                self.status.central_status("Running");
                context.current_coin = None;
            }
        }
    }

    async fn bounded<F, R>(&self, waiting_for: &str, future: F) -> PortResult<R>
    where
        F: Future<Output = PortResult<R>>,
    {
        match tokio::time::timeout(self.sentinel_timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    waiting_for,
                    timeout_ms = self.sentinel_timeout.as_millis() as u64,
                    "Timed out waiting for central"
                );
                Err(PortError::timeout(waiting_for, self.sentinel_timeout))
            }
        }
    }
}

async fn wait_for_done<T: LineTransport>(transport: &mut T) -> PortResult<()> {
    loop {
        let line = transport.next_line().await?;
        if is_done(&line) {
            return Ok(());
        }
        trace!(line = %line, "Waiting for done");
    }
}

async fn read_identity<T: LineTransport>(transport: &mut T) -> PortResult<Option<BleAddress>> {
    loop {
        let line = transport.next_line().await?;
        trace!(line = %line, "Console");
        if is_static_address_unsupported(&line) {
            debug!("Central has no identity configured");
            return Ok(None);
        }
        if let Some(StatusEvent::Identity { address, .. }) = parse_status(&line) {
            return Ok(Some(address));
        }
    }
}

/// Skip to the echo of `verb`, then collect parsed rows until `done`.
async fn read_table<T, R>(
    transport: &mut T,
    verb: &str,
    parse: fn(&str) -> Option<R>,
) -> PortResult<Vec<R>>
where
    T: LineTransport,
{
    loop {
        let line = transport.next_line().await?;
        if is_command_echo(&line, verb) {
            break;
        }
        trace!(line = %line, "Skipping until echo");
    }

    let mut rows = Vec::new();
    loop {
        let line = transport.next_line().await?;
        if is_done(&line) {
            return Ok(rows);
        }
        if let Some(row) = parse(&line) {
            rows.push(row);
        }
    }
}
