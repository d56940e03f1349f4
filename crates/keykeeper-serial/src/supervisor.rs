//! Reconnect loop around the synchronizer.
//!
//! The central disappears routinely: it is rebooted on purpose twice at
//! startup and it can be unplugged at any time. The supervisor treats every
//! end of a session the same way, waits a fixed delay and opens the port
//! again. Only the shutdown token stops it.

#![allow(async_fn_in_trait)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PortResult;
use crate::status::{AuthenticationHandler, StatusSink};
use crate::synchronizer::{SessionOutcome, Synchronizer};
use crate::transport::{LineTransport, SerialConfig, SerialTransport};

/// Default pause between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Opens a new transport for every session.
pub trait Connector {
    type Transport: LineTransport;

    async fn connect(&mut self) -> PortResult<Self::Transport>;
}

impl Connector for SerialConfig {
    type Transport = SerialTransport;

    async fn connect(&mut self) -> PortResult<SerialTransport> {
        SerialTransport::open(self)
    }
}

/// Runs sessions back to back until shut down.
pub struct Supervisor<C, S, A> {
    connector: C,
    synchronizer: Synchronizer<S, A>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
}

impl<C, S, A> Supervisor<C, S, A>
where
    C: Connector,
    S: StatusSink,
    A: AuthenticationHandler,
{
    pub fn new(connector: C, synchronizer: Synchronizer<S, A>, shutdown: CancellationToken) -> Self {
        Self {
            connector,
            synchronizer,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            shutdown,
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn synchronizer(&self) -> &Synchronizer<S, A> {
        &self.synchronizer
    }

    /// Connect, run a session, wait, repeat.
    ///
    /// Cancelling the shutdown token drops the session in flight, which
    /// closes the port, and makes this return.
    pub async fn run(&mut self) {
        let shutdown = self.shutdown.clone();
        info!(
            reconnect_delay_ms = self.reconnect_delay.as_millis() as u64,
            "Supervisor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.cycle() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.synchronizer.status().central_status("Stopped");
        info!("Supervisor stopped");
    }

    async fn cycle(&mut self) {
        let status = self.synchronizer.status();
        status.central_status("Connecting");

        let mut transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(error = %err, "Central not available");
                status.central_status("Central not found");
                return;
            }
        };

        let state = self.synchronizer.next_state();
        info!(state = ?state, "Connected to central");
        status.central_status("Connected");

        match self.synchronizer.run_session(&mut transport).await {
            Ok(SessionOutcome::InitialReboot) => info!("Central rebooting into a clean state"),
            Ok(SessionOutcome::Rebooted) => info!("Configuration synchronized, central rebooting"),
            Err(err) => {
                warn!(error = %err, "Lost connection to central, reconnecting");
                self.synchronizer.status().central_status("Connection lost");
            }
        }
    }
}
