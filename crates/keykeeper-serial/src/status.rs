//! Outbound notifications: status text and authenticated coins.
//!
//! The synchronizer reports progress on two independent channels, one for
//! the connection lifecycle and one for the command currently in flight. A
//! front panel shows both; the daemon just logs them.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::session::CoinSession;

/// Receives human-readable status updates.
pub trait StatusSink {
    /// Connection and lifecycle status ("connecting", "synchronizing", ...).
    fn central_status(&self, status: &str);

    /// Progress of the command currently being executed.
    fn command_status(&self, status: &str);
}

impl<T: StatusSink + ?Sized> StatusSink for Arc<T> {
    fn central_status(&self, status: &str) {
        (**self).central_status(status);
    }

    fn command_status(&self, status: &str) {
        (**self).command_status(status);
    }
}

/// Status sink that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn central_status(&self, status: &str) {
        info!(target: "keykeeper::central", "{status}");
    }

    fn command_status(&self, status: &str) {
        info!(target: "keykeeper::command", "{status}");
    }
}

/// Status sink publishing the latest value of each channel.
///
/// Readers only ever see the most recent status; intermediate updates they
/// were too slow for are skipped.
#[derive(Debug)]
pub struct ChannelStatusSink {
    central: watch::Sender<String>,
    command: watch::Sender<String>,
}

/// Receiving half of a [`ChannelStatusSink`].
#[derive(Debug, Clone)]
pub struct StatusReceivers {
    pub central: watch::Receiver<String>,
    pub command: watch::Receiver<String>,
}

impl ChannelStatusSink {
    pub fn new() -> (Self, StatusReceivers) {
        let (central, central_rx) = watch::channel(String::new());
        let (command, command_rx) = watch::channel(String::new());
        (
            Self { central, command },
            StatusReceivers {
                central: central_rx,
                command: command_rx,
            },
        )
    }
}

impl StatusSink for ChannelStatusSink {
    fn central_status(&self, status: &str) {
        self.central.send_replace(status.to_string());
    }

    fn command_status(&self, status: &str) {
        self.command.send_replace(status.to_string());
    }
}

/// Called when a coin authenticates successfully.
///
/// This is where the door gets opened. The coin may be unknown if the
/// firmware reported the authentication before the connection.
pub trait AuthenticationHandler {
    fn on_authenticated(&self, coin: Option<&CoinSession>);
}

impl<F> AuthenticationHandler for F
where
    F: Fn(Option<&CoinSession>),
{
    fn on_authenticated(&self, coin: Option<&CoinSession>) {
        self(coin)
    }
}

/// Handler that only logs authentications.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuthenticationHandler;

impl AuthenticationHandler for LogAuthenticationHandler {
    fn on_authenticated(&self, coin: Option<&CoinSession>) {
        match coin {
            Some(coin) => info!(
                address = %coin.address,
                battery_level = ?coin.battery_level,
                "Key authenticated, open door"
            ),
            None => warn!("Key authenticated without a connected coin"),
        }
    }
}
