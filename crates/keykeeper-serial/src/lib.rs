//! Serial synchronization engine for the keykeeper central.
//!
//! The central is a BLE dongle running a shell on its USB serial console.
//! This crate keeps its configuration in line with the credential database
//! and follows its status events:
//!
//! - [`transport`] - line transport over the serial port
//! - [`Synchronizer`] - Boot, ConfigSync and Running for one connection
//! - [`plan_reconciliation`] - pure planning of corrective commands
//! - [`Supervisor`] - reconnect loop with a fixed delay and clean shutdown
//! - [`status`] - status sinks and the authentication callback
//! - [`mock`] - simulated firmware for tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keykeeper_serial::{
//!     LogAuthenticationHandler, SerialConfig, Supervisor, Synchronizer, TracingStatusSink,
//! };
//! use keykeeper_storage::CredentialStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(CredentialStore::open("keykeeper.json", "").await?);
//! let synchronizer = Synchronizer::new(store, TracingStatusSink, LogAuthenticationHandler);
//!
//! let shutdown = CancellationToken::new();
//! let mut supervisor = Supervisor::new(SerialConfig::default(), synchronizer, shutdown.clone());
//! supervisor.run().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod mock;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod supervisor;
pub mod synchronizer;
pub mod transport;

pub use error::{PortError, PortResult};
pub use reconcile::plan_reconciliation;
pub use session::{CoinSession, SessionContext};
pub use status::{
    AuthenticationHandler, ChannelStatusSink, LogAuthenticationHandler, StatusReceivers,
    StatusSink, TracingStatusSink,
};
pub use supervisor::{Connector, DEFAULT_RECONNECT_DELAY, Supervisor};
pub use synchronizer::{DEFAULT_SENTINEL_TIMEOUT, SessionOutcome, SyncState, Synchronizer};
pub use transport::{FramedTransport, LineTransport, SerialConfig, SerialTransport};
