//! Line-oriented access to the firmware console.
//!
//! [`LineTransport`] is the seam between the synchronizer and the port. The
//! real implementation frames any byte stream with [`FirmwareLineCodec`];
//! [`SerialTransport`] is that framing over a `tokio_serial::SerialStream`.
//! Tests substitute [`MockFirmware`](crate::mock::MockFirmware).

#![allow(async_fn_in_trait)]

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use keykeeper_protocol::{Command, FirmwareLineCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

use crate::error::{PortError, PortResult};

/// Stable device path of the keykeeper central on Linux.
pub const DEFAULT_DEVICE: &str = "/dev/serial/by-id/usb-ZEPHYR_N39_BLE_KEYKEEPER_0.01-if00";

/// Console baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Source of console lines and sink for commands.
///
/// Writes carry no acknowledgment; whatever the firmware answers arrives
/// through [`next_line`](Self::next_line).
pub trait LineTransport {
    /// Wait for the next complete line, ANSI codes already stripped.
    ///
    /// # Errors
    ///
    /// `PortError::Closed` at end of stream, `PortError::Io` on I/O failure.
    async fn next_line(&mut self) -> PortResult<String>;

    /// Write one line; the terminator is added by the transport.
    async fn send_line(&mut self, line: &str) -> PortResult<()>;

    /// Write a command's full wire text.
    async fn send_command(&mut self, command: &Command) -> PortResult<()> {
        debug!(command = %command, "Sending command");
        self.send_line(&command.to_wire()).await
    }
}

impl<T: LineTransport + ?Sized> LineTransport for &mut T {
    async fn next_line(&mut self) -> PortResult<String> {
        (**self).next_line().await
    }

    async fn send_line(&mut self, line: &str) -> PortResult<()> {
        (**self).send_line(line).await
    }
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path; symlinks such as `/dev/serial/by-id/...` are resolved
    /// before opening.
    pub device: PathBuf,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl SerialConfig {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Any byte stream framed into console lines.
#[derive(Debug)]
pub struct FramedTransport<S> {
    framed: Framed<S, FirmwareLineCodec>,
}

/// Transport over the real serial port.
pub type SerialTransport = FramedTransport<SerialStream>;

impl<S: AsyncRead + AsyncWrite + Unpin> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, FirmwareLineCodec::new()),
        }
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

impl FramedTransport<SerialStream> {
    /// Open the configured serial device.
    pub fn open(config: &SerialConfig) -> PortResult<Self> {
        let path = resolve_device(&config.device)?;
        let port_name = path.display().to_string();

        let builder = tokio_serial::new(port_name.as_str(), config.baud_rate);
        let stream = SerialStream::open(&builder).map_err(|err| PortError::Open {
            path: port_name.clone(),
            reason: err.to_string(),
        })?;

        info!(path = %port_name, baud_rate = config.baud_rate, "Serial port opened");
        Ok(Self::new(stream))
    }
}

/// Resolve symlinks so the port is opened by its real device node.
fn resolve_device(device: &Path) -> PortResult<PathBuf> {
    device.canonicalize().map_err(|err| PortError::Open {
        path: device.display().to_string(),
        reason: err.to_string(),
    })
}

impl<S: AsyncRead + AsyncWrite + Unpin> LineTransport for FramedTransport<S> {
    async fn next_line(&mut self) -> PortResult<String> {
        match self.framed.next().await {
            Some(Ok(line)) => {
                trace!(line = %line, "Console");
                Ok(line)
            }
            Some(Err(err)) => Err(err.into()),
            None => Err(PortError::Closed),
        }
    }

    async fn send_line(&mut self, line: &str) -> PortResult<()> {
        self.framed.send(line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_framed_transport_lines() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = FramedTransport::new(host);

        device
            .write_all(b"\x1b[1;32m<inf> app: Battery Level: 42%\x1b[0m\r\ndone\r\n")
            .await
            .unwrap();

        assert_eq!(
            transport.next_line().await.unwrap(),
            "<inf> app: Battery Level: 42%"
        );
        assert_eq!(transport.next_line().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_framed_transport_sends_crlf() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = FramedTransport::new(host);

        transport.send_command(&Command::StatsBonds).await.unwrap();

        let mut buf = [0u8; 13];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"stats bonds\r\n");
    }

    #[tokio::test]
    async fn test_framed_transport_closed() {
        let (host, device) = tokio::io::duplex(64);
        let mut transport = FramedTransport::new(host);
        drop(device);

        assert!(matches!(
            transport.next_line().await,
            Err(PortError::Closed)
        ));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let config = SerialConfig::new("/dev/serial/by-id/does-not-exist");
        assert!(matches!(
            SerialTransport::open(&config),
            Err(PortError::Open { .. })
        ));
    }
}
