//! serialport-based channel implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument};

use super::traits::{ByteChannel, TransportError};

/// Baud rate used by MTK preloaders in meta mode.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port channel.
pub struct SerialChannel {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialChannel {
    /// Open a serial port (8N1, no flow control).
    #[instrument(level = "info")]
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: name.to_string(),
                message: e.to_string(),
            })?;

        info!(port = %name, baud = baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(port),
            name: name.to_string(),
        })
    }

    /// Name the port was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Disconnected)
    }
}

/// Enumerate serial ports present on the host.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

impl ByteChannel for SerialChannel {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        port.flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    fn read_available(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        // A zero timeout would mean "block forever" to some backends.
        port.set_timeout(timeout.max(Duration::from_millis(1)))?;

        let mut buf = vec![0u8; max_len];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(TransportError::Disconnected),
            Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
        };

        buf.truncate(n);
        if n > 0 {
            debug!(bytes_read = n, "Read complete");
        }
        Ok(buf)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.name, "Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
