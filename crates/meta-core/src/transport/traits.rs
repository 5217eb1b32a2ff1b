//! Byte channel abstraction.
//!
//! Defines the `ByteChannel` trait for duplex serial communication,
//! allowing different implementations (serialport, mock, etc.).

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Granularity used by the provided `wait_readable` implementation.
const READABLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Channel closed")]
    Disconnected,

    #[error("Incomplete read: expected {expected} bytes, got {}", .received.len())]
    Incomplete { expected: usize, received: Vec<u8> },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract duplex byte transport with bounded waits.
///
/// Every read takes an explicit timeout; no method may block forever.
/// Closing the channel must make blocked and future reads fail with
/// [`TransportError::Disconnected`].
pub trait ByteChannel {
    /// Write all bytes to the channel.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read whatever arrives within `timeout`, at most `max_len` bytes.
    ///
    /// Returns an empty buffer when nothing arrived in time.
    fn read_available(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Close the channel. Idempotent.
    fn close(&mut self);

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;

    /// Block until at least one byte is readable or `timeout` elapses.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_open() {
                return Err(TransportError::Disconnected);
            }
            if self.bytes_available()? > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(READABLE_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Drain every byte that is currently buffered.
    fn read_all(&mut self) -> Result<Vec<u8>, TransportError> {
        let pending = self.bytes_available()?;
        if pending == 0 {
            return Ok(Vec::new());
        }
        self.read_available(pending, Duration::ZERO)
    }

    /// Read exactly `len` bytes, giving up once `timeout` has elapsed.
    ///
    /// On deadline the bytes received so far are returned inside
    /// [`TransportError::Incomplete`].
    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::with_capacity(len);
        while buf.len() < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = self.read_available(len - buf.len(), remaining)?;
            buf.extend_from_slice(&chunk);
            if chunk.is_empty() && remaining.is_zero() {
                return Err(TransportError::Incomplete {
                    expected: len,
                    received: buf,
                });
            }
        }
        Ok(buf)
    }
}

impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn read_available(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_available(max_len, timeout)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_available()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        (**self).wait_readable(timeout)
    }

    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_exact(len, timeout)
    }
}
