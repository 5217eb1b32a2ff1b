//! Meta session - an established meta-mode connection and its configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::ProtocolError;
use crate::events::{MetaEvent, MetaObserver, PacketDirection, Severity};
use crate::handshake::{HandshakeConfig, HandshakeError, MetaHandshake};
use crate::protocol::constants::*;
use crate::transport::{ByteChannel, DEFAULT_BAUD_RATE};

/// Configuration for a meta session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name (e.g. `/dev/ttyACM0`, `COM5`).
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Mode string sent after READY.
    pub mode: String,
    pub ready_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub poll_slice_ms: u64,
    pub command_timeout_ms: u64,
    pub nvram_timeout_ms: u64,
    /// Pause between the two writes of a dual-SIM IMEI repair.
    pub imei_write_delay_ms: u64,
    /// NVRAM logical ID holding the IMEI record.
    pub imei_lid: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            mode: DEFAULT_META_MODE.to_string(),
            ready_timeout_ms: READY_TIMEOUT_MS,
            ack_timeout_ms: MODE_ACK_TIMEOUT_MS,
            poll_slice_ms: READY_POLL_SLICE_MS,
            command_timeout_ms: COMMAND_TIMEOUT_MS,
            nvram_timeout_ms: NVRAM_ACK_TIMEOUT_MS,
            imei_write_delay_ms: IMEI_WRITE_DELAY_MS,
            imei_lid: LID_IMEI,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig {
            mode: self.mode.clone(),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            poll_slice: Duration::from_millis(self.poll_slice_ms),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_millis(self.command_timeout_ms),
            nvram_ack: Duration::from_millis(self.nvram_timeout_ms),
        }
    }

    /// Run the handshake on `channel` and apply the configured timeouts.
    pub fn connect<C: ByteChannel, O: MetaObserver>(
        &self,
        channel: C,
        observer: Arc<O>,
    ) -> Result<Session<C, O>, HandshakeError> {
        let mut session = MetaHandshake::with_observer(self.handshake(), observer).enter(channel)?;
        session.set_timeouts(self.timeouts());
        Ok(session)
    }
}

/// Per-operation read deadlines of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a fixed-length command response.
    pub command: Duration,
    /// Wait for the NVRAM write acknowledgement.
    pub nvram_ack: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_millis(COMMAND_TIMEOUT_MS),
            nvram_ack: Duration::from_millis(NVRAM_ACK_TIMEOUT_MS),
        }
    }
}

/// An established meta-mode connection.
///
/// Owns its channel exclusively. Only [`MetaHandshake::enter`] creates one;
/// once closed it rejects every operation with [`ProtocolError::NotEstablished`].
pub struct Session<C: ByteChannel, O: MetaObserver> {
    channel: C,
    observer: Arc<O>,
    timeouts: Timeouts,
    established: bool,
}

impl<C: ByteChannel, O: MetaObserver> Session<C, O> {
    pub(crate) fn established(channel: C, observer: Arc<O>) -> Self {
        Self {
            channel,
            observer,
            timeouts: Timeouts::default(),
            established: true,
        }
    }

    pub fn is_established(&self) -> bool {
        self.established && self.channel.is_open()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Close the channel. The session cannot be used afterwards.
    pub fn close(&mut self) {
        if self.established {
            info!("Closing meta session");
        }
        self.established = false;
        self.channel.close();
    }

    /// Give the channel back, e.g. to run a fresh handshake on it.
    pub fn into_channel(self) -> C {
        self.channel
    }

    pub(crate) fn ensure_established(&self) -> Result<(), ProtocolError> {
        if self.is_established() {
            Ok(())
        } else {
            Err(ProtocolError::NotEstablished)
        }
    }

    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub(crate) fn emit(&self, event: MetaEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, severity: Severity, message: impl Into<String>) {
        self.emit(MetaEvent::Log {
            severity,
            message: message.into(),
        });
    }

    pub(crate) fn packet(&self, direction: PacketDirection, data: &[u8]) {
        self.emit(MetaEvent::Packet {
            direction,
            length: data.len(),
            data: data.to_vec(),
        });
    }
}
