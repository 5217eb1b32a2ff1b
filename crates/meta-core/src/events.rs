//! Event system for UI decoupling.
//!
//! Allows CLI/GUI front ends to follow protocol progress without
//! tight coupling to the core logic.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use crate::decode::DeviceFact;
use crate::handshake::HandshakeState;

/// Severity of a progress message. Discriminants are part of the log contract.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info = 0,
    Error = 1,
    Success = 3,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Success => write!(f, "OK"),
        }
    }
}

/// Events emitted by a meta session.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    /// Handshake state transition.
    HandshakeState {
        from: HandshakeState,
        to: HandshakeState,
    },
    /// Human-readable progress message.
    Log { severity: Severity, message: String },
    /// Bytes sent or received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    /// A response was decoded.
    Fact(DeviceFact),
}

/// Serial traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving meta events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait MetaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &MetaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl MetaObserver for NullObserver {
    fn on_event(&self, _event: &MetaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl MetaObserver for TracingObserver {
    fn on_event(&self, event: &MetaEvent) {
        match event {
            MetaEvent::HandshakeState { from, to } => {
                tracing::debug!(from = %from, to = %to, "Handshake state");
            }
            MetaEvent::Log { severity, message } => match severity {
                Severity::Info => tracing::info!("{}", message),
                Severity::Success => tracing::info!(result = "success", "{}", message),
                Severity::Error => tracing::error!("{}", message),
            },
            MetaEvent::Packet {
                direction,
                length,
                data,
            } => {
                tracing::trace!(
                    dir = %direction,
                    len = length,
                    data = %crate::decode::hex_upper(data),
                    "Serial packet"
                );
            }
            MetaEvent::Fact(fact) => {
                tracing::debug!(fact = %fact, "Decoded device fact");
            }
        }
    }
}

/// Observer that forwards every event into an mpsc channel.
///
/// Events are dropped silently once the receiver hangs up.
pub struct ChannelObserver {
    sender: Mutex<Sender<MetaEvent>>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<MetaEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl MetaObserver for ChannelObserver {
    fn on_event(&self, event: &MetaEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event.clone());
        }
    }
}
