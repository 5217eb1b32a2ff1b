//! Meta-mode handshake.
//!
//! The preloader announces itself with `READY`; the host answers with a mode
//! string and the device confirms with an 8-byte acknowledgement:
//!
//! ```text
//! AwaitingReady --READY--> SentMode --> AwaitingAck --ack--> Established
//!       |                                    |
//!       +----------- timeout / mismatch -----+--> Failed
//! ```
//!
//! There are no internal retries. A failed handshake consumes the channel;
//! callers retry with a freshly opened one.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{MetaEvent, MetaObserver, PacketDirection, Severity, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::contains_sequence;
use crate::session::Session;
use crate::transport::{ByteChannel, TransportError};

/// Upper bound for a single READY poll read.
const READY_READ_CHUNK: usize = 256;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("No READY signal from preloader within {timeout_ms}ms")]
    NoReadySignal { timeout_ms: u64 },

    #[error("Unexpected mode acknowledgement {:?}", String::from_utf8_lossy(.got))]
    AckMismatch { got: Vec<u8> },

    #[error("Transport error: {0}")]
    Io(#[from] TransportError),
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingReady,
    SentMode,
    AwaitingAck,
    Established,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::AwaitingReady => write!(f, "AWAITING_READY"),
            HandshakeState::SentMode => write!(f, "SENT_MODE"),
            HandshakeState::AwaitingAck => write!(f, "AWAITING_ACK"),
            HandshakeState::Established => write!(f, "ESTABLISHED"),
            HandshakeState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Handshake parameters.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Mode string written after READY.
    pub mode: String,
    /// Total budget for READY to show up.
    pub ready_timeout: Duration,
    /// Wait for the 8-byte acknowledgement.
    pub ack_timeout: Duration,
    /// Length of one READY poll.
    pub poll_slice: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            mode: DEFAULT_META_MODE.to_string(),
            ready_timeout: Duration::from_millis(READY_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(MODE_ACK_TIMEOUT_MS),
            poll_slice: Duration::from_millis(READY_POLL_SLICE_MS),
        }
    }
}

/// Drives a channel into meta mode.
pub struct MetaHandshake<O: MetaObserver> {
    config: HandshakeConfig,
    observer: Arc<O>,
}

impl MetaHandshake<TracingObserver> {
    /// Create a handshake with the default tracing observer.
    pub fn new(config: HandshakeConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: MetaObserver> MetaHandshake<O> {
    pub fn with_observer(config: HandshakeConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Run the handshake and hand back an established session.
    #[instrument(skip(self, channel), fields(mode = %self.config.mode))]
    pub fn enter<C: ByteChannel>(&self, mut channel: C) -> Result<Session<C, O>, HandshakeError> {
        let mut state = HandshakeState::AwaitingReady;
        self.log(
            Severity::Info,
            "Waiting for 'READY' signal from preloader...",
        );

        match self.run(&mut channel, &mut state) {
            Ok(()) => {
                self.goto(&mut state, HandshakeState::Established);
                info!("Meta mode established");
                self.log(Severity::Success, "Successfully handshaked with META mode");
                Ok(Session::established(channel, Arc::clone(&self.observer)))
            }
            Err(e) => {
                self.goto(&mut state, HandshakeState::Failed);
                warn!(error = %e, "Handshake failed");
                self.log(Severity::Error, format!("Meta handshake failed: {}", e));
                Err(e)
            }
        }
    }

    fn run<C: ByteChannel>(
        &self,
        channel: &mut C,
        state: &mut HandshakeState,
    ) -> Result<(), HandshakeError> {
        self.await_ready(channel)?;
        let trailing = channel.read_all()?;
        if !trailing.is_empty() {
            self.packet(PacketDirection::Rx, &trailing);
            debug!(len = trailing.len(), "Discarded bytes after READY");
        }
        self.log(
            Severity::Success,
            format!("'READY' received. Sending meta mode: {}", self.config.mode),
        );

        let mode = self.config.mode.as_bytes();
        channel.write(mode)?;
        self.packet(PacketDirection::Tx, mode);
        self.goto(state, HandshakeState::SentMode);

        self.goto(state, HandshakeState::AwaitingAck);
        let ack = match channel.read_exact(MODE_ACK_LEN, self.config.ack_timeout) {
            Ok(bytes) => bytes,
            // A short answer is still an answer; report what arrived.
            Err(TransportError::Incomplete { received, .. }) => received,
            Err(e) => return Err(e.into()),
        };
        self.packet(PacketDirection::Rx, &ack);

        if MODE_ACKS.iter().any(|expected| expected[..] == ack[..]) {
            debug!(ack = %String::from_utf8_lossy(&ack), "Mode acknowledged");
            Ok(())
        } else {
            Err(HandshakeError::AckMismatch { got: ack })
        }
    }

    /// Poll in bounded slices until READY shows up anywhere in the stream.
    fn await_ready<C: ByteChannel>(&self, channel: &mut C) -> Result<(), HandshakeError> {
        let budget = self.config.ready_timeout;
        let slice = self.config.poll_slice.max(Duration::from_millis(1));
        let start = Instant::now();
        // Tail of the stream so far; long enough for READY split across reads.
        let mut window: Vec<u8> = Vec::new();
        let mut polls = 0u64;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= budget {
                debug!(polls, "READY wait exhausted");
                return Err(HandshakeError::NoReadySignal {
                    timeout_ms: budget.as_millis() as u64,
                });
            }
            polls += 1;

            let chunk = channel.read_available(READY_READ_CHUNK, slice.min(budget - elapsed))?;
            if chunk.is_empty() {
                continue;
            }
            self.packet(PacketDirection::Rx, &chunk);

            window.extend_from_slice(&chunk);
            if contains_sequence(&window, READY_SIGNAL) {
                debug!(polls, "READY seen");
                return Ok(());
            }
            let keep = READY_SIGNAL.len() - 1;
            if window.len() > keep {
                window.drain(..window.len() - keep);
            }
        }
    }

    fn goto(&self, state: &mut HandshakeState, to: HandshakeState) {
        debug!(from = %state, to = %to, "Handshake transition");
        self.observer.on_event(&MetaEvent::HandshakeState { from: *state, to });
        *state = to;
    }

    fn log(&self, severity: Severity, message: impl Into<String>) {
        self.observer.on_event(&MetaEvent::Log {
            severity,
            message: message.into(),
        });
    }

    fn packet(&self, direction: PacketDirection, data: &[u8]) {
        self.observer.on_event(&MetaEvent::Packet {
            direction,
            length: data.len(),
            data: data.to_vec(),
        });
    }
}
