//! Command/response exchange: send one opcode, read its fixed-size answer.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::decode::DeviceFact;
use crate::events::{MetaEvent, MetaObserver, PacketDirection, Severity};
use crate::protocol::{Opcode, Response};
use crate::session::Session;
use crate::transport::{ByteChannel, TransportError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Meta session is not established")]
    NotEstablished,

    #[error("Timeout after {timeout_ms}ms waiting for {opcode}")]
    Timeout { opcode: Opcode, timeout_ms: u64 },

    #[error("Short response to {opcode}: expected {expected} bytes, got {got}")]
    ShortRead {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },

    #[error("{opcode} does not return device data")]
    Undecodable { opcode: Opcode },

    #[error("{opcode} needs a framed request")]
    RequiresFrame { opcode: Opcode },

    #[error("Transport error: {0}")]
    Io(#[from] TransportError),
}

impl<C: ByteChannel, O: MetaObserver> Session<C, O> {
    /// Send `opcode` and read its fixed-length response.
    ///
    /// Only query opcodes go through here. NVRAM traffic needs a framed
    /// request and is sent with [`Session::write_record`].
    #[instrument(skip(self), fields(opcode = %opcode))]
    pub fn send(&mut self, opcode: Opcode) -> Result<Vec<u8>, ProtocolError> {
        let result = match opcode.response() {
            Response::Fixed(_) => {
                let timeout = self.timeouts().command;
                self.transact(opcode, &[opcode.byte()], timeout)
            }
            Response::Status => Err(ProtocolError::RequiresFrame { opcode }),
        };
        if let Err(e) = &result {
            self.log(Severity::Error, format!("{} failed: {}", opcode, e));
        }
        result
    }

    /// Send `opcode` and decode the answer into a [`DeviceFact`].
    pub fn query(&mut self, opcode: Opcode) -> Result<DeviceFact, ProtocolError> {
        let data = self.send(opcode)?;
        let fact = DeviceFact::decode(opcode, &data).ok_or(ProtocolError::Undecodable { opcode })?;
        debug!(fact = %fact, "Decoded");
        self.emit(MetaEvent::Fact(fact.clone()));
        Ok(fact)
    }

    /// Raw chipset hardware code.
    pub fn read_hw_code(&mut self) -> Result<u32, ProtocolError> {
        match self.query(Opcode::GetHwCode)? {
            DeviceFact::Chipset { hw_code, .. } => Ok(hw_code),
            _ => Err(ProtocolError::Undecodable {
                opcode: Opcode::GetHwCode,
            }),
        }
    }

    pub fn read_chipset(&mut self) -> Result<DeviceFact, ProtocolError> {
        self.query(Opcode::GetHwCode)
    }

    pub fn read_sw_version(&mut self) -> Result<DeviceFact, ProtocolError> {
        self.query(Opcode::GetSwVersion)
    }

    pub fn read_meid(&mut self) -> Result<DeviceFact, ProtocolError> {
        self.query(Opcode::GetMeid)
    }

    pub fn read_soc_id(&mut self) -> Result<DeviceFact, ProtocolError> {
        self.query(Opcode::GetSocId)
    }

    /// Write `frame`, wait up to `timeout` for the device to answer and read
    /// the response shape declared by `opcode`.
    ///
    /// Bytes already buffered before the write belong to an earlier exchange
    /// and are dropped. Errors are returned unlogged; callers report them.
    pub(crate) fn transact(
        &mut self,
        opcode: Opcode,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.ensure_established()?;

        let stale = self.channel_mut().read_all()?;
        if !stale.is_empty() {
            self.packet(PacketDirection::Rx, &stale);
            debug!(len = stale.len(), "Discarded stale bytes before request");
        }

        let start = Instant::now();
        self.channel_mut().write(frame)?;
        self.packet(PacketDirection::Tx, frame);

        if !self.channel_mut().wait_readable(timeout)? {
            return Err(ProtocolError::Timeout {
                opcode,
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let data = match opcode.response() {
            Response::Fixed(len) => {
                let remaining = timeout.saturating_sub(start.elapsed());
                match self.channel_mut().read_exact(len, remaining) {
                    Ok(data) => data,
                    Err(TransportError::Incomplete { expected, received }) => {
                        self.packet(PacketDirection::Rx, &received);
                        return Err(ProtocolError::ShortRead {
                            opcode,
                            expected,
                            got: received.len(),
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Response::Status => self.channel_mut().read_all()?,
        };

        self.packet(PacketDirection::Rx, &data);
        debug!(len = data.len(), "Response received");
        Ok(data)
    }
}
