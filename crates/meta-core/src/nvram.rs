//! NVRAM record writes and IMEI repair.
//!
//! Frame layout (no checksum):
//!
//! ```text
//! [0x01][lid][len][payload...]
//! ```
//!
//! The device answers with `0x06` or a text containing `OK` on success.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::bcd::{self, CodecError, ImeiRecord};
use crate::command::ProtocolError;
use crate::events::{MetaObserver, Severity};
use crate::protocol::constants::*;
use crate::protocol::{Opcode, contains_sequence};
use crate::session::{Session, SessionConfig};
use crate::transport::ByteChannel;

#[derive(Error, Debug)]
pub enum NvramError {
    #[error("Cannot encode record: {0}")]
    Encoding(#[from] CodecError),

    #[error("Payload of {0} bytes does not fit a single NVRAM frame")]
    PayloadTooLarge(usize),

    #[error("No acknowledgement for NVRAM write to LID {lid} (response: {response:02X?})")]
    NoAck { lid: u8, response: Vec<u8> },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One NVRAM write frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvramPacket {
    lid: u8,
    payload: Vec<u8>,
}

impl NvramPacket {
    pub fn write(lid: u8, payload: &[u8]) -> Result<Self, NvramError> {
        if payload.len() > u8::MAX as usize {
            return Err(NvramError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            lid,
            payload: payload.to_vec(),
        })
    }

    pub fn lid(&self) -> u8 {
        self.lid
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.payload.len());
        buf.push(NVRAM_CMD_WRITE);
        buf.push(self.lid);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Whether a write response carries a positive acknowledgement.
pub fn is_ack(response: &[u8]) -> bool {
    response.contains(&NVRAM_ACK) || contains_sequence(response, NVRAM_ACK_TEXT)
}

impl<C: ByteChannel, O: MetaObserver> Session<C, O> {
    /// Write `payload` into NVRAM record `lid`.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn write_record(&mut self, lid: u8, payload: &[u8]) -> Result<(), NvramError> {
        match self.try_write_record(lid, payload) {
            Ok(()) => {
                info!(lid, "NVRAM write acknowledged");
                self.log(
                    Severity::Success,
                    format!("NVRAM write to LID {} acknowledged", lid),
                );
                Ok(())
            }
            Err(e) => Err(self.write_failed(lid, e)),
        }
    }

    /// Encode `imei` and write it into record `lid`.
    pub fn write_imei(&mut self, lid: u8, imei: &str) -> Result<(), NvramError> {
        let payload = bcd::encode(imei).map_err(|e| self.write_failed(lid, e.into()))?;
        self.write_record(lid, payload.as_bytes())
    }

    fn try_write_record(&mut self, lid: u8, payload: &[u8]) -> Result<(), NvramError> {
        let packet = NvramPacket::write(lid, payload)?;
        let timeout = self.timeouts().nvram_ack;

        let response = match self.transact(Opcode::NvramWrite, &packet.to_bytes(), timeout) {
            Ok(response) => response,
            Err(ProtocolError::Timeout { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if is_ack(&response) {
            Ok(())
        } else {
            Err(NvramError::NoAck { lid, response })
        }
    }

    fn write_failed(&self, lid: u8, error: NvramError) -> NvramError {
        warn!(lid, error = %error, "NVRAM write failed");
        self.log(
            Severity::Error,
            format!("NVRAM write to LID {} failed: {}", lid, error),
        );
        error
    }
}

/// Request to rewrite one or two IMEIs.
#[derive(Debug, Clone)]
pub struct ImeiRepair {
    pub lid: u8,
    pub primary: ImeiRecord,
    /// Second SIM slot. Written to the same LID as the primary.
    pub secondary: Option<ImeiRecord>,
    /// Pause before the second write.
    pub inter_write_delay: Duration,
}

impl ImeiRepair {
    pub fn new(primary: ImeiRecord, secondary: Option<ImeiRecord>) -> Self {
        Self {
            lid: LID_IMEI,
            primary,
            secondary,
            inter_write_delay: Duration::from_millis(IMEI_WRITE_DELAY_MS),
        }
    }

    pub fn from_config(
        config: &SessionConfig,
        primary: ImeiRecord,
        secondary: Option<ImeiRecord>,
    ) -> Self {
        Self {
            lid: config.imei_lid,
            primary,
            secondary,
            inter_write_delay: Duration::from_millis(config.imei_write_delay_ms),
        }
    }
}

/// Outcome of an [`ImeiRepair`] whose primary write succeeded.
#[derive(Debug)]
pub struct RepairReport {
    /// `None` when no second IMEI was requested.
    pub secondary: Option<Result<(), NvramError>>,
}

impl RepairReport {
    pub fn is_complete(&self) -> bool {
        !matches!(self.secondary, Some(Err(_)))
    }
}

/// Write the primary IMEI and, after the configured pause, the secondary one.
///
/// A failed primary write aborts the repair. A failed secondary write is
/// reported in the returned [`RepairReport`].
#[instrument(skip(session, request), fields(lid = request.lid))]
pub fn repair_imei<C: ByteChannel, O: MetaObserver>(
    session: &mut Session<C, O>,
    request: &ImeiRepair,
) -> Result<RepairReport, NvramError> {
    session.log(Severity::Info, "Connecting to NVRAM for IMEI repair...");

    session.log(Severity::Info, format!("Preparing IMEI 1: {}", request.primary));
    session.write_record(request.lid, request.primary.encode().as_bytes())?;

    let secondary = request.secondary.map(|imei| {
        thread::sleep(request.inter_write_delay);
        session.log(Severity::Info, format!("Preparing IMEI 2: {}", imei));
        session.write_record(request.lid, imei.encode().as_bytes())
    });

    let report = RepairReport { secondary };
    if report.is_complete() {
        session.log(Severity::Success, "Reboot the phone to apply the new IMEI");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, MetaEvent};
    use crate::session::Timeouts;
    use crate::session::testing::mock_session;
    use crate::transport::MockChannel;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Instant;

    const IMEI_A: &str = "356938035643809";
    const IMEI_B: &str = "490154203237518";

    fn log_messages(rx: &mpsc::Receiver<MetaEvent>) -> Vec<(Severity, String)> {
        rx.try_iter()
            .filter_map(|e| match e {
                MetaEvent::Log { severity, message } => Some((severity, message)),
                _ => None,
            })
            .collect()
    }

    fn error_count(logs: &[(Severity, String)]) -> usize {
        logs.iter().filter(|(s, _)| *s == Severity::Error).count()
    }

    fn short_ack_wait(session: &mut Session<MockChannel, crate::events::NullObserver>) {
        session.set_timeouts(Timeouts {
            command: Duration::from_millis(60),
            nvram_ack: Duration::from_millis(60),
        });
    }

    #[test]
    fn test_packet_layout() {
        let packet = NvramPacket::write(LID_IMEI, &[0xAA, 0xBB]).unwrap();
        assert_eq!(packet.to_bytes(), vec![0x01, 151, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn test_packet_rejects_oversized_payload() {
        assert!(matches!(
            NvramPacket::write(LID_IMEI, &[0u8; 256]),
            Err(NvramError::PayloadTooLarge(256))
        ));
        assert!(NvramPacket::write(LID_IMEI, &[0u8; 255]).is_ok());
    }

    #[test]
    fn test_ack_interpretation() {
        assert!(is_ack(&[0x06]));
        assert!(is_ack(b"\x00\x06\x00"));
        assert!(is_ack(b"OK"));
        assert!(is_ack(b"WRITE OK\r\n"));
        assert!(!is_ack(b""));
        assert!(!is_ack(&[0x15]));
        assert!(!is_ack(b"O K"));
        assert!(!is_ack(b"ok"));
    }

    #[test]
    fn test_write_imei_frame_shape() {
        let (mut session, mock) = mock_session();
        mock.queue_reply(&[0x06]);

        session.write_imei(LID_IMEI, "123456789012345").unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        let frame = &writes[0];
        assert_eq!(&frame[..3], &[0x01, 151, 10]);
        assert_eq!(
            &frame[3..],
            &[0x08, 0x3A, 0x21, 0x43, 0x65, 0x87, 0x09, 0x21, 0x43, 0xF5]
        );
    }

    #[test]
    fn test_write_imei_ok_text() {
        let (mut session, mock) = mock_session();
        mock.queue_reply(b"META OK");
        assert!(session.write_imei(LID_IMEI_LEGACY, IMEI_A).is_ok());
        assert_eq!(mock.writes()[0][1], 5);
    }

    #[test]
    fn test_write_imei_nak() {
        let (mut session, mock) = mock_session();
        mock.queue_reply(&[0x15]);

        match session.write_imei(LID_IMEI, IMEI_A) {
            Err(NvramError::NoAck { lid, response }) => {
                assert_eq!(lid, 151);
                assert_eq!(response, vec![0x15]);
            }
            other => panic!("expected NoAck, got {:?}", other),
        }
    }

    #[test]
    fn test_write_imei_timeout_is_no_ack() {
        let (mut session, _mock) = mock_session();
        short_ack_wait(&mut session);

        match session.write_imei(LID_IMEI, IMEI_A) {
            Err(NvramError::NoAck { response, .. }) => assert!(response.is_empty()),
            other => panic!("expected NoAck, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_imei_sends_nothing() {
        let (mut session, mock) = mock_session();
        assert!(matches!(
            session.write_imei(LID_IMEI, "12345"),
            Err(NvramError::Encoding(CodecError::InvalidImei { .. }))
        ));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_closed_session_rejects_write() {
        let (mut session, mock) = mock_session();
        session.close();
        assert!(matches!(
            session.write_imei(LID_IMEI, IMEI_A),
            Err(NvramError::Protocol(ProtocolError::NotEstablished))
        ));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_repair_writes_both_to_same_lid() {
        let (mut session, mock) = mock_session();
        mock.queue_reply(&[0x06]);
        mock.queue_reply(b"OK");

        let mut request = ImeiRepair::new(IMEI_A.parse().unwrap(), Some(IMEI_B.parse().unwrap()));
        request.inter_write_delay = Duration::from_millis(50);

        let start = Instant::now();
        let report = repair_imei(&mut session, &request).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(report.is_complete());
        assert!(matches!(report.secondary, Some(Ok(()))));

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][1], LID_IMEI);
        assert_eq!(writes[1][1], LID_IMEI);
        assert_eq!(&writes[0][3..], bcd::encode(IMEI_A).unwrap().as_bytes());
        assert_eq!(&writes[1][3..], bcd::encode(IMEI_B).unwrap().as_bytes());
    }

    #[test]
    fn test_repair_primary_failure_aborts() {
        let (mut session, mock) = mock_session();
        short_ack_wait(&mut session);
        mock.queue_reply(&[0x15]);

        let request = ImeiRepair::new(IMEI_A.parse().unwrap(), Some(IMEI_B.parse().unwrap()));
        assert!(repair_imei(&mut session, &request).is_err());
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn test_repair_secondary_failure_is_reported() {
        let mock = MockChannel::new();
        mock.push_inbound(b"READY");
        mock.queue_reply(b"ATEMATEM");
        mock.queue_reply(&[0x06]);
        mock.queue_reply(&[0x15]);

        let (tx, rx) = mpsc::channel();
        let mut session = SessionConfig::default()
            .connect(mock, Arc::new(ChannelObserver::new(tx)))
            .unwrap();

        let mut request = ImeiRepair::new(IMEI_A.parse().unwrap(), Some(IMEI_B.parse().unwrap()));
        request.inter_write_delay = Duration::ZERO;

        let report = repair_imei(&mut session, &request).unwrap();
        assert!(!report.is_complete());
        assert!(matches!(report.secondary, Some(Err(NvramError::NoAck { .. }))));

        let logs = log_messages(&rx);
        let errors: Vec<usize> = logs
            .iter()
            .enumerate()
            .filter(|(_, (severity, _))| *severity == Severity::Error)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(logs[errors[0]].1.contains("LID 151"));
        assert!(logs[errors[0] - 1].1.contains("Preparing IMEI 2"));
    }

    #[test]
    fn test_direct_write_failures_are_logged() {
        let mock = MockChannel::new();
        mock.push_inbound(b"READY");
        mock.queue_reply(b"ATEMATEM");
        mock.queue_reply(&[0x15]);

        let (tx, rx) = mpsc::channel();
        let mut session = SessionConfig::default()
            .connect(mock, Arc::new(ChannelObserver::new(tx)))
            .unwrap();
        rx.try_iter().for_each(drop);

        assert!(session.write_imei(LID_IMEI, IMEI_A).is_err());
        let errors = error_count(&log_messages(&rx));
        assert_eq!(errors, 1);

        assert!(session.write_imei(LID_IMEI, "12345").is_err());
        let logs = log_messages(&rx);
        assert_eq!(error_count(&logs), 1);
        assert!(logs[0].1.contains("15 decimal digits"));
    }

    #[test]
    fn test_ack_is_logged_as_success() {
        let mock = MockChannel::new();
        mock.push_inbound(b"READY");
        mock.queue_reply(b"ATEMATEM");
        mock.queue_reply(&[0x06]);

        let (tx, rx) = mpsc::channel();
        let mut session = SessionConfig::default()
            .connect(mock, Arc::new(ChannelObserver::new(tx)))
            .unwrap();
        rx.try_iter().for_each(drop);

        session.write_imei(LID_IMEI, IMEI_A).unwrap();
        let logs = log_messages(&rx);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0, Severity::Success);
    }

    #[test]
    fn test_stale_ack_byte_is_not_taken_for_ack() {
        let (mut session, mock) = mock_session();
        short_ack_wait(&mut session);
        assert!(matches!(
            session.send(Opcode::GetSocId),
            Err(ProtocolError::Timeout { .. })
        ));

        // Late SOC ID answer containing 0x06, then silence.
        let mut late = [0x30u8; 32];
        late[7] = NVRAM_ACK;
        mock.push_inbound(&late);

        match session.write_imei(LID_IMEI, IMEI_A) {
            Err(NvramError::NoAck { response, .. }) => assert!(response.is_empty()),
            other => panic!("expected NoAck, got {:?}", other),
        }
    }

    #[test]
    fn test_repair_from_config() {
        let config = SessionConfig {
            imei_lid: LID_IMEI_LEGACY,
            imei_write_delay_ms: 750,
            ..Default::default()
        };
        let request = ImeiRepair::from_config(&config, IMEI_A.parse().unwrap(), None);
        assert_eq!(request.lid, 5);
        assert_eq!(request.inter_write_delay, Duration::from_millis(750));
    }
}
