//! Device information report assembled from individual queries.

use std::fmt;

use tracing::{info, instrument, warn};

use crate::command::ProtocolError;
use crate::decode::{DeviceFact, HealthStatus, LifeTime};
use crate::events::{MetaEvent, MetaObserver, Severity};
use crate::protocol::Opcode;
use crate::session::Session;
use crate::transport::ByteChannel;

/// Opcodes queried for a report, in order.
const REPORT_OPCODES: [Opcode; 4] = [
    Opcode::GetHwCode,
    Opcode::GetSwVersion,
    Opcode::GetMeid,
    Opcode::GetSocId,
];

/// eMMC health registers (EXT_CSD[267], [268], [269]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageHealth {
    pub pre_eol: HealthStatus,
    /// SLC / type A life time estimate.
    pub life_a: LifeTime,
    /// MLC / type B life time estimate.
    pub life_b: LifeTime,
}

impl StorageHealth {
    pub fn from_ext_csd(pre_eol: u8, life_a: u8, life_b: u8) -> Self {
        Self {
            pre_eol: HealthStatus::from_byte(pre_eol),
            life_a: LifeTime::from_byte(life_a),
            life_b: LifeTime::from_byte(life_b),
        }
    }

    pub fn facts(&self) -> [DeviceFact; 3] {
        [
            DeviceFact::PreEol(self.pre_eol),
            DeviceFact::LifeTimeA(self.life_a),
            DeviceFact::LifeTimeB(self.life_b),
        ]
    }
}

/// Where storage health comes from.
///
/// Kept apart from the opcode queries: no meta-mode command for these
/// registers is known, so values must never be presented as decoded state
/// unless a source actually read them.
pub trait StorageInfoSource {
    fn storage_health(&mut self) -> Option<StorageHealth>;
}

/// Source that reports nothing.
pub struct UnverifiedStorage;

impl StorageInfoSource for UnverifiedStorage {
    fn storage_health(&mut self) -> Option<StorageHealth> {
        // TODO: read EXT_CSD[267..=269] once the meta command exposing them is identified.
        None
    }
}

/// Storage values read out of band, e.g. from an EXT_CSD dump.
pub struct KnownStorage(pub StorageHealth);

impl StorageInfoSource for KnownStorage {
    fn storage_health(&mut self) -> Option<StorageHealth> {
        Some(self.0)
    }
}

/// Everything a report run learned about the device.
#[derive(Debug, Default)]
pub struct DeviceReport {
    pub chipset: Option<DeviceFact>,
    pub sw_version: Option<DeviceFact>,
    pub meid: Option<DeviceFact>,
    pub soc_id: Option<DeviceFact>,
    pub storage: Option<StorageHealth>,
    /// Queries that got no usable answer.
    pub failures: Vec<(Opcode, ProtocolError)>,
}

impl DeviceReport {
    fn slot(&mut self, opcode: Opcode) -> Option<&mut Option<DeviceFact>> {
        match opcode {
            Opcode::GetHwCode => Some(&mut self.chipset),
            Opcode::GetSwVersion => Some(&mut self.sw_version),
            Opcode::GetMeid => Some(&mut self.meid),
            Opcode::GetSocId => Some(&mut self.soc_id),
            Opcode::NvramWrite => None,
        }
    }
}

/// Query every known opcode and collect the answers.
///
/// Per-command timeouts and short reads are recorded in
/// [`DeviceReport::failures`]; a closed session or transport failure aborts.
#[instrument(skip_all)]
pub fn read_device_report<C, O, S>(
    session: &mut Session<C, O>,
    storage: &mut S,
) -> Result<DeviceReport, ProtocolError>
where
    C: ByteChannel,
    O: MetaObserver,
    S: StorageInfoSource + ?Sized,
{
    session.ensure_established()?;
    let mut report = DeviceReport::default();

    for opcode in REPORT_OPCODES {
        match session.query(opcode) {
            Ok(fact) => {
                if let Some(slot) = report.slot(opcode) {
                    *slot = Some(fact);
                }
            }
            Err(e @ (ProtocolError::Timeout { .. } | ProtocolError::ShortRead { .. })) => {
                warn!(opcode = %opcode, error = %e, "Query failed, continuing");
                report.failures.push((opcode, e));
            }
            Err(e) => return Err(e),
        }
    }

    report.storage = storage.storage_health();
    if let Some(health) = &report.storage {
        for fact in health.facts() {
            session.emit(MetaEvent::Fact(fact));
        }
    }

    info!(failures = report.failures.len(), "Device report complete");
    let severity = if report.failures.is_empty() {
        Severity::Success
    } else {
        Severity::Error
    };
    session.log(
        severity,
        format!(
            "Device info read: {} of {} queries answered",
            REPORT_OPCODES.len() - report.failures.len(),
            REPORT_OPCODES.len()
        ),
    );
    Ok(report)
}

const RULE: &str = "------------------------------------------------";

fn field(f: &mut fmt::Formatter<'_>, label: &str, value: &Option<DeviceFact>) -> fmt::Result {
    match value {
        Some(fact) => writeln!(f, "{:<13}: {}", label, fact),
        None => writeln!(f, "{:<13}: (no response)", label),
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "================ MTK DEVICE INFO ================")?;
        field(f, "Chipset", &self.chipset)?;
        field(f, "SW Version", &self.sw_version)?;
        field(f, "MEID", &self.meid)?;
        field(f, "SOC_ID", &self.soc_id)?;
        writeln!(f, "{}", RULE)?;
        match &self.storage {
            Some(health) => {
                writeln!(f, "Health Status (eMMC):")?;
                writeln!(f, "  - Pre-EOL Info    : {}", health.pre_eol)?;
                writeln!(f, "  - Life Cycle (SLC): {}", health.life_a)?;
                writeln!(f, "  - Life Cycle (MLC): {}", health.life_b)?;
            }
            None => writeln!(f, "Storage health : unverified (not read from device)")?,
        }
        if !self.failures.is_empty() {
            writeln!(f, "{}", RULE)?;
            for (opcode, err) in &self.failures {
                writeln!(f, "Failed {}: {}", opcode, err)?;
            }
        }
        write!(f, "=================================================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Timeouts;
    use crate::session::testing::mock_session;
    use std::time::Duration;

    fn queue_full_device(mock: &crate::transport::MockChannel) {
        mock.queue_reply(&[0x00, 0x00, 0x67, 0x68]);
        mock.queue_reply(&[0xCA, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        mock.queue_reply(&[0xAB; 16]);
        mock.queue_reply(&[0xCD; 32]);
    }

    #[test]
    fn test_full_report() {
        let (mut session, mock) = mock_session();
        queue_full_device(&mock);

        let report = read_device_report(&mut session, &mut UnverifiedStorage).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(
            report.chipset,
            Some(DeviceFact::Chipset {
                hw_code: 0x6768,
                name: "Helio P65 (MT6768)"
            })
        );
        assert_eq!(
            report.sw_version,
            Some(DeviceFact::SwVersion("CA00000000000001".into()))
        );
        assert_eq!(report.storage, None);
        assert_eq!(
            mock.writes(),
            vec![vec![0xFD], vec![0xFC], vec![0xE1], vec![0xE7]]
        );

        let text = report.to_string();
        assert!(text.contains("Helio P65 (MT6768) (0x6768)"));
        assert!(text.contains(&"AB".repeat(16)));
        assert!(text.contains("unverified"));
    }

    #[test]
    fn test_report_continues_after_timeout() {
        let (mut session, mock) = mock_session();
        session.set_timeouts(Timeouts {
            command: Duration::from_millis(40),
            nvram_ack: Duration::from_millis(40),
        });
        // Only the chipset query is answered.
        mock.queue_reply(&[0x00, 0x00, 0x67, 0x65]);

        let report = read_device_report(&mut session, &mut UnverifiedStorage).unwrap();
        assert!(report.chipset.is_some());
        assert!(report.meid.is_none());
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.failures[0].0, Opcode::GetSwVersion);
        assert!(report.to_string().contains("(no response)"));
    }

    #[test]
    fn test_known_storage_is_rendered() {
        let (mut session, mock) = mock_session();
        queue_full_device(&mock);

        let mut storage = KnownStorage(StorageHealth::from_ext_csd(0x01, 0x01, 0x02));
        let report = read_device_report(&mut session, &mut storage).unwrap();
        let text = report.to_string();
        assert!(text.contains("Normal (Good)"));
        assert!(text.contains("0% - 10% Used (Excellent)"));
        assert!(text.contains("10% - 20% Used (Good)"));
    }

    #[test]
    fn test_report_requires_session() {
        let (mut session, mock) = mock_session();
        session.close();
        assert!(matches!(
            read_device_report(&mut session, &mut UnverifiedStorage),
            Err(ProtocolError::NotEstablished)
        ));
        assert!(mock.writes().is_empty());
    }
}
