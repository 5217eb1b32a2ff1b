//! Semantic decoding of command responses and storage health registers.
//!
//! Every decoder here is total: any input maps to exactly one value.

use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::protocol::Opcode;

/// Known chipset hardware codes.
const CHIPSETS: &[(u32, &str)] = &[
    (0x6765, "Helio P35 (MT6765)"),
    (0x6768, "Helio P65 (MT6768)"),
    (0x6833, "Dimensity 700 (MT6833)"),
    (0x6785, "Helio G90T (MT6785)"),
];

/// Label for hardware codes missing from the table.
pub const GENERIC_CHIPSET: &str = "MTK Generic";

/// Marketing name for a hardware code.
pub fn chipset_name(hw_code: u32) -> &'static str {
    CHIPSETS
        .iter()
        .find(|(code, _)| *code == hw_code)
        .map(|(_, name)| *name)
        .unwrap_or(GENERIC_CHIPSET)
}

/// Big-endian hardware code from a `GET_HW_CODE` response.
pub fn hw_code_from_bytes(data: &[u8]) -> Option<u32> {
    Cursor::new(data).read_u32::<BigEndian>().ok()
}

/// Uppercase hex without separators.
pub fn hex_upper(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

/// eMMC Pre-EOL information (EXT_CSD[267]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Normal,
    /// 80% of reserved blocks consumed.
    Warning,
    /// 90% of reserved blocks consumed.
    Urgent,
    Unknown(u8),
}

impl HealthStatus {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 => HealthStatus::Normal,
            0x02 => HealthStatus::Warning,
            0x03 => HealthStatus::Urgent,
            other => HealthStatus::Unknown(other),
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Normal => write!(f, "Normal (Good)"),
            HealthStatus::Warning => write!(f, "Warning (Consumed < 80%)"),
            HealthStatus::Urgent => write!(f, "Urgent (Consumed > 90% - Backup Data!)"),
            HealthStatus::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

/// eMMC device life time estimation (EXT_CSD[268] / [269]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeTime {
    /// Between `(decile - 1) * 10` and `decile * 10` percent used, decile in 1..=10.
    Consumed { decile: u8 },
    /// Exceeded its maximum estimated life.
    Exhausted,
    /// Register not populated yet.
    Unavailable(u8),
}

impl LifeTime {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01..=0x0A => LifeTime::Consumed { decile: value },
            0x0B => LifeTime::Exhausted,
            other => LifeTime::Unavailable(other),
        }
    }

    fn rating(decile: u8) -> &'static str {
        match decile {
            1 => "Excellent",
            2 => "Good",
            3..=6 => "Normal",
            7..=9 => "Warning",
            _ => "Urgent",
        }
    }
}

impl fmt::Display for LifeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LifeTime::Consumed { decile } => write!(
                f,
                "{}% - {}% Used ({})",
                (decile - 1) as u32 * 10,
                decile as u32 * 10,
                Self::rating(decile)
            ),
            LifeTime::Exhausted => write!(f, "Exceeded Maximum Life (Dead)"),
            LifeTime::Unavailable(_) => write!(f, "Reading..."),
        }
    }
}

/// A decoded piece of device state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFact {
    Chipset { hw_code: u32, name: &'static str },
    SwVersion(String),
    Meid(String),
    SocId(String),
    PreEol(HealthStatus),
    LifeTimeA(LifeTime),
    LifeTimeB(LifeTime),
}

impl DeviceFact {
    /// Decode a fixed-length response for `opcode`.
    ///
    /// Returns `None` for opcodes that carry no device fact.
    pub fn decode(opcode: Opcode, data: &[u8]) -> Option<Self> {
        match opcode {
            Opcode::GetHwCode => hw_code_from_bytes(data).map(|hw_code| DeviceFact::Chipset {
                hw_code,
                name: chipset_name(hw_code),
            }),
            Opcode::GetSwVersion => Some(DeviceFact::SwVersion(hex_upper(data))),
            Opcode::GetMeid => Some(DeviceFact::Meid(hex_upper(data))),
            Opcode::GetSocId => Some(DeviceFact::SocId(hex_upper(data))),
            Opcode::NvramWrite => None,
        }
    }

    /// Opcode that produced this fact, if any.
    pub fn source(&self) -> Option<Opcode> {
        match self {
            DeviceFact::Chipset { .. } => Some(Opcode::GetHwCode),
            DeviceFact::SwVersion(_) => Some(Opcode::GetSwVersion),
            DeviceFact::Meid(_) => Some(Opcode::GetMeid),
            DeviceFact::SocId(_) => Some(Opcode::GetSocId),
            DeviceFact::PreEol(_) | DeviceFact::LifeTimeA(_) | DeviceFact::LifeTimeB(_) => None,
        }
    }
}

impl fmt::Display for DeviceFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFact::Chipset { hw_code, name } => write!(f, "{} (0x{:X})", name, hw_code),
            DeviceFact::SwVersion(hex) | DeviceFact::Meid(hex) | DeviceFact::SocId(hex) => {
                write!(f, "{}", hex)
            }
            DeviceFact::PreEol(status) => write!(f, "{}", status),
            DeviceFact::LifeTimeA(life) | DeviceFact::LifeTimeB(life) => write!(f, "{}", life),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chipset_table() {
        assert_eq!(chipset_name(0x0000_6765), "Helio P35 (MT6765)");
        assert_eq!(chipset_name(0x6768), "Helio P65 (MT6768)");
        assert_eq!(chipset_name(0x6833), "Dimensity 700 (MT6833)");
        assert_eq!(chipset_name(0x6785), "Helio G90T (MT6785)");
        assert_eq!(chipset_name(0xFFFF_FFFF), "MTK Generic");
        assert_eq!(chipset_name(0), GENERIC_CHIPSET);
    }

    #[test]
    fn test_hw_code_big_endian() {
        assert_eq!(hw_code_from_bytes(&[0x00, 0x00, 0x67, 0x65]), Some(0x6765));
        assert_eq!(hw_code_from_bytes(&[0x12, 0x34, 0x56, 0x78, 0xFF]), Some(0x1234_5678));
        assert_eq!(hw_code_from_bytes(&[0x67, 0x65]), None);
    }

    #[test]
    fn test_health_status_buckets() {
        assert_eq!(HealthStatus::from_byte(0x01), HealthStatus::Normal);
        assert_eq!(HealthStatus::from_byte(0x02), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_byte(0x03), HealthStatus::Urgent);
        assert_eq!(HealthStatus::from_byte(0xFF), HealthStatus::Unknown(0xFF));
        assert_eq!(HealthStatus::from_byte(0x00).to_string(), "Unknown");
    }

    #[test]
    fn test_life_time_buckets() {
        assert_eq!(
            LifeTime::from_byte(0x01).to_string(),
            "0% - 10% Used (Excellent)"
        );
        assert_eq!(LifeTime::from_byte(0x02).to_string(), "10% - 20% Used (Good)");
        assert_eq!(LifeTime::from_byte(0x06).to_string(), "50% - 60% Used (Normal)");
        assert_eq!(LifeTime::from_byte(0x07).to_string(), "60% - 70% Used (Warning)");
        assert_eq!(LifeTime::from_byte(0x09).to_string(), "80% - 90% Used (Warning)");
        assert_eq!(LifeTime::from_byte(0x0A).to_string(), "90% - 100% Used (Urgent)");
        assert_eq!(LifeTime::from_byte(0x0B), LifeTime::Exhausted);
        assert_eq!(LifeTime::from_byte(0x0B).to_string(), "Exceeded Maximum Life (Dead)");
        assert_eq!(LifeTime::from_byte(0xFF).to_string(), "Reading...");
        assert_eq!(LifeTime::from_byte(0x00).to_string(), "Reading...");
    }

    #[test]
    fn test_decoders_are_total() {
        for value in 0..=u8::MAX {
            let health = HealthStatus::from_byte(value);
            assert!(!health.to_string().is_empty());
            let life = LifeTime::from_byte(value);
            assert!(!life.to_string().is_empty());
            if (0x01..=0x0B).contains(&value) {
                assert!(!matches!(life, LifeTime::Unavailable(_)));
            } else {
                assert_eq!(life, LifeTime::Unavailable(value));
            }
        }
    }

    #[test]
    fn test_fact_decode() {
        let fact = DeviceFact::decode(Opcode::GetHwCode, &[0, 0, 0x68, 0x33]).unwrap();
        assert_eq!(
            fact,
            DeviceFact::Chipset {
                hw_code: 0x6833,
                name: "Dimensity 700 (MT6833)"
            }
        );
        assert_eq!(fact.source(), Some(Opcode::GetHwCode));
        assert_eq!(fact.to_string(), "Dimensity 700 (MT6833) (0x6833)");

        let sw = DeviceFact::decode(Opcode::GetSwVersion, &[0xCA, 0x00, 0x01, 0xFE]).unwrap();
        assert_eq!(sw, DeviceFact::SwVersion("CA0001FE".into()));

        assert_eq!(DeviceFact::decode(Opcode::NvramWrite, &[0x06]), None);
        assert_eq!(DeviceFact::PreEol(HealthStatus::Normal).source(), None);
    }
}
