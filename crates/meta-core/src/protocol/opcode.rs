//! Single-byte command opcodes and their response shapes.

use std::fmt;

/// Commands understood by the preloader in meta mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Chipset hardware code (4 bytes, big-endian).
    GetHwCode = 0xFD,
    /// Hardware/software version (8 bytes).
    GetSwVersion = 0xFC,
    /// Mediatek Equipment ID (16 bytes).
    GetMeid = 0xE1,
    /// SoC unique ID (32 bytes).
    GetSocId = 0xE7,
    /// NVRAM record write. Answered with a short status.
    NvramWrite = 0x01,
}

/// Shape of the device's answer to an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Exactly this many bytes.
    Fixed(usize),
    /// Short, variable status (ACK byte or text).
    Status,
}

impl Opcode {
    /// Every known opcode.
    pub const ALL: [Opcode; 5] = [
        Opcode::GetHwCode,
        Opcode::GetSwVersion,
        Opcode::GetMeid,
        Opcode::GetSocId,
        Opcode::NvramWrite,
    ];

    /// Wire byte.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub const fn response(self) -> Response {
        match self {
            Opcode::GetHwCode => Response::Fixed(4),
            Opcode::GetSwVersion => Response::Fixed(8),
            Opcode::GetMeid => Response::Fixed(16),
            Opcode::GetSocId => Response::Fixed(32),
            Opcode::NvramWrite => Response::Status,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::GetHwCode => "GET_HW_CODE",
            Opcode::GetSwVersion => "GET_SW_VERSION",
            Opcode::GetMeid => "GET_MEID",
            Opcode::GetSocId => "GET_SOC_ID",
            Opcode::NvramWrite => "NVRAM_WRITE",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.byte())
    }
}
