//! Wire constants for the MTK preloader meta-mode protocol.

// ============================================================================
// Handshake
// ============================================================================

/// Sent by the preloader while it waits for a mode request.
pub const READY_SIGNAL: &[u8] = b"READY";

/// Mode string requesting meta mode.
pub const DEFAULT_META_MODE: &str = "METAMETA";

/// Length of the mode acknowledgement.
pub const MODE_ACK_LEN: usize = 8;

/// Acknowledgements accepted after the mode string. Firmware families differ.
pub const MODE_ACKS: &[&[u8; MODE_ACK_LEN]] = &[b"ATEMATEM", b"READYATE"];

// ============================================================================
// NVRAM
// ============================================================================

/// Frame type byte for an NVRAM record write.
pub const NVRAM_CMD_WRITE: u8 = 0x01;

/// IMEI/IMEISV record on current Android devices (NVRAM_EF_IMEI_IMEISV_LID).
pub const LID_IMEI: u8 = 151;

/// IMEI record on legacy feature phones.
pub const LID_IMEI_LEGACY: u8 = 5;

/// Positive acknowledgement control byte.
pub const NVRAM_ACK: u8 = 0x06;

/// Textual positive acknowledgement.
pub const NVRAM_ACK_TEXT: &[u8] = b"OK";

// ============================================================================
// IMEI encoding
// ============================================================================

/// Number of decimal digits in an IMEI.
pub const IMEI_DIGITS: usize = 15;

/// First header byte of an encoded IMEI record.
pub const BCD_HEADER_LEN: u8 = 0x08;

/// Second header byte of an encoded IMEI record.
pub const BCD_HEADER_TYPE: u8 = 0x3A;

/// High nibble padding the final odd digit.
pub const BCD_FILLER: u8 = 0x0F;

// ============================================================================
// Timeouts (milliseconds)
// ============================================================================

pub const READY_TIMEOUT_MS: u64 = 5000;
pub const READY_POLL_SLICE_MS: u64 = 100;
pub const MODE_ACK_TIMEOUT_MS: u64 = 1000;
pub const COMMAND_TIMEOUT_MS: u64 = 1000;
pub const NVRAM_ACK_TIMEOUT_MS: u64 = 2000;

/// Pause between two record writes so the NVRAM task can commit the first.
pub const IMEI_WRITE_DELAY_MS: u64 = 500;
