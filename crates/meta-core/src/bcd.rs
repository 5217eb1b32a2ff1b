//! IMEI to MTK packed-BCD conversion.
//!
//! Layout of an encoded record:
//!
//! ```text
//! [0x08][0x3A][d2|d1][d4|d3]...[d14|d13][F|d15]
//! ```
//!
//! Each byte holds two digits with the later digit in the high nibble. The
//! fifteenth digit sits in the low nibble of the last byte under a `0xF` filler.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::constants::{BCD_FILLER, BCD_HEADER_LEN, BCD_HEADER_TYPE, IMEI_DIGITS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid IMEI {input:?}: expected 15 decimal digits")]
    InvalidImei { input: String },
}

/// A validated 15-digit IMEI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImeiRecord {
    digits: [u8; IMEI_DIGITS],
}

impl ImeiRecord {
    pub fn parse(input: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidImei {
            input: input.to_string(),
        };

        let bytes = input.as_bytes();
        if bytes.len() != IMEI_DIGITS {
            return Err(invalid());
        }

        let mut digits = [0u8; IMEI_DIGITS];
        for (slot, &c) in digits.iter_mut().zip(bytes) {
            if !c.is_ascii_digit() {
                return Err(invalid());
            }
            *slot = c - b'0';
        }
        Ok(Self { digits })
    }

    /// Digit values, most significant first.
    pub fn digits(&self) -> &[u8; IMEI_DIGITS] {
        &self.digits
    }

    pub fn encode(&self) -> BcdPayload {
        let mut bytes = [0u8; PAYLOAD_LEN];
        bytes[0] = BCD_HEADER_LEN;
        bytes[1] = BCD_HEADER_TYPE;
        for (out, pair) in bytes[2..9].iter_mut().zip(self.digits[..14].chunks_exact(2)) {
            *out = (pair[1] << 4) | pair[0];
        }
        bytes[9] = (BCD_FILLER << 4) | self.digits[14];
        BcdPayload { bytes }
    }
}

impl FromStr for ImeiRecord {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImeiRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.digits {
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

/// Two header bytes, seven digit pairs, one trailing digit.
const PAYLOAD_LEN: usize = 10;

/// Encoded IMEI record as written to NVRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcdPayload {
    bytes: [u8; PAYLOAD_LEN],
}

impl BcdPayload {
    pub const LEN: usize = PAYLOAD_LEN;

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        Self::LEN
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl AsRef<[u8]> for BcdPayload {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Validate and encode an IMEI string.
pub fn encode(imei: &str) -> Result<BcdPayload, CodecError> {
    Ok(ImeiRecord::parse(imei)?.encode())
}
