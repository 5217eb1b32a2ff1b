//! Protocol module - meta-mode wire definitions.

pub mod constants;
pub mod opcode;

pub use constants::*;
pub use opcode::{Opcode, Response};

/// Whether `needle` occurs anywhere in `haystack`.
pub fn contains_sequence(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_sequence() {
        assert!(contains_sequence(b"..READY..", b"READY"));
        assert!(contains_sequence(b"READY", b"READY"));
        assert!(!contains_sequence(b"READ", b"READY"));
        assert!(!contains_sequence(b"", b"OK"));
        assert!(contains_sequence(b"\x15\x06", &[NVRAM_ACK]));
    }
}
