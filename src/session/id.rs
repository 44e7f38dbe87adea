//! Session identifier type.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Number of hex digits in the text form of a [`SessionId`].
const ID_LEN: usize = 16;

/// Identifier of a live session.
///
/// Session IDs are 64 random bits displayed as 16 lowercase hex digits.
/// Collisions are not detected; with 64 bits they are negligible for any
/// realistic number of sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Draw a fresh random session ID.
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a SessionId from a raw u64 value.
    ///
    /// This is primarily for testing.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = crate::error::ReplTunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Some(s)
            .filter(|hex| hex.len() == ID_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(SessionId)
            .ok_or_else(|| crate::error::ReplTunnelError::SessionNotFound(s.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = SessionId::generate();
            assert!(ids.insert(id), "Duplicate ID generated: {}", id);
        }
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_display_format() {
        let id = SessionId::from_raw(255);
        assert_eq!(id.to_string(), "00000000000000ff");

        let id2 = SessionId::from_raw(0x1234_5678_9abc_def0);
        assert_eq!(id2.to_string(), "123456789abcdef0");
    }

    #[test]
    fn test_generated_ids_are_fixed_length_hex() {
        for _ in 0..100 {
            let text = SessionId::generate().to_string();
            assert_eq!(text.len(), 16);
            assert!(text
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn test_parse_valid() {
        let id: SessionId = "00000000000000ff".parse().unwrap();
        assert_eq!(id.as_u64(), 255);

        let id2: SessionId = "123456789ABCDEF0".parse().unwrap();
        assert_eq!(id2.as_u64(), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_parse_invalid() {
        // Too short
        assert!("ff".parse::<SessionId>().is_err());

        // Too long
        assert!("00000000000000ff0".parse::<SessionId>().is_err());

        // Invalid hex
        assert!("gggggggggggggggg".parse::<SessionId>().is_err());

        // Sign accepted by from_str_radix
        assert!("+00000000000000f".parse::<SessionId>().is_err());

        // Empty
        assert!("".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_roundtrip() {
        let original = SessionId::generate();
        let s = original.to_string();
        let parsed: SessionId = s.parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_hash_eq() {
        let id1 = SessionId::from_raw(42);
        let id2 = SessionId::from_raw(42);
        let id3 = SessionId::from_raw(43);

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);

        let mut set = HashSet::new();
        set.insert(id1);
        assert!(set.contains(&id2));
        assert!(!set.contains(&id3));
    }
}
