//! Certificate fingerprints and their text form
//!
//! A fingerprint is the SHA-1 of one certificate's DER bytes. On disk and in
//! logs it is written as twenty uppercase hex pairs separated by single
//! spaces:
//!
//! ```text
//! 3F 2A 09 C1 77 0E 5B 91 24 D8 6A 10 FF 03 8C 4E 21 B7 90 00
//! ```

use core::fmt;
use core::str::FromStr;

use heapless::String;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

/// Digest length in bytes
pub const FINGERPRINT_LEN: usize = 20;

/// Length of the text form: 20 pairs and 19 separators
pub const FINGERPRINT_TEXT_LEN: usize = FINGERPRINT_LEN * 3 - 1;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA-1 digest of a single certificate
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

/// Text that is not a well-formed fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FingerprintParseError {
    /// Text is not exactly 59 bytes long
    Length,
    /// A pair is not followed by a single space
    Separator { position: usize },
    /// A character is not a hex digit
    Digit { position: usize },
}

impl fmt::Display for FingerprintParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => write!(f, "fingerprint must be {} characters", FINGERPRINT_TEXT_LEN),
            Self::Separator { position } => write!(f, "expected space at {}", position),
            Self::Digit { position } => write!(f, "expected hex digit at {}", position),
        }
    }
}

impl core::error::Error for FingerprintParseError {}

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Constant-time comparison for pin checks
    pub fn matches(&self, pin: &Fingerprint) -> bool {
        self.0.ct_eq(&pin.0).into()
    }

    /// Render the on-disk text form
    pub fn to_text(&self) -> String<FINGERPRINT_TEXT_LEN> {
        let mut text = String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                // Capacity is exactly 59, these pushes cannot overflow
                let _ = text.push(' ');
            }
            let _ = text.push(HEX_UPPER[usize::from(byte >> 4)] as char);
            let _ = text.push(HEX_UPPER[usize::from(byte & 0x0f)] as char);
        }
        text
    }

    /// Parse the text form. Hex digits may be in either case.
    pub fn parse(text: &str) -> Result<Self, FingerprintParseError> {
        let raw = text.as_bytes();
        if raw.len() != FINGERPRINT_TEXT_LEN {
            return Err(FingerprintParseError::Length);
        }

        let mut bytes = [0u8; FINGERPRINT_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let at = i * 3;
            let high = nibble(raw[at]).ok_or(FingerprintParseError::Digit { position: at })?;
            let low =
                nibble(raw[at + 1]).ok_or(FingerprintParseError::Digit { position: at + 1 })?;
            *byte = (high << 4) | low;

            if i + 1 < FINGERPRINT_LEN && raw[at + 2] != b' ' {
                return Err(FingerprintParseError::Separator { position: at + 2 });
            }
        }
        Ok(Self(bytes))
    }
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_text().as_str())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_text().as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Fingerprint {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.to_text().as_str())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.to_text().as_str())
    }
}

struct FingerprintVisitor;

impl Visitor<'_> for FingerprintVisitor {
    type Value = Fingerprint;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a fingerprint as 20 space-separated hex pairs")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Fingerprint::parse(v).map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(FingerprintVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "3F 2A 09 C1 77 0E 5B 91 24 D8 6A 10 FF 03 8C 4E 21 B7 90 00";

    #[test]
    fn test_text_form_shape() {
        let fp = Fingerprint::parse(SAMPLE).unwrap();
        let text = fp.to_text();
        assert_eq!(text.len(), FINGERPRINT_TEXT_LEN);
        assert_eq!(text.as_str(), SAMPLE);
        assert_eq!(fp.as_bytes()[0], 0x3F);
        assert_eq!(fp.as_bytes()[19], 0x00);
    }

    #[test]
    fn test_parse_accepts_lowercase() {
        let lower = SAMPLE.to_ascii_lowercase();
        assert_eq!(
            Fingerprint::parse(&lower).unwrap(),
            Fingerprint::parse(SAMPLE).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Fingerprint::parse(""), Err(FingerprintParseError::Length));
        assert_eq!(
            Fingerprint::parse(&SAMPLE[..56]),
            Err(FingerprintParseError::Length)
        );

        let colons = SAMPLE.replace(' ', ":");
        assert_eq!(
            Fingerprint::parse(&colons),
            Err(FingerprintParseError::Separator { position: 2 })
        );

        let mut bad_digit = String::<64>::new();
        bad_digit.push_str("3G").unwrap();
        bad_digit.push_str(&SAMPLE[2..]).unwrap();
        assert_eq!(
            Fingerprint::parse(&bad_digit),
            Err(FingerprintParseError::Digit { position: 1 })
        );
    }

    #[test]
    fn test_matches_is_byte_exact() {
        let pin = Fingerprint::parse(SAMPLE).unwrap();
        assert!(pin.matches(&pin));

        for i in 0..FINGERPRINT_LEN {
            let mut bytes = *pin.as_bytes();
            bytes[i] ^= 0x01;
            assert!(!Fingerprint::from_bytes(bytes).matches(&pin));
        }
    }

    #[test]
    fn test_display_and_debug() {
        let fp = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(format!("{}", fp), SAMPLE);
        assert_eq!(format!("{:?}", fp), format!("Fingerprint({})", SAMPLE));
    }

    proptest! {
        #[test]
        fn text_form_round_trips(bytes in any::<[u8; FINGERPRINT_LEN]>()) {
            let fp = Fingerprint::from_bytes(bytes);
            let text = fp.to_text();
            prop_assert_eq!(text.len(), FINGERPRINT_TEXT_LEN);
            prop_assert_eq!(Fingerprint::parse(text.as_str()), Ok(fp));
            prop_assert_eq!(text.as_str(), text.as_str().to_ascii_uppercase());
        }
    }
}
