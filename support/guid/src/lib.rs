// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provides the [`Guid`] type with the same layout as the Windows type `GUID`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::str::FromStr;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Windows format GUID.
#[repr(C)]
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
#[expect(missing_docs)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

// Default + FromBytes: null-guid is a reasonable return default
impl Default for Guid {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl Guid {
    /// Return a new randomly-generated Version 4 UUID
    pub fn new_random() -> Self {
        let mut guid = Guid::default();
        getrandom::getrandom(guid.as_mut_bytes()).expect("rng failure");

        guid.data3 = guid.data3 & 0xfff | 0x4000;
        // Variant 1
        guid.data4[0] = guid.data4[0] & 0x3f | 0x80;

        guid
    }

    /// Parses the accepted formats "{00000000-0000-0000-0000-000000000000}"
    /// and "00000000-0000-0000-0000-000000000000".
    fn parse(value: &[u8]) -> Result<Self, ParseError> {
        let inner = match value.len() {
            36 => value,
            38 => {
                if value[0] != b'{' || value[37] != b'}' {
                    return Err(ParseError::Format);
                }
                &value[1..37]
            }
            _ => return Err(ParseError::Length),
        };

        if inner[8] != b'-' || inner[13] != b'-' || inner[18] != b'-' || inner[23] != b'-' {
            return Err(ParseError::Format);
        }

        let hex = |range: std::ops::Range<usize>| -> Result<u64, ParseError> {
            let digits = std::str::from_utf8(&inner[range]).map_err(|_| ParseError::Digit)?;
            if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError::Digit);
            }
            u64::from_str_radix(digits, 16).map_err(|_| ParseError::Digit)
        };

        let d4a = (hex(19..23)? as u16).to_be_bytes();
        let d4b = hex(24..36)?.to_be_bytes();
        Ok(Guid {
            data1: hex(0..8)? as u32,
            data2: hex(9..13)? as u16,
            data3: hex(14..18)? as u16,
            data4: [
                d4a[0], d4a[1], d4b[2], d4b[3], d4b[4], d4b[5], d4b[6], d4b[7],
            ],
        })
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// An error parsing a GUID.
#[derive(Debug, Error)]
#[expect(missing_docs)]
pub enum ParseError {
    #[error("invalid GUID length")]
    Length,
    #[error("invalid GUID format")]
    Format,
    #[error("invalid GUID digit")]
    Digit,
}

impl FromStr for Guid {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::Guid;
    use super::ParseError;

    #[test]
    fn test_display_guid() {
        let guid = Guid {
            data1: 0xcf127acc,
            data2: 0xc960,
            data3: 0x41e4,
            data4: [0x9b, 0x1e, 0x51, 0x3e, 0x8a, 0x89, 0x14, 0x7d],
        };
        assert_eq!(format!("{}", &guid), "cf127acc-c960-41e4-9b1e-513e8a89147d");
    }

    #[test]
    fn test_parse_guid() {
        let guid = Guid {
            data1: 0xcf127acc,
            data2: 0xc960,
            data3: 0x41e4,
            data4: [0x9b, 0x1e, 0x51, 0x3e, 0x8a, 0x89, 0x14, 0x7d],
        };
        assert_eq!(
            guid,
            "cf127acc-c960-41e4-9b1e-513e8a89147d"
                .parse()
                .expect("valid GUID")
        );
        assert_eq!(
            guid,
            "{cf127acc-c960-41e4-9b1e-513e8a89147d}"
                .parse()
                .expect("valid braced GUID")
        );
    }

    #[test]
    fn test_parse_guid_errors() {
        assert!(matches!(
            "cf127acc".parse::<Guid>(),
            Err(ParseError::Length)
        ));
        assert!(matches!(
            "cf127acc-c960-41e4-9b1e+513e8a89147d".parse::<Guid>(),
            Err(ParseError::Format)
        ));
        assert!(matches!(
            "{cf127acc-c960-41e4-9b1e-513e8a89147d)".parse::<Guid>(),
            Err(ParseError::Format)
        ));
        assert!(matches!(
            "cf127acc-c960-41e4-9b1e-513e8a89147g".parse::<Guid>(),
            Err(ParseError::Digit)
        ));
    }

    #[test]
    fn test_new_random() {
        let a = Guid::new_random();
        let b = Guid::new_random();
        assert_ne!(a, b);
        // Version 4, variant 1.
        assert_eq!(a.data3 >> 12, 4);
        assert_eq!(a.data4[0] >> 6, 0b10);
    }
}
