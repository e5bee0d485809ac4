//! Capped collection capacity parsing.
//!
//! Capacities are given either as an exact byte count or as a magnitude with a
//! binary unit (`"512kb"`, `"7 MB"`, `"1.5gib"`). Every unit is a power of 1024.

use core::fmt;
use core::num::IntErrorKind;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SizeError;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Maximum byte size of a capped collection, fixed at creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "u64")]
pub struct CollectionSize(u64);

impl CollectionSize {
    /// 1 MiB, used when a channel does not ask for a size.
    pub const DEFAULT: CollectionSize = CollectionSize(MIB);

    pub fn from_bytes(bytes: u64) -> Result<Self, SizeError> {
        if bytes == 0 {
            return Err(SizeError::Zero);
        }
        Ok(Self(bytes))
    }

    /// Parse a human-readable capacity into an exact byte count.
    pub fn parse(input: &str) -> Result<Self, SizeError> {
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (magnitude, unit) = trimmed.split_at(split);

        if magnitude.is_empty() {
            return Err(SizeError::Invalid(input.to_string()));
        }

        let multiplier = unit_multiplier(&unit.trim().to_ascii_lowercase())
            .ok_or_else(|| SizeError::Invalid(input.to_string()))?;

        let bytes = if magnitude.contains('.') {
            let value: f64 = magnitude
                .parse()
                .map_err(|_| SizeError::Invalid(input.to_string()))?;
            let scaled = (value * multiplier as f64).floor();
            if !scaled.is_finite() || scaled >= u64::MAX as f64 {
                return Err(SizeError::Overflow(input.to_string()));
            }
            scaled as u64
        } else {
            let value: u64 = magnitude.parse().map_err(|e: core::num::ParseIntError| {
                if *e.kind() == IntErrorKind::PosOverflow {
                    SizeError::Overflow(input.to_string())
                } else {
                    SizeError::Invalid(input.to_string())
                }
            })?;
            value
                .checked_mul(multiplier)
                .ok_or_else(|| SizeError::Overflow(input.to_string()))?
        };

        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl Default for CollectionSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "" | "b" | "byte" | "bytes" => Some(1),
        "k" | "kb" | "kib" | "kilobyte" | "kilobytes" => Some(KIB),
        "m" | "mb" | "mib" | "megabyte" | "megabytes" => Some(MIB),
        "g" | "gb" | "gib" | "gigabyte" | "gigabytes" => Some(GIB),
        _ => None,
    }
}

impl FromStr for CollectionSize {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<u64> for CollectionSize {
    type Error = SizeError;

    fn try_from(bytes: u64) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<CollectionSize> for u64 {
    fn from(size: CollectionSize) -> Self {
        size.0
    }
}

impl fmt::Display for CollectionSize {
    /// Renders the largest unit that divides the size exactly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes % GIB == 0 {
            write!(f, "{}gb", bytes / GIB)
        } else if bytes % MIB == 0 {
            write!(f, "{}mb", bytes / MIB)
        } else if bytes % KIB == 0 {
            write!(f, "{}kb", bytes / KIB)
        } else {
            write!(f, "{bytes}")
        }
    }
}

/// Accepts either `7340032` or `"7mb"` in configuration files.
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Bytes(u64),
    Text(String),
}

impl TryFrom<SizeRepr> for CollectionSize {
    type Error = SizeError;

    fn try_from(repr: SizeRepr) -> Result<Self, Self::Error> {
        match repr {
            SizeRepr::Bytes(bytes) => Self::from_bytes(bytes),
            SizeRepr::Text(text) => Self::parse(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_is_one_mebibyte() {
        assert_eq!(CollectionSize::default().bytes(), 1_048_576);
    }

    #[test]
    fn seven_megabytes_is_exact() {
        for input in ["7mb", "7MB", "7 mb", "7m", "7MiB", "7 megabytes"] {
            assert_eq!(
                CollectionSize::parse(input).unwrap().bytes(),
                7 * 1_048_576,
                "input {input}"
            );
        }
    }

    #[test]
    fn bare_numbers_are_bytes() {
        assert_eq!(CollectionSize::parse("4096").unwrap().bytes(), 4096);
        assert_eq!(CollectionSize::parse(" 10 bytes ").unwrap().bytes(), 10);
    }

    #[test]
    fn decimal_magnitudes_truncate() {
        assert_eq!(CollectionSize::parse("1.5kb").unwrap().bytes(), 1536);
        assert_eq!(CollectionSize::parse("0.5g").unwrap().bytes(), 512 * MIB);
        assert_eq!(CollectionSize::parse("1.0001k").unwrap().bytes(), 1024);
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "mb", "seven mb", "7 parsecs", "-1", "1.2.3kb", "7mb!"] {
            assert!(
                matches!(CollectionSize::parse(input), Err(SizeError::Invalid(_))),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn rejects_zero_and_overflow() {
        assert_eq!(CollectionSize::parse("0kb"), Err(SizeError::Zero));
        assert_eq!(CollectionSize::from_bytes(0), Err(SizeError::Zero));
        assert!(matches!(
            CollectionSize::parse("99999999999999999999"),
            Err(SizeError::Overflow(_))
        ));
        assert!(matches!(
            CollectionSize::parse("17179869184gb"),
            Err(SizeError::Overflow(_))
        ));
    }

    #[test]
    fn deserializes_from_number_or_string() {
        let a: CollectionSize = serde_json::from_value(serde_json::json!(2048)).unwrap();
        let b: CollectionSize = serde_json::from_value(serde_json::json!("2kb")).unwrap();
        assert_eq!(a, b);

        let bad: Result<CollectionSize, _> = serde_json::from_value(serde_json::json!("lots"));
        assert!(bad.is_err());
    }

    proptest! {
        /// Property: every unit multiplies the magnitude by its power of 1024.
        #[test]
        fn units_scale_by_powers_of_1024(n in 1u64..1_000_000u64) {
            prop_assert_eq!(CollectionSize::parse(&format!("{n}k")).unwrap().bytes(), n * KIB);
            prop_assert_eq!(CollectionSize::parse(&format!("{n} MB")).unwrap().bytes(), n * MIB);
            prop_assert_eq!(CollectionSize::parse(&format!("{n}GiB")).unwrap().bytes(), n * GIB);
        }

        /// Property: the rendered form parses back to the same size.
        #[test]
        fn display_parses_back(bytes in 1u64..u64::MAX / 2) {
            let size = CollectionSize::from_bytes(bytes).unwrap();
            prop_assert_eq!(CollectionSize::parse(&size.to_string()).unwrap(), size);
        }
    }
}
