//! Bit flags describing how a key's value should be rendered as YAML:
//! block vs. flow, sequence vs. mapping.

use std::fmt;

/// `LNKF_*` equivalent: how a key's nested value collection renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyFormat(u8);

impl KeyFormat {
    /// Render as YAML flow style (`{ ... }` / `[ ... ]`) instead of
    /// block style.
    pub const FLOW: KeyFormat = KeyFormat(1 << 0);
    /// Render as a block sequence (`- item`).
    pub const SEQUENCE: KeyFormat = KeyFormat(1 << 1);
    /// Render as a block mapping (`key: value`).
    pub const MAPPING: KeyFormat = KeyFormat(1 << 2);

    /// The empty format (no flags set).
    #[must_use]
    pub const fn none() -> Self {
        KeyFormat(0)
    }

    /// Build a format value from a raw bitmask as carried on the wire.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        KeyFormat(bits)
    }

    /// The raw bitmask, for re-serialization.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `self` carries every flag set in `other`.
    #[must_use]
    pub const fn contains(self, other: KeyFormat) -> bool {
        self.0 & other.0 == other.0
    }

    /// The union of `self` and `other`.
    #[must_use]
    pub const fn union(self, other: KeyFormat) -> Self {
        KeyFormat(self.0 | other.0)
    }

    /// `self` with every flag in `other` cleared.
    #[must_use]
    pub const fn without(self, other: KeyFormat) -> Self {
        KeyFormat(self.0 & !other.0)
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::FLOW) {
            parts.push("flow");
        }
        if self.contains(Self::SEQUENCE) {
            parts.push("sequence");
        }
        if self.contains(Self::MAPPING) {
            parts.push("mapping");
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_without_round_trip() {
        let format = KeyFormat::SEQUENCE.union(KeyFormat::MAPPING);
        assert!(format.contains(KeyFormat::SEQUENCE));
        assert!(format.contains(KeyFormat::MAPPING));
        let cleared = format.without(KeyFormat::SEQUENCE);
        assert!(!cleared.contains(KeyFormat::SEQUENCE));
        assert!(cleared.contains(KeyFormat::MAPPING));
    }

    #[test]
    fn bits_round_trip() {
        let format = KeyFormat::FLOW.union(KeyFormat::SEQUENCE);
        assert_eq!(KeyFormat::from_bits(format.bits()), format);
    }
}
