//! Value objects: equality by value, not identity.
//!
//! The quota engine needs a way to say "no limit" without reaching for a float
//! infinity. [`QuestionLimit`] and [`Remaining`] carry that as an explicit
//! variant, and serialize it as the string `"unlimited"` on the wire.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build a
/// new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

const UNLIMITED: &str = "unlimited";

/// Upper bound on questions for a tier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QuestionLimit {
    Limited(u32),
    Unlimited,
}

impl ValueObject for QuestionLimit {}

impl QuestionLimit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, QuestionLimit::Unlimited)
    }

    /// `true` when `used` questions still leave room for one more.
    pub fn admits(&self, used: u32) -> bool {
        match self {
            QuestionLimit::Limited(max) => used < *max,
            QuestionLimit::Unlimited => true,
        }
    }

    /// Remaining allowance after `used` questions (saturating at zero).
    pub fn remaining_after(&self, used: u32) -> Remaining {
        match self {
            QuestionLimit::Limited(max) => Remaining::Limited(max.saturating_sub(used)),
            QuestionLimit::Unlimited => Remaining::Unlimited,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            QuestionLimit::Limited(max) => Some(*max),
            QuestionLimit::Unlimited => None,
        }
    }
}

/// How many questions are left before the limit is hit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Remaining {
    Limited(u32),
    Unlimited,
}

impl ValueObject for Remaining {}

impl Remaining {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Remaining::Limited(0))
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Remaining::Limited(n) => Some(*n),
            Remaining::Unlimited => None,
        }
    }
}

impl core::fmt::Display for QuestionLimit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QuestionLimit::Limited(n) => write!(f, "{n}"),
            QuestionLimit::Unlimited => f.write_str(UNLIMITED),
        }
    }
}

impl core::fmt::Display for Remaining {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Remaining::Limited(n) => write!(f, "{n}"),
            Remaining::Unlimited => f.write_str(UNLIMITED),
        }
    }
}

// Wire form: a bare number, or the string "unlimited".

#[derive(Deserialize)]
#[serde(untagged)]
enum CountOrUnlimited {
    Count(u32),
    Text(String),
}

fn parse_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    match CountOrUnlimited::deserialize(deserializer)? {
        CountOrUnlimited::Count(n) => Ok(Some(n)),
        CountOrUnlimited::Text(s) if s == UNLIMITED => Ok(None),
        CountOrUnlimited::Text(s) => Err(serde::de::Error::custom(format!(
            "expected a number or \"{UNLIMITED}\", got \"{s}\""
        ))),
    }
}

impl Serialize for QuestionLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QuestionLimit::Limited(n) => serializer.serialize_u32(*n),
            QuestionLimit::Unlimited => serializer.serialize_str(UNLIMITED),
        }
    }
}

impl<'de> Deserialize<'de> for QuestionLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(parse_wire(deserializer)?.map_or(QuestionLimit::Unlimited, QuestionLimit::Limited))
    }
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Limited(n) => serializer.serialize_u32(*n),
            Remaining::Unlimited => serializer.serialize_str(UNLIMITED),
        }
    }
}

impl<'de> Deserialize<'de> for Remaining {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(parse_wire(deserializer)?.map_or(Remaining::Unlimited, Remaining::Limited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unlimited_serializes_as_string() {
        assert_eq!(serde_json::to_value(QuestionLimit::Unlimited).unwrap(), "unlimited");
        assert_eq!(serde_json::to_value(Remaining::Limited(3)).unwrap(), 3);
    }

    #[test]
    fn rejects_unknown_text() {
        assert!(serde_json::from_str::<Remaining>("\"lots\"").is_err());
        assert_eq!(
            serde_json::from_str::<Remaining>("\"unlimited\"").unwrap(),
            Remaining::Unlimited
        );
    }

    #[test]
    fn unlimited_always_admits() {
        assert!(QuestionLimit::Unlimited.admits(u32::MAX));
        assert_eq!(QuestionLimit::Unlimited.remaining_after(1_000), Remaining::Unlimited);
    }

    proptest! {
        #[test]
        fn remaining_never_underflows(max in 0u32..100, used in 0u32..1_000) {
            let remaining = QuestionLimit::Limited(max).remaining_after(used);
            prop_assert_eq!(remaining, Remaining::Limited(max.saturating_sub(used)));
            prop_assert_eq!(QuestionLimit::Limited(max).admits(used), !remaining.is_exhausted());
        }
    }
}
