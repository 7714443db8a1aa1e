//! Identity tier.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Classification of an identity, driving both question quota and module access.
///
/// A registered *account* may still carry `Anonymous` as its tier before it is
/// upgraded; anonymous *sessions* are always treated as `Anonymous`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anonymous,
    #[default]
    Registered,
    Subscriber,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Anonymous, Tier::Registered, Tier::Subscriber];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Registered => "registered",
            Tier::Subscriber => "subscriber",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Ok(Tier::Anonymous),
            "registered" => Ok(Tier::Registered),
            "subscriber" => Ok(Tier::Subscriber),
            other => Err(DomainError::validation(format!(
                "unknown tier '{other}' (expected anonymous, registered or subscriber)"
            ))),
        }
    }
}
