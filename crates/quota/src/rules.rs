use chrono::Duration;

use multibpo_core::{QuestionLimit, Tier};

pub const DEFAULT_ANONYMOUS_LIMIT: u32 = 4;
pub const DEFAULT_REGISTERED_LIMIT: u32 = 11;
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Quota limits per tier plus the rolling window for account counters.
///
/// Immutable once built; callers share it by reference (or inside the
/// entitlement configuration).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuotaRules {
    pub anonymous_limit: u32,
    pub registered_limit: u32,
    pub window: Duration,
}

impl Default for QuotaRules {
    fn default() -> Self {
        Self {
            anonymous_limit: DEFAULT_ANONYMOUS_LIMIT,
            registered_limit: DEFAULT_REGISTERED_LIMIT,
            window: Duration::days(DEFAULT_WINDOW_DAYS),
        }
    }
}

impl QuotaRules {
    pub fn limit_for(&self, tier: Tier) -> QuestionLimit {
        match tier {
            Tier::Anonymous => QuestionLimit::Limited(self.anonymous_limit),
            Tier::Registered => QuestionLimit::Limited(self.registered_limit),
            Tier::Subscriber => QuestionLimit::Unlimited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_tiers() {
        let rules = QuotaRules::default();
        assert_eq!(rules.limit_for(Tier::Anonymous), QuestionLimit::Limited(4));
        assert_eq!(rules.limit_for(Tier::Registered), QuestionLimit::Limited(11));
        assert_eq!(rules.limit_for(Tier::Subscriber), QuestionLimit::Unlimited);
        assert_eq!(rules.window, Duration::days(7));
    }
}
