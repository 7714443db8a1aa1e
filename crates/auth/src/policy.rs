//! Entitlement policy: tier (+ email confirmation) → question limit and modules.
//!
//! - No IO
//! - No panics
//! - No global state: the catalogue and limits arrive as an [`EntitlementConfig`]

use std::collections::BTreeSet;

use serde::Serialize;

use multibpo_core::{DomainError, DomainResult, QuestionLimit, Tier};
use multibpo_quota::QuotaRules;

use crate::modules::{ModuleAccess, ModuleName};

const CATALOGUE: [&str; 11] = [
    "dashboard",
    "drive",
    "agenda",
    "loja",
    "utilitarios",
    "noticias",
    "luca_ia",
    "certificados",
    "ideias",
    "contratos",
    "central_atendimento",
];

const REGISTERED: [&str; 7] = [
    "dashboard",
    "drive-limited",
    "agenda-limited",
    "loja",
    "utilitarios",
    "noticias",
    "luca_ia",
];

/// Immutable entitlement configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementConfig {
    /// Every module the product knows about, by base name.
    pub catalogue: Vec<ModuleName>,
    pub subscriber_modules: Vec<ModuleName>,
    pub registered_modules: Vec<ModuleName>,
    pub quota: QuotaRules,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        let catalogue: Vec<ModuleName> = CATALOGUE.iter().map(|m| ModuleName::new(*m)).collect();

        Self {
            subscriber_modules: catalogue.clone(),
            catalogue,
            registered_modules: REGISTERED.iter().map(|m| ModuleName::new(*m)).collect(),
            quota: QuotaRules::default(),
        }
    }
}

impl EntitlementConfig {
    pub fn with_quota(mut self, quota: QuotaRules) -> Self {
        self.quota = quota;
        self
    }

    /// Every tier module must map back to a catalogue entry.
    pub fn validate(&self) -> DomainResult<()> {
        let known: BTreeSet<&str> = self.catalogue.iter().map(|m| m.as_str()).collect();
        for module in self.subscriber_modules.iter().chain(&self.registered_modules) {
            if !known.contains(module.base_name()) {
                return Err(DomainError::validation(format!(
                    "module '{module}' is not in the catalogue"
                )));
            }
        }
        Ok(())
    }
}

/// Serializable entitlement summary for a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlements {
    pub tier: Tier,
    pub question_limit: QuestionLimit,
    pub erp_access: bool,
    pub allowed_modules: Vec<ModuleName>,
    pub blocked_modules: Vec<ModuleName>,
}

/// Pure policy functions over an injected configuration.
#[derive(Debug, Clone, Default)]
pub struct EntitlementPolicy {
    config: EntitlementConfig,
}

impl EntitlementPolicy {
    pub fn new(config: EntitlementConfig) -> DomainResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }

    pub fn quota_rules(&self) -> &QuotaRules {
        &self.config.quota
    }

    pub fn question_limit(&self, tier: Tier) -> QuestionLimit {
        self.config.quota.limit_for(tier)
    }

    pub fn has_erp_access(&self, tier: Tier, email_confirmed: bool) -> bool {
        email_confirmed && matches!(tier, Tier::Registered | Tier::Subscriber)
    }

    pub fn allowed_modules(&self, tier: Tier, email_confirmed: bool) -> Vec<ModuleName> {
        if !self.has_erp_access(tier, email_confirmed) {
            return Vec::new();
        }
        match tier {
            Tier::Subscriber => self.config.subscriber_modules.clone(),
            Tier::Registered => self.config.registered_modules.clone(),
            Tier::Anonymous => Vec::new(),
        }
    }

    /// Catalogue entries whose base name is not covered by an allowed module.
    pub fn blocked_modules(&self, tier: Tier, email_confirmed: bool) -> Vec<ModuleName> {
        let allowed = self.allowed_modules(tier, email_confirmed);
        let allowed_base: BTreeSet<&str> = allowed.iter().map(|m| m.base_name()).collect();

        self.config
            .catalogue
            .iter()
            .filter(|m| !allowed_base.contains(m.as_str()))
            .cloned()
            .collect()
    }

    pub fn can_access_module(&self, tier: Tier, email_confirmed: bool, module: &str) -> ModuleAccess {
        let allowed = self.allowed_modules(tier, email_confirmed);

        if allowed.iter().any(|m| m.as_str() == module) {
            return ModuleAccess::Full;
        }

        let limited = ModuleName::limited(module);
        if allowed.contains(&limited) {
            ModuleAccess::Limited
        } else {
            ModuleAccess::Denied
        }
    }

    pub fn entitlements(&self, tier: Tier, email_confirmed: bool) -> Entitlements {
        Entitlements {
            tier,
            question_limit: self.question_limit(tier),
            erp_access: self.has_erp_access(tier, email_confirmed),
            allowed_modules: self.allowed_modules(tier, email_confirmed),
            blocked_modules: self.blocked_modules(tier, email_confirmed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> EntitlementPolicy {
        EntitlementPolicy::new(EntitlementConfig::default()).unwrap()
    }

    #[test]
    fn unconfirmed_accounts_get_no_modules() {
        let p = policy();
        for tier in Tier::ALL {
            assert!(p.allowed_modules(tier, false).is_empty());
            assert_eq!(p.blocked_modules(tier, false).len(), 11);
        }
    }

    #[test]
    fn anonymous_tier_gets_no_modules_even_when_confirmed() {
        assert!(policy().allowed_modules(Tier::Anonymous, true).is_empty());
    }

    #[test]
    fn subscriber_gets_full_catalogue() {
        let p = policy();
        assert_eq!(p.allowed_modules(Tier::Subscriber, true).len(), 11);
        assert!(p.blocked_modules(Tier::Subscriber, true).is_empty());
        assert_eq!(p.can_access_module(Tier::Subscriber, true, "drive"), ModuleAccess::Full);
    }

    #[test]
    fn registered_gets_limited_drive_and_agenda() {
        let p = policy();
        let allowed: Vec<String> = p
            .allowed_modules(Tier::Registered, true)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert!(allowed.contains(&"drive-limited".to_string()));
        assert!(!allowed.contains(&"drive".to_string()));

        assert_eq!(p.can_access_module(Tier::Registered, true, "drive"), ModuleAccess::Limited);
        assert_eq!(p.can_access_module(Tier::Registered, true, "luca_ia"), ModuleAccess::Full);
        assert_eq!(p.can_access_module(Tier::Registered, true, "contratos"), ModuleAccess::Denied);

        let blocked = p.blocked_modules(Tier::Registered, true);
        let blocked: Vec<&str> = blocked.iter().map(|m| m.as_str()).collect();
        assert_eq!(blocked, ["certificados", "ideias", "contratos", "central_atendimento"]);
    }

    #[test]
    fn question_limits_per_tier() {
        let p = policy();
        assert_eq!(p.question_limit(Tier::Anonymous), QuestionLimit::Limited(4));
        assert_eq!(p.question_limit(Tier::Registered), QuestionLimit::Limited(11));
        assert_eq!(p.question_limit(Tier::Subscriber), QuestionLimit::Unlimited);
    }

    #[test]
    fn config_with_unknown_module_is_rejected() {
        let mut config = EntitlementConfig::default();
        config.registered_modules.push(ModuleName::new("payroll"));
        assert!(EntitlementPolicy::new(config).is_err());
    }

    #[test]
    fn blocked_and_allowed_partition_the_catalogue() {
        let p = policy();
        let catalogue: BTreeSet<String> =
            p.config().catalogue.iter().map(|m| m.to_string()).collect();

        for tier in Tier::ALL {
            for confirmed in [false, true] {
                let mut covered: BTreeSet<String> = p
                    .blocked_modules(tier, confirmed)
                    .iter()
                    .map(|m| m.to_string())
                    .collect();
                covered.extend(
                    p.allowed_modules(tier, confirmed)
                        .iter()
                        .map(|m| m.base_name().to_string()),
                );
                assert_eq!(covered, catalogue, "tier={tier} confirmed={confirmed}");
            }
        }
    }

    proptest! {
        #[test]
        fn access_is_consistent_with_allowed_set(
            module in "[a-z_]{1,20}",
            tier_idx in 0usize..3,
            confirmed in any::<bool>(),
        ) {
            let p = policy();
            let tier = Tier::ALL[tier_idx];
            let access = p.can_access_module(tier, confirmed, &module);
            let blocked = p.blocked_modules(tier, confirmed);
            let in_catalogue = p.config().catalogue.iter().any(|m| m.as_str() == module);

            if in_catalogue {
                prop_assert_eq!(
                    access.is_granted(),
                    !blocked.iter().any(|m| m.as_str() == module)
                );
            } else {
                prop_assert_eq!(access, ModuleAccess::Denied);
            }
        }
    }
}
