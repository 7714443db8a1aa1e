use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Suffix marking a reduced-capability variant of a module (`drive-limited`).
pub const LIMITED_SUFFIX: &str = "-limited";

/// Product module identifier (e.g. "dashboard", "drive-limited").
///
/// Modules are opaque strings; the catalogue itself comes from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(Cow<'static, str>);

impl ModuleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The `-limited` variant of `base`.
    pub fn limited(base: &str) -> Self {
        Self(Cow::Owned(format!("{base}{LIMITED_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_limited(&self) -> bool {
        self.0.ends_with(LIMITED_SUFFIX)
    }

    /// Name with any `-limited` suffix removed.
    pub fn base_name(&self) -> &str {
        self.0.strip_suffix(LIMITED_SUFFIX).unwrap_or(&self.0)
    }
}

impl core::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a module access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleAccess {
    Full,
    Limited,
    Denied,
}

impl ModuleAccess {
    pub fn is_granted(&self) -> bool {
        !matches!(self, ModuleAccess::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_limited_suffix() {
        assert_eq!(ModuleName::new("drive-limited").base_name(), "drive");
        assert_eq!(ModuleName::new("luca_ia").base_name(), "luca_ia");
        assert!(ModuleName::limited("agenda").is_limited());
    }
}
