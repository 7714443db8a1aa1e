//! Environment-driven application configuration.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use multibpo_auth::EntitlementConfig;
use multibpo_quota::QuotaRules;
use multibpo_quota::rules::{DEFAULT_ANONYMOUS_LIMIT, DEFAULT_REGISTERED_LIMIT, DEFAULT_WINDOW_DAYS};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEV_JWT_SECRET: &str = "dev-secret";
/// Ten years. Longer windows overflow reset-date arithmetic.
pub const MAX_RESET_DAYS: u32 = 3650;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Where state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub quota: QuotaRules,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            storage: StorageConfig::InMemory,
            quota: QuotaRules::default(),
        }
    }
}

impl AppConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let bind_raw = get("BIND_ADDR").unwrap_or(DEFAULT_BIND_ADDR);
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "BIND_ADDR",
            value: bind_raw.to_string(),
            reason: e.to_string(),
        })?;

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret.to_string(),
            None => {
                warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let use_persistent = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", raw)?,
            None => false,
        };
        let storage = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            StorageConfig::Postgres {
                database_url: database_url.to_string(),
            }
        } else {
            StorageConfig::InMemory
        };

        let anonymous_limit = parse_number(get("LUCA_ANONYMOUS_LIMIT"), "LUCA_ANONYMOUS_LIMIT", DEFAULT_ANONYMOUS_LIMIT)?;
        let registered_limit =
            parse_number(get("LUCA_REGISTERED_LIMIT"), "LUCA_REGISTERED_LIMIT", DEFAULT_REGISTERED_LIMIT)?;
        let reset_days = parse_number(get("LUCA_RESET_DAYS"), "LUCA_RESET_DAYS", DEFAULT_WINDOW_DAYS as u32)?;
        if !(1..=MAX_RESET_DAYS).contains(&reset_days) {
            return Err(ConfigError::Invalid {
                var: "LUCA_RESET_DAYS",
                value: reset_days.to_string(),
                reason: format!("window must be between 1 and {MAX_RESET_DAYS} days"),
            });
        }

        Ok(Self {
            bind_addr,
            jwt_secret,
            storage,
            quota: QuotaRules {
                anonymous_limit,
                registered_limit,
                window: Duration::days(i64::from(reset_days)),
            },
        })
    }

    pub fn entitlements(&self) -> EntitlementConfig {
        EntitlementConfig::default().with_quota(self.quota)
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_number(raw: Option<&str>, var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}
