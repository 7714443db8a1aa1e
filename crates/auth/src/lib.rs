//! `multibpo-auth`: accounts, entitlements and token validation.
//!
//! Decoupled from HTTP and storage: the API layer hands in decoded requests and
//! the infra layer persists `Account` values.

pub mod account;
pub mod claims;
pub mod modules;
pub mod password;
pub mod policy;

pub use account::{Account, RegisterAccount, RegistrationMethod};
pub use claims::{
    ACCESS_TOKEN_TTL_MINUTES, Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError,
    validate_claims,
};
pub use modules::{ModuleAccess, ModuleName};
pub use password::NewPassword;
pub use policy::{EntitlementConfig, EntitlementPolicy, Entitlements};
