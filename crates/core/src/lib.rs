//! `multibpo-core`: shared building blocks for the quota and entitlement engine.
//!
//! Everything here is **pure**: identifiers, the tier model, quota limit values
//! and the domain error type. No storage, no HTTP.

pub mod error;
pub mod id;
pub mod tier;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, QuestionId};
pub use tier::Tier;
pub use value_object::{QuestionLimit, Remaining, ValueObject};
