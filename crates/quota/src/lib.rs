//! Question quota domain (pure, no IO).
//!
//! - `rules`: per-tier limits and the reset window, injected as configuration.
//! - `tracker`: the two quota state machines (rolling window for accounts,
//!   lifetime cap for anonymous sessions).
//! - `session`: anonymous session records keyed by an opaque client token.
//! - `question`: validated question text and the immutable question record.
//!
//! Atomicity of check-and-increment is the storage layer's job; these types only
//! decide *whether* a unit may be consumed and what the new state looks like.

pub mod question;
pub mod rules;
pub mod session;
pub mod tracker;

pub use question::{ClientMetadata, QuestionOwner, QuestionRecord, QuestionText};
pub use rules::QuotaRules;
pub use session::{AnonymousSession, SessionToken};
pub use tracker::{LifetimeQuota, QuotaExceeded, QuotaSnapshot, WindowedQuota};
