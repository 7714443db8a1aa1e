//! Persistence boundary for accounts, anonymous sessions and the question log.
//!
//! Check-and-increment of a quota unit is a single atomic operation on every
//! backend. Callers never read a counter, decide, and write it back.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryAccountStore, InMemoryQuestionLog, InMemorySessionRegistry};
pub use postgres::{PostgresAccountStore, PostgresQuestionLog, PostgresSessionRegistry, SCHEMA, migrate};
pub use r#trait::{AccountQuota, AccountStore, ConsumeResult, QuestionLog, SessionRegistry, StoreError};
