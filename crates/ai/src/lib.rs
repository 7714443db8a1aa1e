//! `multibpo-ai`
//!
//! **Responsibility:** the Luca IA answer-generation boundary.
//!
//! This crate is intentionally **not** part of the quota model:
//! - It never sees accounts, sessions or counters.
//! - It receives an already validated, trimmed question and returns text.
//! - Quota is consumed before a generator is called and is not refunded on failure.

pub mod error;
pub mod generator;

pub use error::AiError;
pub use generator::{AnswerGenerator, LocalAnswerGenerator};
