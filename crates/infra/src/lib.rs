//! Infrastructure layer: persistence backends, the question gateway, account
//! lifecycle orchestration and configuration.

pub mod accounts;
pub mod config;
pub mod gateway;
pub mod store;
