pub mod account;
pub mod assistant;
pub mod system;
