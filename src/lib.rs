pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod role;
pub mod session;
pub mod store;
