pub mod api;
pub mod config;
pub mod error;
pub mod habits;
pub mod leagues;
pub mod progress;
pub mod security;
pub mod store;
pub mod users;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
