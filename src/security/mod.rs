pub mod auth;
pub mod credential_store;
pub mod issuer;
pub mod resolver;
pub mod rotator;
pub mod signer;

pub mod audit_log;
