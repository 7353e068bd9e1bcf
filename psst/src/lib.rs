//! `Psst`: anonymous end-to-end encrypted two-party chat.

pub mod config;
pub mod crypto;
pub mod link;
pub mod session;
pub mod transport;
