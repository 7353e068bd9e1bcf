//! `Psst` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay pairs
//! two WebSocket connections per room and forwards their frames blindly.

pub mod config;
pub mod relay;
pub mod rooms;
