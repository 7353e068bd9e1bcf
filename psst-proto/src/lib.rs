//! Shared protocol definitions for the `Psst` wire format.

pub mod codec;
pub mod room;
pub mod wire;
