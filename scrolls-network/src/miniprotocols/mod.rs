//! Client implementations for the Ouroboros mini-protocols this stack speaks

mod common;

pub mod blockfetch;
pub mod chainsync;
pub mod handshake;
pub mod keepalive;

pub use common::*;
