//! BlockFetch mini-protocol implementation (client side)

mod client;
mod codec;
mod protocol;

pub use client::*;
pub use protocol::*;
