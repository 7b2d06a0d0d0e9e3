//! ChainSync mini-protocol implementation (header variant, client side)

mod client;
mod codec;
mod protocol;

pub use client::*;
pub use protocol::*;
