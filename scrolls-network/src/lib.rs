//! Initiator-only network stack speaking the Ouroboros N2N protocol
//!
//! A single TCP bearer carries multiplexed frames for the handshake,
//! chain-sync, block-fetch and keep-alive mini-protocols. The stack never
//! acts as a responder: it advertises initiator-only diffusion, disables
//! peer sharing, and only ever drives client state machines.

pub mod bearer;
pub mod facade;
pub mod miniprotocols;
pub mod multiplexer;
