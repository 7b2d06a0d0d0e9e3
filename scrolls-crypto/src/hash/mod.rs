//! Cryptographic hashes for chain entities and scroll integrity
//!
//! Two helper objects are exposed:
//!
//! * [`Hasher`] to stream bytes into a Blake2b digest the way the chain
//!   hashes headers and transaction bodies
//! * [`Sha256`] for scroll content digests
//! * [`struct@Hash`] a conveniently strongly typed byte array

#[allow(clippy::module_inception)]
mod hash;
mod hasher;
mod serde;
mod sha256;

pub use self::{hash::Hash, hasher::Hasher, sha256::Sha256};
