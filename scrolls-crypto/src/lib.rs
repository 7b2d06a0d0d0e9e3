//! Hashing primitives used across the Ledger Scrolls crates

pub mod hash;
