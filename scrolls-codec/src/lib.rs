//! Common CBOR interface shared by the Ledger Scrolls crates

/// Shared re-export of the minicbor lib across the workspace
pub use minicbor;

/// Round-trip friendly common helper structs
pub mod utils;

/// Dynamic CBOR value model for metadata-shaped payloads
pub mod value;

pub trait Fragment: Sized + for<'b> minicbor::Decode<'b, ()> + minicbor::Encode<()> {}

impl<T> Fragment for T where T: for<'b> minicbor::Decode<'b, ()> + minicbor::Encode<()> + Sized {}
