//! Reconstruction of content-addressed scrolls from their on-chain
//! carriers: inline datums and CIP-25 page sequences.

pub mod catalog;
pub mod error;
pub mod indexer;
pub mod reconstruct;
pub mod registry;
pub mod scroll;
pub mod topology;

pub use error::Error;
pub use reconstruct::{reconstruct, ReconstructedScroll};
pub use scroll::ScrollDescriptor;
