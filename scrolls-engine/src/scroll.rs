//! Scroll descriptors: where on chain a scroll's bytes live

use scrolls_crypto::hash::Hash;
use scrolls_network::miniprotocols::Point;

/// Default cap on how many blocks a CIP-25 scan walks forward
pub const DEFAULT_MAX_SCAN_BLOCKS: usize = 500;

/// Addresses the carriers of one scroll
#[derive(Debug, Clone)]
pub enum ScrollDescriptor {
    /// The scroll bytes sit in the inline datum of one transaction output
    InlineDatum {
        /// Transaction id; optional when the block holds a single tx
        tx_id: Option<Hash<32>>,
        tx_ix: u64,
        /// Chain coordinate of the block carrying the transaction
        point: Option<Point>,
        expected_sha256: Option<Hash<32>>,
        content_type: Option<String>,
    },

    /// The scroll bytes are spread over CIP-25 page assets under one policy
    Cip25Pages {
        policy_id: String,
        manifest_asset: Option<String>,
        start_point: Point,
        max_scan_blocks: usize,
        expected_sha256: Option<Hash<32>>,
        content_type: Option<String>,
    },
}

impl ScrollDescriptor {
    pub fn content_type(&self) -> Option<&str> {
        match self {
            ScrollDescriptor::InlineDatum { content_type, .. } => content_type.as_deref(),
            ScrollDescriptor::Cip25Pages { content_type, .. } => content_type.as_deref(),
        }
    }

    pub fn expected_sha256(&self) -> Option<&Hash<32>> {
        match self {
            ScrollDescriptor::InlineDatum {
                expected_sha256, ..
            } => expected_sha256.as_ref(),
            ScrollDescriptor::Cip25Pages {
                expected_sha256, ..
            } => expected_sha256.as_ref(),
        }
    }
}
