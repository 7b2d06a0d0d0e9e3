//! HTTP indexer fallback
//!
//! When a P2P scan is not wanted (or a tx hash must be resolved to a chain
//! point, which the wire protocols cannot do), the same queries run against
//! a public indexer. Responses are normalized into the shapes the engine
//! already consumes before they cross this boundary.

mod blockfrost;
mod koios;

pub use blockfrost::BlockfrostClient;
pub use koios::KoiosClient;

use scrolls_chain::cip25::{classify_assets, extract_cip25_assets, Cip25Manifest, Cip25Page};
use scrolls_codec::value::CborValue;
use scrolls_crypto::hash::{Hash, Sha256};
use scrolls_network::miniprotocols::Point;

use crate::error::Error;
use crate::reconstruct::{finish_cip25, ReconstructedScroll};

/// Environment variable carrying the Blockfrost key
pub const BLOCKFROST_PROJECT_ID_VAR: &str = "BLOCKFROST_PROJECT_ID";

/// Environment variable overriding the Koios base url
pub const KOIOS_URL_VAR: &str = "KOIOS_URL";

/// An indexer backend, dispatched by configuration
pub enum Indexer {
    Blockfrost(BlockfrostClient),
    Koios(KoiosClient),
}

impl Indexer {
    /// Picks a backend from the environment: Blockfrost when a project id
    /// is configured, Koios otherwise
    pub fn from_env() -> Self {
        match std::env::var(BLOCKFROST_PROJECT_ID_VAR) {
            Ok(project_id) if !project_id.is_empty() => {
                Indexer::Blockfrost(BlockfrostClient::new(project_id))
            }
            _ => Indexer::Koios(KoiosClient::new(
                std::env::var(KOIOS_URL_VAR).ok().as_deref(),
            )),
        }
    }

    /// Resolves a transaction hash to the chain point of its block
    pub async fn resolve_tx_point(&self, tx_hash: &str) -> Result<Point, Error> {
        match self {
            Indexer::Blockfrost(client) => client.resolve_tx_point(tx_hash).await,
            Indexer::Koios(client) => client.resolve_tx_point(tx_hash).await,
        }
    }

    /// The label-721 metadata map of a transaction, if any
    pub async fn metadata_721(&self, tx_hash: &str) -> Result<Option<CborValue>, Error> {
        match self {
            Indexer::Blockfrost(client) => client.metadata_721(tx_hash).await,
            Indexer::Koios(client) => client.metadata_721(tx_hash).await,
        }
    }

    /// Distinct minting transaction hashes of the assets under a policy
    pub async fn policy_mint_txs(&self, policy_id: &str) -> Result<Vec<String>, Error> {
        match self {
            Indexer::Blockfrost(client) => client.policy_mint_txs(policy_id).await,
            Indexer::Koios(client) => client.policy_mint_txs(policy_id).await,
        }
    }

    /// The inline datum bytes of one transaction output
    pub async fn output_inline_datum(&self, tx_hash: &str, tx_ix: u64) -> Result<Vec<u8>, Error> {
        match self {
            Indexer::Blockfrost(client) => client.output_inline_datum(tx_hash, tx_ix).await,
            Indexer::Koios(client) => client.output_inline_datum(tx_hash, tx_ix).await,
        }
    }
}

/// Inline-datum reconstruction through the indexer: fetch the datum bytes,
/// unwrap one cbor layer if present, verify
pub async fn reconstruct_inline_indexed(
    indexer: &Indexer,
    tx_hash: &str,
    tx_ix: u64,
    expected_sha256: Option<&Hash<32>>,
    content_type: Option<&str>,
) -> Result<ReconstructedScroll, Error> {
    let raw = indexer.output_inline_datum(tx_hash, tx_ix).await?;

    let bytes = match CborValue::from_cbor(&raw) {
        Ok(CborValue::Bytes(inner)) => inner,
        _ => raw,
    };

    let sha256 = Sha256::hash(&bytes);

    if let Some(expected) = expected_sha256 {
        if &sha256 != expected {
            return Err(Error::IntegrityFailure {
                which: "sha256",
                expected: expected.to_string(),
                actual: sha256.to_string(),
            });
        }
    }

    Ok(ReconstructedScroll {
        sha256,
        content_type: content_type
            .map(String::from)
            .unwrap_or_else(|| "application/octet-stream".into()),
        codec_used: None,
        bytes,
    })
}

/// CIP-25 reconstruction through the indexer: walk the minting txs of the
/// policy, collect pages and manifest from their metadata, then reuse the
/// exact reconstruction used on the P2P path
pub async fn reconstruct_cip25_indexed(
    indexer: &Indexer,
    policy_id: &str,
    manifest_asset: Option<&str>,
    expected_sha256: Option<&Hash<32>>,
    content_type: Option<&str>,
) -> Result<ReconstructedScroll, Error> {
    let mint_txs = indexer.policy_mint_txs(policy_id).await?;

    if mint_txs.is_empty() {
        return Err(Error::not_found("assets under the policy"));
    }

    let mut pages: Vec<Cip25Page> = Vec::new();
    let mut manifest: Option<Cip25Manifest> = None;
    let mut seen: std::collections::BTreeSet<String> = Default::default();

    for tx_hash in mint_txs {
        let metadata = match indexer.metadata_721(&tx_hash).await? {
            Some(metadata) => metadata,
            None => continue,
        };

        let assets = extract_cip25_assets(&metadata, policy_id);
        if assets.is_empty() {
            continue;
        }

        let (new_pages, new_manifest) = classify_assets(assets, manifest_asset)?;

        for page in new_pages {
            if seen.insert(page.asset.asset_name.clone()) {
                pages.push(page);
            }
        }

        if manifest.is_none() {
            manifest = new_manifest;
        }
    }

    finish_cip25(pages, manifest, expected_sha256, content_type)
}
