//! Catalog file: a local JSON listing of known scrolls

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;
use crate::scroll::{ScrollDescriptor, DEFAULT_MAX_SCAN_BLOCKS};
use scrolls_network::miniprotocols::Point;

pub const TYPE_UTXO_DATUM: &str = "utxo_datum_bytes_v1";

pub const TYPE_CIP25_PAGES: &str = "cip25_pages_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub scrolls: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_asset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ix: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_slot: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.scrolls.iter().find(|entry| entry.id == id)
    }
}

impl CatalogEntry {
    /// The chain coordinate of the carrying block, when the catalog has it
    pub fn point(&self) -> Result<Option<Point>, Error> {
        match (self.block_slot, self.block_hash.as_deref()) {
            (Some(slot), Some(hash)) => {
                let hash = hex::decode(hash)
                    .map_err(|_| Error::malformed("catalog entry", "block_hash is not hex"))?;

                if hash.len() != 32 {
                    return Err(Error::malformed(
                        "catalog entry",
                        "block_hash must be 32 bytes",
                    ));
                }

                Ok(Some(Point::Specific(slot, hash)))
            }
            _ => Ok(None),
        }
    }

    pub fn to_descriptor(&self) -> Result<ScrollDescriptor, Error> {
        let expected_sha256 = self
            .sha256
            .as_deref()
            .map(scrolls_crypto::hash::Hash::from_str)
            .transpose()
            .map_err(|_| Error::malformed("catalog entry", "sha256 is not a 32-byte hex hash"))?;

        match self.entry_type.as_str() {
            TYPE_UTXO_DATUM => {
                let tx_id = self
                    .tx_hash
                    .as_deref()
                    .map(scrolls_crypto::hash::Hash::from_str)
                    .transpose()
                    .map_err(|_| {
                        Error::malformed("catalog entry", "tx_hash is not a 32-byte hex hash")
                    })?;

                Ok(ScrollDescriptor::InlineDatum {
                    tx_id,
                    tx_ix: self.tx_ix.unwrap_or(0),
                    point: self.point()?,
                    expected_sha256,
                    content_type: self.content_type.clone(),
                })
            }
            TYPE_CIP25_PAGES => {
                let policy_id = self
                    .policy_id
                    .clone()
                    .ok_or_else(|| Error::malformed("catalog entry", "policy_id is required"))?;

                let start_point = self.point()?.ok_or_else(|| {
                    Error::not_found("start point for scan (block_slot/block_hash in catalog)")
                })?;

                Ok(ScrollDescriptor::Cip25Pages {
                    policy_id,
                    manifest_asset: self.manifest_asset.clone(),
                    start_point,
                    max_scan_blocks: DEFAULT_MAX_SCAN_BLOCKS,
                    expected_sha256,
                    content_type: self.content_type.clone(),
                })
            }
            other => Err(Error::malformed(
                "catalog entry",
                format!("unknown scroll type `{other}`"),
            )),
        }
    }
}

pub fn load_catalog(path: impl AsRef<Path>) -> Result<Catalog, Error> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "scrolls": [
            {
                "id": "genesis-png",
                "type": "utxo_datum_bytes_v1",
                "tx_hash": "72866072866072866072866072866072866072866072866072866072866089be",
                "tx_ix": 0,
                "block_slot": 120000000,
                "block_hash": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "content_type": "image/png"
            },
            {
                "id": "paged-doc",
                "type": "cip25_pages_v1",
                "policy_id": "cdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd",
                "manifest_asset": "DOC_MANIFEST",
                "block_slot": 121000000,
                "block_hash": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "kind": "document"
            }
        ]
    }"#;

    #[test]
    fn parses_both_entry_types() {
        let catalog: Catalog = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(catalog.scrolls.len(), 2);

        match catalog.get("genesis-png").unwrap().to_descriptor().unwrap() {
            ScrollDescriptor::InlineDatum {
                tx_id,
                tx_ix,
                point,
                content_type,
                ..
            } => {
                assert!(tx_id.is_some());
                assert_eq!(tx_ix, 0);
                assert_eq!(point.unwrap().slot_or_default(), 120000000);
                assert_eq!(content_type.as_deref(), Some("image/png"));
            }
            _ => panic!("expected inline datum descriptor"),
        }

        match catalog.get("paged-doc").unwrap().to_descriptor().unwrap() {
            ScrollDescriptor::Cip25Pages {
                policy_id,
                manifest_asset,
                start_point,
                ..
            } => {
                assert_eq!(policy_id.len(), 56);
                assert_eq!(manifest_asset.as_deref(), Some("DOC_MANIFEST"));
                assert_eq!(start_point.slot_or_default(), 121000000);
            }
            _ => panic!("expected cip25 descriptor"),
        }
    }

    #[test]
    fn unknown_id_is_none() {
        let catalog: Catalog = serde_json::from_str(SAMPLE).unwrap();
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn unknown_type_is_malformed() {
        let entry = CatalogEntry {
            id: "x".into(),
            entry_type: "weird_v9".into(),
            policy_id: None,
            manifest_asset: None,
            tx_hash: None,
            tx_ix: None,
            block_slot: None,
            block_hash: None,
            content_type: None,
            sha256: None,
            kind: None,
        };

        assert!(matches!(
            entry.to_descriptor(),
            Err(Error::Malformed { .. })
        ));
    }
}
