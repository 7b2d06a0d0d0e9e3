//! On-chain scroll registry: a head datum pointing at a list datum
//!
//! Both documents are JSON carried as inline datum bytes, possibly
//! cbor-wrapped and possibly gzipped. Multiple heads merge by entry name,
//! later heads overriding earlier bindings.

use flate2::read::GzDecoder;
use scrolls_codec::value::CborValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use crate::error::Error;
use crate::indexer::Indexer;

pub const REGISTRY_HEAD_FORMAT: &str = "ledger-scrolls-registry-head";

pub const REGISTRY_LIST_FORMAT: &str = "ledger-scrolls-registry-list";

pub const REGISTRY_POINTER_KIND: &str = "utxo-inline-datum-bytes-v1";

/// A transaction input reference, written `<txHash>#<txIx>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub tx_hash: String,
    pub tx_ix: u64,
}

impl FromStr for TxIn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, ix) = s
            .split_once('#')
            .ok_or_else(|| Error::malformed("txin", "expected <txHash>#<txIx>"))?;

        let tx_ix = ix
            .parse()
            .map_err(|_| Error::malformed("txin", "output index is not a number"))?;

        Ok(TxIn {
            tx_hash: hash.to_string(),
            tx_ix,
        })
    }
}

impl std::fmt::Display for TxIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.tx_ix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHead {
    pub format: String,
    #[serde(rename = "registryList")]
    pub registry_list: RegistryPointer,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPointer {
    pub kind: String,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "txIx")]
    pub tx_ix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryList {
    pub format: String,
    pub entries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<EntryPointer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Where a registered scroll lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPointer {
    InlineUtxo { tx_hash: String, tx_ix: u64 },
    Cip25Manifest { policy_id: String, asset_name: String },
    Url { url: String },
}

/// Decodes registry datum bytes into JSON: unwrap one cbor-bytes layer if
/// present, gunzip if the magic matches, then parse
pub fn decode_registry_datum(raw: &[u8]) -> Result<serde_json::Value, Error> {
    let mut bytes = raw.to_vec();

    if let Ok(CborValue::Bytes(inner)) = CborValue::from_cbor(&bytes) {
        bytes = inner;
    }

    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|err| Error::malformed("registry datum", err.to_string()))?;
        bytes = decoded;
    }

    serde_json::from_slice(&bytes).map_err(Error::from)
}

pub fn parse_registry_head(raw: &[u8]) -> Result<RegistryHead, Error> {
    let json = decode_registry_datum(raw)?;
    let head: RegistryHead = serde_json::from_value(json)?;

    if head.format != REGISTRY_HEAD_FORMAT {
        return Err(Error::malformed(
            "registry head",
            format!("unexpected format `{}`", head.format),
        ));
    }

    Ok(head)
}

pub fn parse_registry_list(raw: &[u8]) -> Result<RegistryList, Error> {
    let json = decode_registry_datum(raw)?;
    let list: RegistryList = serde_json::from_value(json)?;

    if list.format != REGISTRY_LIST_FORMAT {
        return Err(Error::malformed(
            "registry list",
            format!("unexpected format `{}`", list.format),
        ));
    }

    Ok(list)
}

/// Merges lists by entry name: later lists override earlier bindings,
/// first-seen order is preserved
pub fn merge_registry_lists(lists: &[RegistryList]) -> RegistryList {
    let mut order: Vec<String> = Vec::new();
    let mut bindings: BTreeMap<String, RegistryEntry> = BTreeMap::new();

    for list in lists {
        for entry in &list.entries {
            if !bindings.contains_key(&entry.name) {
                order.push(entry.name.clone());
            }
            bindings.insert(entry.name.clone(), entry.clone());
        }
    }

    RegistryList {
        format: REGISTRY_LIST_FORMAT.to_string(),
        entries: order
            .into_iter()
            .map(|name| bindings.remove(&name).expect("binding recorded"))
            .collect(),
    }
}

/// Fetches and validates one head's list through the indexer adapter
pub async fn resolve_head(indexer: &Indexer, head: &TxIn) -> Result<RegistryList, Error> {
    let head_datum = indexer
        .output_inline_datum(&head.tx_hash, head.tx_ix)
        .await?;
    let head = parse_registry_head(&head_datum)?;

    if head.registry_list.kind != REGISTRY_POINTER_KIND {
        return Err(Error::malformed(
            "registry head",
            format!("unsupported pointer kind `{}`", head.registry_list.kind),
        ));
    }

    let list_datum = indexer
        .output_inline_datum(&head.registry_list.tx_hash, head.registry_list.tx_ix)
        .await?;

    parse_registry_list(&list_datum)
}

/// Resolves a sequence of heads into one merged registry; later heads
/// override earlier ones by entry name
pub async fn resolve_registry(indexer: &Indexer, heads: &[TxIn]) -> Result<RegistryList, Error> {
    let mut lists = Vec::with_capacity(heads.len());

    for head in heads {
        lists.push(resolve_head(indexer, head).await?);
    }

    Ok(merge_registry_lists(&lists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn entry(name: &str, sha: &str) -> RegistryEntry {
        RegistryEntry {
            name: name.into(),
            pointer: Some(EntryPointer::InlineUtxo {
                tx_hash: "ab".repeat(32),
                tx_ix: 0,
            }),
            content_type: Some("text/plain".into()),
            sha256: Some(sha.into()),
            extra: BTreeMap::new(),
        }
    }

    fn list(entries: Vec<RegistryEntry>) -> RegistryList {
        RegistryList {
            format: REGISTRY_LIST_FORMAT.into(),
            entries,
        }
    }

    #[test]
    fn json_roundtrip_then_merge_with_empty_is_identity() {
        let original = list(vec![entry("a", "11"), entry("b", "22")]);

        let json = serde_json::to_string(&original).unwrap();
        let back: RegistryList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);

        let merged = merge_registry_lists(&[back, list(vec![])]);
        assert_eq!(
            serde_json::to_string(&merged).unwrap(),
            serde_json::to_string(&original).unwrap()
        );
    }

    #[test]
    fn later_lists_override_by_name_keeping_order() {
        let base = list(vec![entry("a", "old"), entry("b", "keep")]);
        let private = list(vec![entry("a", "new"), entry("c", "extra")]);

        let merged = merge_registry_lists(&[base, private]);

        let names: Vec<_> = merged.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(merged.entries[0].sha256.as_deref(), Some("new"));
        assert_eq!(merged.entries[1].sha256.as_deref(), Some("keep"));
    }

    #[test]
    fn datum_decodes_through_cbor_and_gzip_layers() {
        let doc = serde_json::json!({
            "format": REGISTRY_HEAD_FORMAT,
            "registryList": {
                "kind": REGISTRY_POINTER_KIND,
                "txHash": "cd".repeat(32),
                "txIx": 1,
            },
        });
        let plain = serde_json::to_vec(&doc).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let gz = encoder.finish().unwrap();

        let wrapped = CborValue::Bytes(gz).to_vec();

        let head = parse_registry_head(&wrapped).unwrap();
        assert_eq!(head.registry_list.tx_ix, 1);
        assert_eq!(head.registry_list.kind, REGISTRY_POINTER_KIND);
    }

    #[test]
    fn wrong_format_is_rejected() {
        let doc = serde_json::json!({ "format": "something-else", "entries": [] });
        let raw = serde_json::to_vec(&doc).unwrap();

        assert!(parse_registry_list(&raw).is_err());
    }

    #[test]
    fn txin_parses_and_prints() {
        let txin: TxIn = "aabb#3".parse().unwrap();
        assert_eq!(txin.tx_hash, "aabb");
        assert_eq!(txin.tx_ix, 3);
        assert_eq!(txin.to_string(), "aabb#3");

        assert!("no-separator".parse::<TxIn>().is_err());
    }
}
