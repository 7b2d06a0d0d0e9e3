//! CIP-25 metadata extraction and scroll page classification

use scrolls_codec::value::CborValue;
use scrolls_crypto::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// Transaction metadata label for CIP-25 token metadata
pub const CIP25_LABEL: u64 = 721;

/// Transaction metadata label for CIP-20 messages
pub const CIP20_MESSAGE_LABEL: u64 = 674;

/// Metadata label announcing scroll registry beacons
pub const SCROLL_BEACON_LABEL: u64 = 888;

/// Historical beacon label still found on older registrations
pub const SCROLL_BEACON_LABEL_LEGACY: u64 = 777;

#[derive(Debug, Error, PartialEq)]
pub enum Cip25Error {
    #[error("asset {asset}: payload segment is not valid hex")]
    SegmentHex { asset: String },

    #[error("asset {asset}: payload segment has odd length")]
    SegmentOddLength { asset: String },

    #[error("duplicate page index {index}")]
    DuplicateIndex { index: u64 },

    #[error("manifest carries conflicting digest fields")]
    ConflictingDigests,

    #[error("manifest digest field is not a 32-byte hash")]
    BadDigest,
}

#[derive(Debug, Clone)]
pub struct Cip25Asset {
    pub policy_id: String,
    pub asset_name: String,
    pub fields: Vec<(String, CborValue)>,
}

impl Cip25Asset {
    pub fn field(&self, key: &str) -> Option<&CborValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn first_field(&self, keys: &[&str]) -> Option<&CborValue> {
        keys.iter().find_map(|key| self.field(key))
    }
}

#[derive(Debug, Clone)]
pub struct Cip25Page {
    pub asset: Cip25Asset,
    pub index: Option<u64>,
    pub total: Option<u64>,
    pub payload_segments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Cip25Manifest {
    pub asset: Cip25Asset,
    pub codec: Option<String>,
    pub content_type: Option<String>,
    pub total_pages: Option<u64>,
    pub sha256: Option<Hash<32>>,
    pub sha256_gz: Option<Hash<32>>,
}

/// Field keys whose presence marks an asset as the scroll's manifest
const MANIFEST_KEYS: [&str; 7] = [
    "codec",
    "content_type",
    "content-type",
    "sha256",
    "sha",
    "sha256_gz",
    "sha_gz",
];

/// UTF-8 if the bytes decode to printable text, hex otherwise
pub fn try_decode_ascii(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text)
            if text
                .chars()
                .all(|ch| (' '..='~').contains(&ch) || matches!(ch, '\r' | '\n' | '\t')) =>
        {
            text.to_string()
        }
        _ => hex::encode(bytes),
    }
}

pub fn normalize_policy_key(key: &CborValue) -> Option<String> {
    match key {
        CborValue::Bytes(bytes) => Some(hex::encode(bytes)),
        CborValue::Text(text) => Some(text.to_lowercase()),
        _ => None,
    }
}

pub fn normalize_asset_key(key: &CborValue) -> Option<String> {
    match key {
        CborValue::Bytes(bytes) => Some(try_decode_ascii(bytes)),
        CborValue::Text(text) => Some(text.clone()),
        CborValue::Uint(x) => Some(x.to_string()),
        _ => None,
    }
}

fn normalize_field_key(key: &CborValue) -> Option<String> {
    match key {
        CborValue::Text(text) => Some(text.clone()),
        CborValue::Bytes(bytes) => Some(try_decode_ascii(bytes)),
        CborValue::Uint(x) => Some(x.to_string()),
        _ => None,
    }
}

/// Decodes a hex payload segment: whitespace stripped, optional `0x`
/// prefix, case-insensitive, strictly even length
pub fn decode_hex_segment(raw: &str, asset: &str) -> Result<Vec<u8>, Cip25Error> {
    let cleaned: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned).to_lowercase();

    if cleaned.len() % 2 != 0 {
        return Err(Cip25Error::SegmentOddLength {
            asset: asset.to_string(),
        });
    }

    hex::decode(&cleaned).map_err(|_| Cip25Error::SegmentHex {
        asset: asset.to_string(),
    })
}

fn field_as_string(value: &CborValue) -> Option<String> {
    match value {
        CborValue::Text(text) => Some(text.clone()),
        CborValue::Bytes(bytes) => Some(try_decode_ascii(bytes)),
        _ => None,
    }
}

fn field_as_u64(value: &CborValue) -> Option<u64> {
    match value {
        CborValue::Uint(x) => Some(*x),
        CborValue::Text(text) => text.parse().ok(),
        _ => None,
    }
}

fn field_as_hash(value: &CborValue) -> Result<Hash<32>, Cip25Error> {
    match value {
        CborValue::Text(text) => Hash::from_str(text).map_err(|_| Cip25Error::BadDigest),
        CborValue::Bytes(bytes) => {
            Hash::try_from(bytes.as_slice()).map_err(|_| Cip25Error::BadDigest)
        }
        _ => Err(Cip25Error::BadDigest),
    }
}

/// Resolves a digest declared under a canonical key or its historical
/// alias; both present and disagreeing is an error
fn digest_field(
    asset: &Cip25Asset,
    canonical: &str,
    alias: &str,
) -> Result<Option<Hash<32>>, Cip25Error> {
    let first = asset.field(canonical).map(field_as_hash).transpose()?;
    let second = asset.field(alias).map(field_as_hash).transpose()?;

    match (first, second) {
        (Some(a), Some(b)) if a != b => Err(Cip25Error::ConflictingDigests),
        (Some(a), _) => Ok(Some(a)),
        (None, b) => Ok(b),
    }
}

/// Enumerates the assets under label-721 metadata for one policy.
///
/// Policy keys arrive as bytes or hex text; asset names as bytes or text.
/// Entries that do not look like CIP-25 at all are silently skipped.
pub fn extract_cip25_assets(metadata_721: &CborValue, wanted_policy_hex: &str) -> Vec<Cip25Asset> {
    let wanted = wanted_policy_hex.to_lowercase();
    let mut out = Vec::new();

    let policies = match metadata_721.as_map() {
        Some(entries) => entries,
        None => return out,
    };

    for (policy_key, policy_value) in policies {
        let policy_hex = match normalize_policy_key(policy_key) {
            Some(hex) => hex,
            None => continue,
        };

        if policy_hex != wanted {
            continue;
        }

        let assets = match policy_value.as_map() {
            Some(entries) => entries,
            None => continue,
        };

        for (asset_key, asset_value) in assets {
            let asset_name = match normalize_asset_key(asset_key) {
                Some(name) => name,
                None => continue,
            };

            let fields = match asset_value.as_map() {
                Some(entries) => entries
                    .iter()
                    .filter_map(|(k, v)| normalize_field_key(k).map(|k| (k, v.clone())))
                    .collect(),
                None => vec![("value".to_string(), asset_value.clone())],
            };

            out.push(Cip25Asset {
                policy_id: policy_hex.clone(),
                asset_name,
                fields,
            });
        }
    }

    out
}

fn payload_segments(asset: &Cip25Asset) -> Result<Option<Vec<Vec<u8>>>, Cip25Error> {
    let payload = match asset.first_field(&["payload", "segments", "seg"]) {
        Some(value) => value,
        None => return Ok(None),
    };

    let mut segments = Vec::new();

    match payload {
        CborValue::Array(items) => {
            for item in items {
                match item {
                    CborValue::Bytes(bytes) => segments.push(bytes.clone()),
                    CborValue::Text(text) => {
                        segments.push(decode_hex_segment(text, &asset.asset_name)?)
                    }
                    _ => continue,
                }
            }
        }
        CborValue::Text(text) => segments.push(decode_hex_segment(text, &asset.asset_name)?),
        CborValue::Bytes(bytes) => segments.push(bytes.clone()),
        _ => return Ok(None),
    }

    Ok(Some(segments))
}

fn into_manifest(asset: Cip25Asset) -> Result<Cip25Manifest, Cip25Error> {
    let codec = asset.field("codec").and_then(field_as_string);
    let content_type = asset
        .first_field(&["content_type", "content-type"])
        .and_then(field_as_string);
    let total_pages = asset
        .first_field(&["n", "pages", "total_pages", "total"])
        .and_then(field_as_u64);
    let sha256 = digest_field(&asset, "sha256", "sha")?;
    let sha256_gz = digest_field(&asset, "sha256_gz", "sha_gz")?;

    Ok(Cip25Manifest {
        asset,
        codec,
        content_type,
        total_pages,
        sha256,
        sha256_gz,
    })
}

/// Splits assets into scroll pages and the optional manifest.
///
/// An asset is the manifest when its name equals the declared manifest
/// name, or when it carries any manifest-only field; otherwise a record
/// with a payload is a page.
pub fn classify_assets(
    assets: Vec<Cip25Asset>,
    manifest_asset: Option<&str>,
) -> Result<(Vec<Cip25Page>, Option<Cip25Manifest>), Cip25Error> {
    let mut pages = Vec::new();
    let mut manifest = None;

    for asset in assets {
        let is_manifest = manifest_asset.is_some_and(|name| asset.asset_name == name)
            || MANIFEST_KEYS.iter().any(|key| asset.field(key).is_some());

        if is_manifest {
            manifest = Some(into_manifest(asset)?);
            continue;
        }

        let index = asset
            .first_field(&["i", "index"])
            .and_then(field_as_u64);
        let total = asset.first_field(&["n", "total"]).and_then(field_as_u64);

        if let Some(payload_segments) = payload_segments(&asset)? {
            pages.push(Cip25Page {
                asset,
                index,
                total,
                payload_segments,
            });
        }
    }

    Ok((pages, manifest))
}

/// Orders pages for concatenation: indexed pages first by index, the rest
/// after them by asset name. Duplicate indices are rejected.
pub fn sort_pages(pages: &mut [Cip25Page]) -> Result<(), Cip25Error> {
    pages.sort_by(|a, b| match (a.index, b.index) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.asset.asset_name.cmp(&b.asset.asset_name),
    });

    for pair in pages.windows(2) {
        if let (Some(x), Some(y)) = (pair[0].index, pair[1].index) {
            if x == y {
                return Err(Cip25Error::DuplicateIndex { index: x });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CborValue {
        CborValue::Text(s.into())
    }

    fn asset_map(entries: Vec<(&str, CborValue)>) -> CborValue {
        CborValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (text(k), v))
                .collect(),
        )
    }

    fn sample_metadata(policy: &[u8; 28]) -> CborValue {
        CborValue::Map(vec![(
            CborValue::Bytes(policy.to_vec()),
            CborValue::Map(vec![
                (
                    CborValue::Bytes(b"X_P0001".to_vec()),
                    asset_map(vec![
                        ("i", CborValue::Uint(1)),
                        (
                            "payload",
                            CborValue::Array(vec![text("48656c6c6f2c20")]),
                        ),
                    ]),
                ),
                (
                    CborValue::Bytes(b"X_P0002".to_vec()),
                    asset_map(vec![
                        ("i", CborValue::Uint(2)),
                        ("payload", CborValue::Array(vec![text("776f726c6421")])),
                    ]),
                ),
                (
                    CborValue::Bytes(b"X_MANIFEST".to_vec()),
                    asset_map(vec![
                        ("codec", text("none")),
                        ("content_type", text("text/plain")),
                        ("n", CborValue::Uint(2)),
                        (
                            "sha256",
                            text("315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"),
                        ),
                    ]),
                ),
            ]),
        )])
    }

    #[test]
    fn extracts_and_classifies_pages_and_manifest() {
        let policy = [0xcd; 28];
        let metadata = sample_metadata(&policy);

        let assets = extract_cip25_assets(&metadata, &hex::encode(policy));
        assert_eq!(assets.len(), 3);

        let (mut pages, manifest) = classify_assets(assets, None).unwrap();
        let manifest = manifest.unwrap();

        assert_eq!(manifest.codec.as_deref(), Some("none"));
        assert_eq!(manifest.content_type.as_deref(), Some("text/plain"));
        assert_eq!(manifest.total_pages, Some(2));
        assert!(manifest.sha256.is_some());

        sort_pages(&mut pages).unwrap();
        let joined: Vec<u8> = pages
            .iter()
            .flat_map(|p| p.payload_segments.iter().flatten().copied())
            .collect();

        assert_eq!(joined, b"Hello, world!");
    }

    #[test]
    fn wrong_policy_yields_nothing() {
        let metadata = sample_metadata(&[0xcd; 28]);
        let assets = extract_cip25_assets(&metadata, &hex::encode([0xee; 28]));
        assert!(assets.is_empty());
    }

    #[test]
    fn policy_key_as_text_is_lowercased() {
        let metadata = CborValue::Map(vec![(
            text("ABCDEF"),
            CborValue::Map(vec![(text("a"), asset_map(vec![]))]),
        )]);

        let assets = extract_cip25_assets(&metadata, "abcdef");
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].policy_id, "abcdef");
    }

    #[test]
    fn hex_segments_tolerate_prefix_whitespace_and_case() {
        let decoded = decode_hex_segment("0x48 65 6C 6c\n6f", "a").unwrap();
        assert_eq!(decoded, b"Hello");
    }

    #[test]
    fn odd_length_segment_is_malformed() {
        let err = decode_hex_segment("abc", "a").unwrap_err();
        assert_eq!(
            err,
            Cip25Error::SegmentOddLength {
                asset: "a".to_string()
            }
        );
    }

    #[test]
    fn non_hex_segment_is_malformed() {
        let err = decode_hex_segment("zz", "a").unwrap_err();
        assert_eq!(
            err,
            Cip25Error::SegmentHex {
                asset: "a".to_string()
            }
        );
    }

    #[test]
    fn pages_without_index_sort_after_indexed_ones() {
        let make_page = |name: &str, index: Option<u64>| Cip25Page {
            asset: Cip25Asset {
                policy_id: "p".into(),
                asset_name: name.into(),
                fields: vec![],
            },
            index,
            total: None,
            payload_segments: vec![],
        };

        let mut pages = vec![
            make_page("zz", None),
            make_page("aa", None),
            make_page("mid", Some(2)),
            make_page("first", Some(1)),
        ];

        sort_pages(&mut pages).unwrap();

        let names: Vec<_> = pages.iter().map(|p| p.asset.asset_name.as_str()).collect();
        assert_eq!(names, vec!["first", "mid", "aa", "zz"]);
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        let make_page = |index| Cip25Page {
            asset: Cip25Asset {
                policy_id: "p".into(),
                asset_name: "x".into(),
                fields: vec![],
            },
            index: Some(index),
            total: None,
            payload_segments: vec![],
        };

        let mut pages = vec![make_page(3), make_page(3)];
        let err = sort_pages(&mut pages).unwrap_err();

        assert_eq!(err, Cip25Error::DuplicateIndex { index: 3 });
    }

    #[test]
    fn conflicting_sha_aliases_are_rejected() {
        let asset = Cip25Asset {
            policy_id: "p".into(),
            asset_name: "m".into(),
            fields: vec![
                (
                    "sha256".into(),
                    text("315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"),
                ),
                (
                    "sha".into(),
                    text("0000000000000000000000000000000000000000000000000000000000000000"),
                ),
            ],
        };

        let err = classify_assets(vec![asset], None).unwrap_err();
        assert_eq!(err, Cip25Error::ConflictingDigests);
    }

    #[test]
    fn agreeing_sha_aliases_are_accepted() {
        let digest = "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3";
        let asset = Cip25Asset {
            policy_id: "p".into(),
            asset_name: "m".into(),
            fields: vec![("sha256".into(), text(digest)), ("sha".into(), text(digest))],
        };

        let (_, manifest) = classify_assets(vec![asset], None).unwrap();
        assert_eq!(manifest.unwrap().sha256.unwrap().to_string(), digest);
    }
}
