//! The scroll reconstruction engine
//!
//! Two paths lead to the same result: reading one inline datum out of a
//! known transaction output, or scanning forward from a start point and
//! reassembling CIP-25 page assets.

use flate2::read::GzDecoder;
use scrolls_chain::block::{parse_block, ParsedBlock, TxBody};
use scrolls_chain::cip25::{
    classify_assets, extract_cip25_assets, sort_pages, Cip25Manifest, Cip25Page, CIP25_LABEL,
};
use scrolls_chain::stream::HeaderStream;
use scrolls_codec::value::CborValue;
use scrolls_crypto::hash::{Hash, Hasher, Sha256};
use scrolls_network::facade::PeerClient;
use scrolls_network::miniprotocols::blockfetch;
use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Error;
use crate::scroll::ScrollDescriptor;

/// Idle budget of a reconstruction since last forward progress
pub const RECONSTRUCT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const OCTET_STREAM: &str = "application/octet-stream";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug)]
pub struct ReconstructedScroll {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub codec_used: Option<String>,
    pub sha256: Hash<32>,
}

/// Reconstructs a scroll over an open peer connection
pub async fn reconstruct(
    peer: &mut PeerClient,
    descriptor: &ScrollDescriptor,
) -> Result<ReconstructedScroll, Error> {
    match descriptor {
        ScrollDescriptor::InlineDatum {
            tx_id,
            tx_ix,
            point,
            expected_sha256,
            content_type,
        } => {
            let point = point.clone().ok_or_else(|| {
                Error::not_found("block point for the transaction (resolve it via an indexer)")
            })?;

            let body = peer.blockfetch.fetch_single(point).await.map_err(Error::from)?;
            let block = parse_block(&body);

            let tx = locate_tx(&block, tx_id.as_ref())?;
            let bytes = output_inline_datum(tx, *tx_ix)?;

            if let Some(expected) = expected_sha256 {
                verify_digest("sha256", expected, &bytes)?;
            }

            Ok(ReconstructedScroll {
                sha256: Sha256::hash(&bytes),
                content_type: content_type.clone().unwrap_or_else(|| OCTET_STREAM.into()),
                codec_used: None,
                bytes,
            })
        }

        ScrollDescriptor::Cip25Pages {
            policy_id,
            manifest_asset,
            start_point,
            max_scan_blocks,
            expected_sha256,
            content_type,
        } => {
            let (intersect, _tip) = peer
                .chainsync
                .find_intersect(vec![start_point.clone()])
                .await
                .map_err(Error::from)?;

            if intersect.is_none() {
                return Err(Error::not_found("start point on the relay's chain"));
            }

            let (pages, manifest) = scan_pages(
                peer,
                policy_id,
                manifest_asset.as_deref(),
                *max_scan_blocks,
            )
            .await?;

            finish_cip25(
                pages,
                manifest,
                expected_sha256.as_ref(),
                content_type.as_deref(),
            )
        }
    }
}

/// Walks headers forward, fetching and parsing every block, collecting the
/// policy's pages and manifest. Stops early once the manifest's declared
/// page count is reached.
async fn scan_pages(
    peer: &mut PeerClient,
    policy_id: &str,
    manifest_asset: Option<&str>,
    max_scan_blocks: usize,
) -> Result<(Vec<Cip25Page>, Option<Cip25Manifest>), Error> {
    // header streaming and block fetching run on disjoint mini-protocols
    let chainsync = &mut peer.chainsync;
    let blockfetch = &mut peer.blockfetch;

    let mut stream = HeaderStream::new(chainsync, max_scan_blocks, RECONSTRUCT_IDLE_TIMEOUT);

    let mut pages: Vec<Cip25Page> = Vec::new();
    let mut manifest: Option<Cip25Manifest> = None;
    let mut seen_pages: BTreeSet<String> = BTreeSet::new();

    while let Some((point, _header)) = stream.next().await? {
        let body = match blockfetch.fetch_single(point.clone()).await {
            Ok(body) => body,
            Err(blockfetch::ClientError::NoBlocks) => {
                warn!(?point, "header seen but block not served, skipping");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let block = parse_block(&body);

        for (_tx_index, metadata) in block.metadata_label(CIP25_LABEL) {
            let assets = extract_cip25_assets(metadata, policy_id);
            if assets.is_empty() {
                continue;
            }

            let (new_pages, new_manifest) = classify_assets(assets, manifest_asset)?;

            for page in new_pages {
                if seen_pages.insert(page.asset.asset_name.clone()) {
                    pages.push(page);
                }
            }

            if manifest.is_none() {
                manifest = new_manifest;
            }
        }

        if let Some(total) = manifest.as_ref().and_then(|m| m.total_pages) {
            if seen_pages.len() as u64 >= total {
                debug!(total, "declared page count reached, stopping scan");
                break;
            }
        }
    }

    Ok((pages, manifest))
}

/// Orders, concatenates, decompresses and verifies collected pages
pub(crate) fn finish_cip25(
    mut pages: Vec<Cip25Page>,
    manifest: Option<Cip25Manifest>,
    expected_sha256: Option<&Hash<32>>,
    fallback_content_type: Option<&str>,
) -> Result<ReconstructedScroll, Error> {
    if pages.is_empty() {
        return Err(Error::not_found("pages under the policy"));
    }

    sort_pages(&mut pages)?;

    if let Some(total) = manifest.as_ref().and_then(|m| m.total_pages) {
        if (total as usize) < pages.len() {
            return Err(Error::malformed(
                "cip-25 manifest",
                format!("declares {total} pages but {} were collected", pages.len()),
            ));
        }
    }

    let gz_bytes: Vec<u8> = pages
        .iter()
        .flat_map(|page| page.payload_segments.iter().flatten().copied())
        .collect();

    if let Some(expected) = manifest.as_ref().and_then(|m| m.sha256_gz.as_ref()) {
        verify_digest("sha256_gz", expected, &gz_bytes)?;
    }

    let codec = manifest.as_ref().and_then(|m| m.codec.clone());
    let (bytes, codec_used) = maybe_gunzip(gz_bytes, codec)?;

    if let Some(expected) = manifest.as_ref().and_then(|m| m.sha256.as_ref()) {
        verify_digest("sha256", expected, &bytes)?;
    }

    if let Some(expected) = expected_sha256 {
        verify_digest("sha256", expected, &bytes)?;
    }

    let content_type = manifest
        .as_ref()
        .and_then(|m| m.content_type.clone())
        .or_else(|| fallback_content_type.map(String::from))
        .unwrap_or_else(|| OCTET_STREAM.into());

    Ok(ReconstructedScroll {
        sha256: Sha256::hash(&bytes),
        content_type,
        codec_used,
        bytes,
    })
}

/// Finds the transaction inside a parsed block, either by its id (the
/// Blake2b-256 of the raw body) or, without an id, as the only one there
fn locate_tx<'a>(block: &'a ParsedBlock, tx_id: Option<&Hash<32>>) -> Result<&'a TxBody, Error> {
    match tx_id {
        Some(id) => block
            .tx_bodies
            .iter()
            .find(|tx| Hasher::<256>::hash(&tx.raw).as_ref() == id.as_ref())
            .ok_or_else(|| Error::not_found(format!("transaction {id} in block"))),
        None if block.tx_bodies.len() == 1 => Ok(&block.tx_bodies[0]),
        None => Err(Error::not_found(
            "unambiguous transaction (block has several, supply a tx id)",
        )),
    }
}

/// Extracts the inline datum bytes of one output of a transaction body
pub(crate) fn output_inline_datum(tx: &TxBody, tx_ix: u64) -> Result<Vec<u8>, Error> {
    let outputs = tx
        .value
        .get_uint(1)
        .and_then(CborValue::as_array)
        .ok_or_else(|| Error::malformed("transaction body", "outputs are missing"))?;

    let output = outputs
        .get(tx_ix as usize)
        .ok_or_else(|| Error::not_found(format!("output index {tx_ix} in transaction")))?;

    inline_datum_bytes(output)
}

/// Unwraps a datum option down to its byte payload.
///
/// Outputs come as maps (key 2) or tuples (position 2); the option itself
/// is a two-element array whose payload may be tag-24 wrapped, and whose
/// bytes may be cbor-wrapped once more.
pub(crate) fn inline_datum_bytes(output: &CborValue) -> Result<Vec<u8>, Error> {
    let option = match output {
        CborValue::Map(_) => output.get_uint(2),
        CborValue::Array(items) => items.get(2),
        _ => None,
    }
    .ok_or_else(|| Error::not_found("inline datum on the selected output"))?;

    let items = option
        .as_array()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| Error::malformed("inline datum", "datum option is not a pair"))?;

    match items[0].as_u64() {
        Some(0) => {
            return Err(Error::not_found(
                "inline datum (output only references a datum hash)",
            ))
        }
        Some(1) | Some(2) => {}
        _ => {
            return Err(Error::malformed(
                "inline datum",
                "unrecognized datum option tag",
            ))
        }
    }

    let bytes = match &items[1] {
        CborValue::Tag(24, inner) => match inner.as_ref() {
            CborValue::Bytes(bytes) => bytes.clone(),
            _ => {
                return Err(Error::malformed(
                    "inline datum",
                    "tag-24 payload is not bytes",
                ))
            }
        },
        CborValue::Bytes(bytes) => bytes.clone(),
        _ => {
            return Err(Error::malformed(
                "inline datum",
                "datum payload is not bytes",
            ))
        }
    };

    // the datum bytes may themselves be cbor-wrapped bytes; decode once
    match CborValue::from_cbor(&bytes) {
        Ok(CborValue::Bytes(inner)) => Ok(inner),
        _ => Ok(bytes),
    }
}

fn verify_digest(which: &'static str, expected: &Hash<32>, bytes: &[u8]) -> Result<(), Error> {
    let actual = Sha256::hash(bytes);

    if &actual != expected {
        return Err(Error::IntegrityFailure {
            which,
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(())
}

/// Decompresses when the manifest says gzip or the bytes carry the gzip
/// magic; anything else passes through untouched
fn maybe_gunzip(
    bytes: Vec<u8>,
    codec: Option<String>,
) -> Result<(Vec<u8>, Option<String>), Error> {
    let declared_gzip = codec
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case("gzip"));
    let has_magic = bytes.starts_with(&GZIP_MAGIC);

    if declared_gzip || has_magic {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|err| Error::malformed("gzip stream", err.to_string()))?;

        return Ok((decoded, Some("gzip".into())));
    }

    Ok((bytes, codec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use scrolls_chain::cip25::Cip25Asset;
    use std::io::Write;
    use std::str::FromStr;

    fn make_page(name: &str, index: u64, segments: Vec<Vec<u8>>) -> Cip25Page {
        Cip25Page {
            asset: Cip25Asset {
                policy_id: "p".into(),
                asset_name: name.into(),
                fields: vec![],
            },
            index: Some(index),
            total: None,
            payload_segments: segments,
        }
    }

    fn make_manifest(
        codec: Option<&str>,
        content_type: Option<&str>,
        total_pages: Option<u64>,
        sha256: Option<Hash<32>>,
        sha256_gz: Option<Hash<32>>,
    ) -> Cip25Manifest {
        Cip25Manifest {
            asset: Cip25Asset {
                policy_id: "p".into(),
                asset_name: "manifest".into(),
                fields: vec![],
            },
            codec: codec.map(String::from),
            content_type: content_type.map(String::from),
            total_pages,
            sha256,
            sha256_gz,
        }
    }

    #[test]
    fn hello_world_pages_without_gzip() {
        let pages = vec![
            make_page("X_P0001", 1, vec![b"Hello, ".to_vec()]),
            make_page("X_P0002", 2, vec![b"world!".to_vec()]),
        ];

        let manifest = make_manifest(
            Some("none"),
            Some("text/plain"),
            Some(2),
            Some(Sha256::hash(b"Hello, world!")),
            None,
        );

        let scroll = finish_cip25(pages, Some(manifest), None, None).unwrap();

        assert_eq!(scroll.bytes, b"Hello, world!");
        assert_eq!(scroll.bytes.len(), 13);
        assert_eq!(scroll.content_type, "text/plain");
        assert_eq!(scroll.codec_used.as_deref(), Some("none"));
        assert_eq!(
            scroll.sha256.to_string(),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn gzip_path_checks_both_digests() {
        let plain: Vec<u8> = b"abc\n".repeat(10_000);
        assert_eq!(plain.len(), 40_000);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let gz = encoder.finish().unwrap();

        let pages = vec![make_page("P1", 1, vec![gz.clone()])];
        let manifest = make_manifest(
            Some("gzip"),
            Some("text/plain"),
            Some(1),
            Some(Sha256::hash(&plain)),
            Some(Sha256::hash(&gz)),
        );

        let scroll = finish_cip25(pages, Some(manifest), None, None).unwrap();

        assert_eq!(scroll.bytes.len(), 40_000);
        assert_eq!(scroll.bytes, plain);
        assert_eq!(scroll.codec_used.as_deref(), Some("gzip"));
    }

    #[test]
    fn corrupted_segment_fails_integrity() {
        let mut segment = b"Hello, ".to_vec();
        segment[0] ^= 0x01;

        let pages = vec![
            make_page("X_P0001", 1, vec![segment]),
            make_page("X_P0002", 2, vec![b"world!".to_vec()]),
        ];

        let manifest = make_manifest(
            Some("none"),
            Some("text/plain"),
            Some(2),
            Some(Sha256::hash(b"Hello, world!")),
            None,
        );

        let err = finish_cip25(pages, Some(manifest), None, None).unwrap_err();

        match err {
            Error::IntegrityFailure { which, .. } => assert_eq!(which, "sha256"),
            other => panic!("expected integrity failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_manifest_defaults_to_octet_stream() {
        let pages = vec![make_page("only", 1, vec![vec![1, 2, 3]])];

        let scroll = finish_cip25(pages, None, None, None).unwrap();

        assert_eq!(scroll.bytes, vec![1, 2, 3]);
        assert_eq!(scroll.content_type, OCTET_STREAM);
        assert!(scroll.codec_used.is_none());
    }

    #[test]
    fn descriptor_digest_applies_without_manifest() {
        let pages = vec![make_page("only", 1, vec![b"data".to_vec()])];
        let wrong = Hash::<32>::from_str(
            "0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();

        let err = finish_cip25(pages, None, Some(&wrong), None).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure { which: "sha256", .. }));
    }

    #[test]
    fn undeclared_pages_are_an_error() {
        let pages = vec![
            make_page("a", 1, vec![vec![0]]),
            make_page("b", 2, vec![vec![1]]),
        ];
        let manifest = make_manifest(None, None, Some(1), None, None);

        // a manifest-only field is enough to make it a manifest, so an
        // undercounted total is a malformed scroll
        let err = finish_cip25(pages, Some(manifest), None, None).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn gzip_magic_triggers_decompression_without_codec() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        let gz = encoder.finish().unwrap();

        let pages = vec![make_page("a", 1, vec![gz])];

        let scroll = finish_cip25(pages, None, None, None).unwrap();
        assert_eq!(scroll.bytes, b"payload");
        assert_eq!(scroll.codec_used.as_deref(), Some("gzip"));
    }

    fn inline_output(datum_option: CborValue) -> CborValue {
        CborValue::Map(vec![
            (CborValue::Uint(0), CborValue::Bytes(vec![0x61; 29])),
            (CborValue::Uint(1), CborValue::Uint(2_000_000)),
            (CborValue::Uint(2), datum_option),
        ])
    }

    #[test]
    fn inline_datum_unwraps_tag24_and_nested_bytes() {
        let file = b"scroll contents".to_vec();
        let datum_cbor = CborValue::Bytes(file.clone()).to_vec();

        let option = CborValue::Array(vec![
            CborValue::Uint(2),
            CborValue::Tag(24, Box::new(CborValue::Bytes(datum_cbor))),
        ]);

        let bytes = inline_datum_bytes(&inline_output(option)).unwrap();
        assert_eq!(bytes, file);
    }

    #[test]
    fn inline_datum_accepts_babbage_tag_one() {
        let option = CborValue::Array(vec![
            CborValue::Uint(1),
            CborValue::Bytes(b"raw".to_vec()),
        ]);

        let bytes = inline_datum_bytes(&inline_output(option)).unwrap();
        assert_eq!(bytes, b"raw");
    }

    #[test]
    fn datum_hash_reference_is_not_found() {
        let option = CborValue::Array(vec![
            CborValue::Uint(0),
            CborValue::Bytes(vec![0xaa; 32]),
        ]);

        let err = inline_datum_bytes(&inline_output(option)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn locate_tx_matches_blake2b_of_raw_body() {
        let tx_a = TxBody {
            raw: CborValue::Map(vec![(CborValue::Uint(0), CborValue::Uint(1))]).to_vec(),
            value: CborValue::Map(vec![(CborValue::Uint(0), CborValue::Uint(1))]),
        };
        let tx_b = TxBody {
            raw: CborValue::Map(vec![(CborValue::Uint(0), CborValue::Uint(2))]).to_vec(),
            value: CborValue::Map(vec![(CborValue::Uint(0), CborValue::Uint(2))]),
        };

        let wanted = Hasher::<256>::hash(&tx_b.raw);

        let block = ParsedBlock {
            era: None,
            raw_cbor: vec![],
            tx_bodies: vec![tx_a, tx_b],
            aux_data: Default::default(),
        };

        let found = locate_tx(&block, Some(&wanted)).unwrap();
        assert_eq!(Hasher::<256>::hash(&found.raw), wanted);

        let missing = Hasher::<256>::hash(b"elsewhere");
        assert!(locate_tx(&block, Some(&missing)).is_err());
    }
}
