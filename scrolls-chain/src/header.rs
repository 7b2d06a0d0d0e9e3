//! Chain point derivation from roll-forward headers

use scrolls_codec::value::CborValue;
use scrolls_crypto::hash::Hasher;
use scrolls_network::miniprotocols::chainsync::HeaderContent;
use scrolls_network::miniprotocols::Point;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header cbor does not parse")]
    Cbor(#[from] scrolls_codec::minicbor::decode::Error),

    #[error("could not locate the slot inside the header body")]
    MissingSlot,
}

/// Derives the chain point of a header carried by a roll-forward.
///
/// The header decodes to `[[header_body, …], …]` with the slot at position
/// 1 of the header body; the point hash is the Blake2b-256 digest of the
/// serialized header itself.
pub fn header_point(content: &HeaderContent) -> Result<Point, HeaderError> {
    let decoded = CborValue::from_cbor(&content.cbor)?;

    let body = decoded
        .as_array()
        .and_then(|items| items.first())
        .ok_or(HeaderError::MissingSlot)?;

    let slot = body
        .as_array()
        .and_then(|items| items.get(1))
        .and_then(|value| value.as_u64())
        .ok_or(HeaderError::MissingSlot)?;

    let hash = Hasher::<256>::hash(&content.cbor);

    Ok(Point::Specific(slot, hash.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_slot_and_hash() {
        // [[block_number, slot, …], signature]
        let header_body = CborValue::Array(vec![
            CborValue::Uint(12),
            CborValue::Uint(424242),
            CborValue::Bytes(vec![0x01; 32]),
        ]);
        let header = CborValue::Array(vec![header_body, CborValue::Bytes(vec![0x02; 8])]);

        let cbor = header.to_vec();
        let content = HeaderContent {
            variant: 6,
            byron_prefix: None,
            cbor: cbor.clone(),
        };

        let point = header_point(&content).unwrap();

        assert_eq!(point.slot_or_default(), 424242);
        assert_eq!(
            point.hash_or_default(),
            Hasher::<256>::hash(&cbor).as_ref()
        );
    }

    #[test]
    fn missing_slot_is_an_error() {
        let content = HeaderContent {
            variant: 6,
            byron_prefix: None,
            cbor: CborValue::Array(vec![]).to_vec(),
        };

        assert!(matches!(
            header_point(&content),
            Err(HeaderError::MissingSlot)
        ));
    }
}
