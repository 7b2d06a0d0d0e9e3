//! Tolerant parser for hard-fork-combinator wrapped block bodies

use scrolls_codec::minicbor::data::Type;
use scrolls_codec::minicbor::{decode, Decoder};
use scrolls_codec::value::CborValue;
use std::collections::BTreeMap;
use tracing::warn;

use crate::era::Era;

/// Per-transaction metadata: label to value
pub type Metadata = BTreeMap<u64, CborValue>;

/// A transaction body with the exact wire slice it was decoded from.
///
/// The raw slice is what the transaction id hashes over.
#[derive(Debug, Clone)]
pub struct TxBody {
    pub raw: Vec<u8>,
    pub value: CborValue,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedBlock {
    pub era: Option<Era>,
    pub raw_cbor: Vec<u8>,
    pub tx_bodies: Vec<TxBody>,
    /// tx index -> metadata labels, keys always within `0..tx_bodies.len()`
    pub aux_data: BTreeMap<u64, Metadata>,
}

impl ParsedBlock {
    /// All values carried under a metadata label, with their tx index
    pub fn metadata_label(&self, label: u64) -> impl Iterator<Item = (u64, &CborValue)> {
        self.aux_data
            .iter()
            .filter_map(move |(tx_index, metadata)| {
                metadata.get(&label).map(|value| (*tx_index, value))
            })
    }
}

/// Positions where eras keep the auxiliary data map inside the block
/// array: Alonzo onwards at 3, earlier Shelley-based eras at 2. Extend the
/// table if a future era moves it again.
const AUX_INDEX_CANDIDATES: [usize; 2] = [3, 2];

/// Parses a block body into transactions and their metadata.
///
/// Never fails: unrecognized structure degrades into a block with fewer
/// parts and a warning, with `raw_cbor` always retained.
pub fn parse_block(raw: &[u8]) -> ParsedBlock {
    let mut block = ParsedBlock {
        raw_cbor: raw.to_vec(),
        ..Default::default()
    };

    let inner = match unwrap_envelope(raw, &mut block.era) {
        Ok(inner) => inner,
        Err(err) => {
            warn!(%err, "unrecognized block envelope");
            return block;
        }
    };

    if let Err(err) = parse_inner(&inner, &mut block) {
        warn!(%err, "block parsing incomplete");
    }

    block
}

/// Strips the HFC wrapping down to the cbor of the block array itself,
/// recording the era tag along the way
fn unwrap_envelope(raw: &[u8], era: &mut Option<Era>) -> Result<Vec<u8>, decode::Error> {
    let mut current = raw.to_vec();

    loop {
        let mut d = Decoder::new(&current);

        match d.datatype()? {
            Type::Tag => {
                d.tag()?;
                if d.datatype()? == Type::Bytes {
                    current = d.bytes()?.to_vec();
                } else {
                    let start = d.position();
                    current = current[start..].to_vec();
                }
            }
            Type::Bytes => {
                current = d.bytes()?.to_vec();
            }
            Type::Array | Type::ArrayIndef => {
                let mut probe = Decoder::new(&current);
                let len = probe.array()?;

                if len == Some(2) && matches!(probe.datatype()?, Type::U8 | Type::U16 | Type::U32 | Type::U64) {
                    let era_int = probe.u64()?;

                    if let Ok(parsed) = Era::try_from(era_int) {
                        *era = Some(parsed);

                        let start = probe.position();
                        probe.skip()?;
                        let end = probe.position();
                        current = current[start..end].to_vec();
                        continue;
                    }
                }

                return Ok(current);
            }
            _ => return Err(decode::Error::message("unrecognized block envelope")),
        }
    }
}

fn parse_inner(bytes: &[u8], block: &mut ParsedBlock) -> Result<(), decode::Error> {
    let mut d = Decoder::new(bytes);
    let len = d.array()?;

    // element 0: header
    d.skip()?;

    // element 1: tx bodies
    match d.datatype()? {
        Type::Array | Type::ArrayIndef => {
            let n = d.array()?;
            match n {
                Some(n) => {
                    for _ in 0..n {
                        push_tx_body(&mut d, bytes, block)?;
                    }
                }
                None => loop {
                    if d.datatype()? == Type::Break {
                        d.skip()?;
                        break;
                    }
                    push_tx_body(&mut d, bytes, block)?;
                },
            }
        }
        _ => return Err(decode::Error::message("tx bodies are not a sequence")),
    }

    // remaining elements, indexed from 2: witness sets, aux data, etc.
    let mut trailing: BTreeMap<usize, CborValue> = BTreeMap::new();
    let mut position = 2usize;

    match len {
        Some(n) => {
            for _ in 2..n {
                trailing.insert(position, d.decode()?);
                position += 1;
            }
        }
        None => loop {
            if d.datatype()? == Type::Break {
                break;
            }
            trailing.insert(position, d.decode()?);
            position += 1;
        },
    }

    for candidate in AUX_INDEX_CANDIDATES {
        if let Some(value) = trailing.get(&candidate) {
            if value.as_map().is_some() {
                collect_aux_data(value, block);
                break;
            }
        }
    }

    Ok(())
}

fn push_tx_body(
    d: &mut Decoder<'_>,
    bytes: &[u8],
    block: &mut ParsedBlock,
) -> Result<(), decode::Error> {
    let start = d.position();
    d.skip()?;
    let end = d.position();

    let raw = bytes[start..end].to_vec();
    let value = CborValue::from_cbor(&raw)?;

    block.tx_bodies.push(TxBody { raw, value });

    Ok(())
}

fn collect_aux_data(aux_map: &CborValue, block: &mut ParsedBlock) {
    let entries = match aux_map.as_map() {
        Some(entries) => entries,
        None => return,
    };

    for (key, value) in entries {
        let tx_index = match key.as_u64() {
            Some(x) => x,
            None => {
                warn!("non-integer tx index in aux data, dropping");
                continue;
            }
        };

        if tx_index as usize >= block.tx_bodies.len() {
            warn!(tx_index, "aux data key out of tx range, dropping");
            continue;
        }

        let metadata = extract_metadata_map(value.clone());
        if !metadata.is_empty() {
            block.aux_data.insert(tx_index, metadata);
        }
    }
}

/// Auxiliary data arrives as bytes, as `[metadata, …]`, or as a plain
/// label map depending on the era; labels are coerced to integers and
/// non-integer keys dropped
fn extract_metadata_map(aux: CborValue) -> Metadata {
    let aux = aux.unwrap_nested();

    let map = match &aux {
        CborValue::Map(_) => aux,
        CborValue::Array(items) => match items.first() {
            Some(first @ CborValue::Map(_)) => first.clone(),
            _ => return Metadata::new(),
        },
        _ => return Metadata::new(),
    };

    let mut out = Metadata::new();

    if let Some(entries) = map.as_map() {
        for (key, value) in entries {
            match key.as_u64() {
                Some(label) => {
                    out.insert(label, value.clone());
                }
                None => continue,
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrolls_codec::minicbor;
    use scrolls_codec::value::CborValue;

    fn label_map(label: u64, value: CborValue) -> CborValue {
        CborValue::Map(vec![(CborValue::Uint(label), value)])
    }

    /// [era, [header, [tx…], [wits…], {tx_index: aux}]]
    fn sample_block(era: u64, txs: Vec<CborValue>, aux: Vec<(u64, CborValue)>) -> Vec<u8> {
        let inner = CborValue::Array(vec![
            CborValue::Array(vec![CborValue::Uint(0)]),
            CborValue::Array(txs),
            CborValue::Array(vec![]),
            CborValue::Map(
                aux.into_iter()
                    .map(|(k, v)| (CborValue::Uint(k), v))
                    .collect(),
            ),
        ]);

        let envelope = CborValue::Array(vec![CborValue::Uint(era), inner]);
        minicbor::to_vec(&envelope).unwrap()
    }

    #[test]
    fn zero_transaction_block() {
        let raw = sample_block(6, vec![], vec![]);
        let block = parse_block(&raw);

        assert_eq!(block.era, Some(Era::Conway));
        assert!(block.tx_bodies.is_empty());
        assert!(block.aux_data.is_empty());
        assert_eq!(block.raw_cbor, raw);
    }

    #[test]
    fn aux_data_at_index_three() {
        let tx = CborValue::Map(vec![(CborValue::Uint(0), CborValue::Array(vec![]))]);
        let meta = label_map(721, CborValue::Text("x".into()));

        let raw = sample_block(5, vec![tx], vec![(0, meta)]);
        let block = parse_block(&raw);

        assert_eq!(block.era, Some(Era::Babbage));
        assert_eq!(block.tx_bodies.len(), 1);
        assert_eq!(
            block.aux_data[&0][&721],
            CborValue::Text("x".into())
        );
    }

    #[test]
    fn aux_data_at_index_two() {
        // pre-alonzo shape: [header, [tx…], {tx_index: aux}]
        let tx = CborValue::Map(vec![]);
        let inner = CborValue::Array(vec![
            CborValue::Array(vec![CborValue::Uint(0)]),
            CborValue::Array(vec![tx]),
            CborValue::Map(vec![(
                CborValue::Uint(0),
                label_map(674, CborValue::Text("msg".into())),
            )]),
        ]);
        let envelope = CborValue::Array(vec![CborValue::Uint(2), inner]);
        let raw = minicbor::to_vec(&envelope).unwrap();

        let block = parse_block(&raw);

        assert_eq!(block.era, Some(Era::Allegra));
        assert_eq!(
            block.aux_data[&0][&674],
            CborValue::Text("msg".into())
        );
    }

    #[test]
    fn aux_data_wrapped_in_bytes_and_list() {
        let meta = label_map(721, CborValue::Uint(1));
        let listed = CborValue::Array(vec![meta, CborValue::Null]);
        let as_bytes = CborValue::Bytes(listed.to_vec());

        let raw = sample_block(4, vec![CborValue::Map(vec![])], vec![(0, as_bytes)]);
        let block = parse_block(&raw);

        assert_eq!(block.aux_data[&0][&721], CborValue::Uint(1));
    }

    #[test]
    fn out_of_range_aux_keys_are_dropped() {
        let meta = label_map(721, CborValue::Uint(1));
        let raw = sample_block(5, vec![CborValue::Map(vec![])], vec![(9, meta)]);

        let block = parse_block(&raw);
        assert!(block.aux_data.is_empty());
    }

    #[test]
    fn garbage_still_returns_raw_cbor() {
        let raw = vec![0xff, 0x00, 0x01];
        let block = parse_block(&raw);

        assert!(block.tx_bodies.is_empty());
        assert_eq!(block.raw_cbor, raw);
    }

    #[test]
    fn tx_body_raw_slice_matches_reencoding() {
        let tx = CborValue::Map(vec![(
            CborValue::Uint(1),
            CborValue::Array(vec![CborValue::Uint(9)]),
        )]);
        let raw = sample_block(6, vec![tx.clone()], vec![]);

        let block = parse_block(&raw);
        assert_eq!(block.tx_bodies[0].raw, tx.to_vec());
        assert_eq!(block.tx_bodies[0].value, tx);
    }

    #[test]
    fn metadata_label_iterates_matching_txs() {
        let meta = label_map(721, CborValue::Uint(7));
        let raw = sample_block(
            6,
            vec![CborValue::Map(vec![]), CborValue::Map(vec![])],
            vec![(1, meta)],
        );

        let block = parse_block(&raw);
        let hits: Vec<_> = block.metadata_label(721).collect();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[0].1, &CborValue::Uint(7));
    }
}
