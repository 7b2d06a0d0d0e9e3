use scrolls_codec::minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};
use std::cmp::Ordering;
use std::fmt::Debug;

/// Well-known magic for mainnet
pub const MAINNET_MAGIC: u64 = 764824073;

/// Well-known magic for the legacy testnet
pub const TESTNET_MAGIC: u64 = 1097911063;

/// Well-known magic for preview
pub const PREVIEW_MAGIC: u64 = 2;

/// Well-known magic for preprod
pub const PREPROD_MAGIC: u64 = 1;

/// Protocol channel number for node-to-node handshakes
pub const PROTOCOL_N2N_HANDSHAKE: u16 = 0;

/// Protocol channel number for node-to-node chain-sync
pub const PROTOCOL_N2N_CHAIN_SYNC: u16 = 2;

/// Protocol channel number for node-to-node block-fetch
pub const PROTOCOL_N2N_BLOCK_FETCH: u16 = 3;

/// Protocol channel number for node-to-node keep-alive
pub const PROTOCOL_N2N_KEEP_ALIVE: u16 = 8;

/// A point within a chain
#[derive(Clone, Eq, PartialEq, Hash)]
pub enum Point {
    Origin,
    Specific(u64, Vec<u8>),
}

impl Point {
    pub fn new(slot: u64, hash: Vec<u8>) -> Self {
        Point::Specific(slot, hash)
    }

    pub fn slot_or_default(&self) -> u64 {
        match self {
            Point::Origin => 0,
            Point::Specific(slot, _) => *slot,
        }
    }

    pub fn hash_or_default(&self) -> &[u8] {
        match self {
            Point::Origin => &[],
            Point::Specific(_, hash) => hash,
        }
    }
}

impl Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Origin => write!(f, "Origin"),
            Self::Specific(slot, hash) => write!(f, "({}, {})", slot, hex::encode(hash)),
        }
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Point::Origin, Point::Origin) => Ordering::Equal,
            (Point::Origin, _) => Ordering::Less,
            (_, Point::Origin) => Ordering::Greater,
            (Point::Specific(s1, h1), Point::Specific(s2, h2)) => {
                s1.cmp(s2).then_with(|| h1.cmp(h2))
            }
        }
    }
}

impl Encode<()> for Point {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Point::Origin => e.array(0)?,
            Point::Specific(slot, hash) => e.array(2)?.u64(*slot)?.bytes(hash)?,
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Point {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        let size = d.array()?;

        match size {
            Some(0) => Ok(Point::Origin),
            Some(2) => {
                let slot = d.u64()?;
                let hash = d.bytes()?;
                Ok(Point::Specific(slot, Vec::from(hash)))
            }
            _ => Err(decode::Error::message(
                "can't decode Point from array of this size",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrolls_codec::minicbor;

    #[test]
    fn origin_encodes_as_empty_array() {
        let bytes = minicbor::to_vec(Point::Origin).unwrap();
        assert_eq!(bytes, vec![0x80]);
    }

    #[test]
    fn points_order_by_slot_then_hash() {
        let a = Point::Specific(10, vec![0x01; 32]);
        let b = Point::Specific(10, vec![0x02; 32]);
        let c = Point::Specific(11, vec![0x00; 32]);

        assert!(Point::Origin < a);
        assert!(a < b);
        assert!(b < c);
    }
}
