use crate::miniprotocols::Point;

/// Last known point of the server's chain plus its block height
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Tip(pub Point, pub u64);

pub type IntersectResponse = (Option<Point>, Tip);

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum State {
    Idle,
    CanAwait,
    MustReply,
    Intersect,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestNext,
    AwaitReply,
    RollForward(HeaderContent, Tip),
    RollBackward(Point, Tip),
    FindIntersect(Vec<Point>),
    IntersectFound(Point, Tip),
    IntersectNotFound(Tip),
    Done,
}

/// An era-tagged header as carried by a roll-forward.
///
/// The wrapped cbor is the serialized header itself; its Blake2b-256 digest
/// is the hash half of the block's chain point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderContent {
    pub variant: u8,
    pub byron_prefix: Option<(u8, u64)>,
    pub cbor: Vec<u8>,
}
