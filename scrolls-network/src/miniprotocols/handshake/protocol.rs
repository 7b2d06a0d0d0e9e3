use scrolls_codec::minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};
use std::collections::HashMap;

pub type NetworkMagic = u64;

pub type VersionNumber = u64;

pub const PROTOCOL_V14: VersionNumber = 14;

const PEER_SHARING_DISABLED: u8 = 0;

/// Per-version parameters proposed or confirmed during the handshake.
///
/// Since v11 the table entry is
/// `[networkMagic, initiatorOnly, peerSharing, query]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionData {
    pub network_magic: NetworkMagic,
    pub initiator_only: bool,
    pub peer_sharing: u8,
    pub query: bool,
}

impl VersionData {
    pub fn new(network_magic: NetworkMagic, initiator_only: bool, peer_sharing: u8, query: bool) -> Self {
        VersionData {
            network_magic,
            initiator_only,
            peer_sharing,
            query,
        }
    }
}

impl Encode<()> for VersionData {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.array(4)?
            .u64(self.network_magic)?
            .bool(self.initiator_only)?
            .u8(self.peer_sharing)?
            .bool(self.query)?;

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for VersionData {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        let len = d.array()?;
        let network_magic = d.u64()?;
        let initiator_only = d.bool()?;

        // pre-v11 tables carry only the first two fields
        let (peer_sharing, query) = match len {
            Some(4) => (d.u8()?, d.bool()?),
            _ => (PEER_SHARING_DISABLED, false),
        };

        Ok(Self {
            network_magic,
            initiator_only,
            peer_sharing,
            query,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VersionTable {
    pub values: HashMap<VersionNumber, VersionData>,
}

impl VersionTable {
    /// The single-entry table this stack proposes: v14, initiator-only,
    /// peer sharing disabled, no query.
    pub fn v14(network_magic: NetworkMagic) -> VersionTable {
        let values = [(
            PROTOCOL_V14,
            VersionData::new(network_magic, true, PEER_SHARING_DISABLED, false),
        )]
        .into_iter()
        .collect();

        VersionTable { values }
    }
}

impl Encode<()> for VersionTable {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.map(self.values.len() as u64)?;

        let mut keys: Vec<_> = self.values.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            e.u64(key)?;
            e.encode(&self.values[&key])?;
        }

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for VersionTable {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        let len = d
            .map()?
            .ok_or(decode::Error::message("expected def-length version table"))?;

        let mut values = HashMap::new();

        for _ in 0..len {
            let key = d.u64()?;
            let value = d.decode()?;
            values.insert(key, value);
        }

        Ok(VersionTable { values })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum State {
    Propose,
    Confirm,
    Done,
}

#[derive(Debug)]
pub enum Message {
    Propose(VersionTable),
    Accept(VersionNumber, VersionData),
    Refuse(RefuseReason),
    QueryReply(VersionTable),
}

impl Encode<()> for Message {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Message::Propose(version_table) => {
                e.array(2)?.u16(0)?;
                e.encode(version_table)?;
            }
            Message::Accept(version_number, version_data) => {
                e.array(3)?.u16(1)?;
                e.u64(*version_number)?;
                e.encode(version_data)?;
            }
            Message::Refuse(reason) => {
                e.array(2)?.u16(2)?;
                e.encode(reason)?;
            }
            Message::QueryReply(version_table) => {
                e.array(2)?.u16(3)?;
                e.encode(version_table)?;
            }
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Message {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;

        match d.u16()? {
            0 => {
                let version_table = d.decode()?;
                Ok(Message::Propose(version_table))
            }
            1 => {
                let version_number = d.u64()?;
                let version_data = d.decode()?;
                Ok(Message::Accept(version_number, version_data))
            }
            2 => {
                let reason: RefuseReason = d.decode()?;
                Ok(Message::Refuse(reason))
            }
            3 => {
                let version_table = d.decode()?;
                Ok(Message::QueryReply(version_table))
            }
            _ => Err(decode::Error::message(
                "unknown variant for handshake message",
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefuseReason {
    VersionMismatch(Vec<VersionNumber>),
    HandshakeDecodeError(VersionNumber, String),
    Refused(VersionNumber, String),
}

impl Encode<()> for RefuseReason {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            RefuseReason::VersionMismatch(versions) => {
                e.array(2)?;
                e.u16(0)?;
                e.array(versions.len() as u64)?;
                for v in versions.iter() {
                    e.u64(*v)?;
                }

                Ok(())
            }
            RefuseReason::HandshakeDecodeError(version, msg) => {
                e.array(3)?;
                e.u16(1)?;
                e.u64(*version)?;
                e.str(msg)?;

                Ok(())
            }
            RefuseReason::Refused(version, msg) => {
                e.array(3)?;
                e.u16(2)?;
                e.u64(*version)?;
                e.str(msg)?;

                Ok(())
            }
        }
    }
}

impl<'b> Decode<'b, ()> for RefuseReason {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;

        match d.u16()? {
            0 => {
                let mut versions = Vec::new();
                for v in d.array_iter::<u64>()? {
                    versions.push(v?);
                }
                Ok(RefuseReason::VersionMismatch(versions))
            }
            1 => {
                let version = d.u64()?;
                let msg = d.str()?;

                Ok(RefuseReason::HandshakeDecodeError(version, msg.to_string()))
            }
            2 => {
                let version = d.u64()?;
                let msg = d.str()?;

                Ok(RefuseReason::Refused(version, msg.to_string()))
            }
            _ => Err(decode::Error::message("unknown variant for refuse reason")),
        }
    }
}
