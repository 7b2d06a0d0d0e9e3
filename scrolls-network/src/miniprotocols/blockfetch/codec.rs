use scrolls_codec::minicbor::data::{Tag, Type};
use scrolls_codec::minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};
use scrolls_codec::utils::AnyCbor;

use super::Message;

impl Encode<()> for Message {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Message::RequestRange { range } => {
                e.array(3)?.u16(0)?;
                e.encode(&range.0)?;
                e.encode(&range.1)?;
            }
            Message::ClientDone => {
                e.array(1)?.u16(1)?;
            }
            Message::StartBatch => {
                e.array(1)?.u16(2)?;
            }
            Message::NoBlocks => {
                e.array(1)?.u16(3)?;
            }
            Message::Block { body } => {
                e.array(2)?.u16(4)?;
                e.tag(Tag::Cbor)?;
                e.bytes(body)?;
            }
            Message::BatchDone => {
                e.array(1)?.u16(5)?;
            }
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Message {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let label = d.u16()?;

        match label {
            0 => {
                let point_from = d.decode()?;
                let point_to = d.decode()?;
                Ok(Message::RequestRange {
                    range: (point_from, point_to),
                })
            }
            1 => Ok(Message::ClientDone),
            2 => Ok(Message::StartBatch),
            3 => Ok(Message::NoBlocks),
            4 => {
                // the body is usually #6.24-wrapped cbor bytes, but some
                // servers inline the block structure itself
                let body = match d.datatype()? {
                    Type::Tag => {
                        d.tag()?;
                        Vec::from(d.bytes()?)
                    }
                    Type::Bytes => Vec::from(d.bytes()?),
                    _ => {
                        let any: AnyCbor = d.decode()?;
                        any.unwrap()
                    }
                };

                Ok(Message::Block { body })
            }
            5 => Ok(Message::BatchDone),
            _ => Err(decode::Error::message(
                "unknown variant for blockfetch message",
            )),
        }
    }
}
