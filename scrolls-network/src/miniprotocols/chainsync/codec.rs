use scrolls_codec::minicbor::data::{Tag, Type};
use scrolls_codec::minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

use super::{HeaderContent, Message, Tip};

impl Encode<()> for Tip {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.array(2)?;
        e.encode(&self.0)?;
        e.u64(self.1)?;

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Tip {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let point = d.decode()?;
        let block_num = d.u64()?;

        Ok(Tip(point, block_num))
    }
}

impl Encode<()> for Message {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Message::RequestNext => {
                e.array(1)?.u16(0)?;
                Ok(())
            }
            Message::AwaitReply => {
                e.array(1)?.u16(1)?;
                Ok(())
            }
            Message::RollForward(content, tip) => {
                e.array(3)?.u16(2)?;
                e.encode(content)?;
                e.encode(tip)?;
                Ok(())
            }
            Message::RollBackward(point, tip) => {
                e.array(3)?.u16(3)?;
                e.encode(point)?;
                e.encode(tip)?;
                Ok(())
            }
            Message::FindIntersect(points) => {
                e.array(2)?.u16(4)?;
                e.array(points.len() as u64)?;
                for point in points.iter() {
                    e.encode(point)?;
                }
                Ok(())
            }
            Message::IntersectFound(point, tip) => {
                e.array(3)?.u16(5)?;
                e.encode(point)?;
                e.encode(tip)?;
                Ok(())
            }
            Message::IntersectNotFound(tip) => {
                e.array(2)?.u16(6)?;
                e.encode(tip)?;
                Ok(())
            }
            Message::Done => {
                e.array(1)?.u16(7)?;
                Ok(())
            }
        }
    }
}

impl<'b> Decode<'b, ()> for Message {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let label = d.u16()?;

        match label {
            0 => Ok(Message::RequestNext),
            1 => Ok(Message::AwaitReply),
            2 => {
                let content = d.decode()?;
                let tip = d.decode()?;
                Ok(Message::RollForward(content, tip))
            }
            3 => {
                let point = d.decode()?;
                let tip = d.decode()?;
                Ok(Message::RollBackward(point, tip))
            }
            4 => {
                let points = d.decode()?;
                Ok(Message::FindIntersect(points))
            }
            5 => {
                let point = d.decode()?;
                let tip = d.decode()?;
                Ok(Message::IntersectFound(point, tip))
            }
            6 => {
                let tip = d.decode()?;
                Ok(Message::IntersectNotFound(tip))
            }
            7 => Ok(Message::Done),
            _ => Err(decode::Error::message(
                "unknown variant for chainsync message",
            )),
        }
    }
}

impl<'b> Decode<'b, ()> for HeaderContent {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        // some servers deliver the header as a bare tagged byte string
        // instead of the usual [era, #6.24(bytes)] wrapping
        if d.datatype()? == Type::Tag {
            let tag = d.tag()?;
            let bytes = d.bytes()?;

            return Ok(HeaderContent {
                variant: scrolls_codec::value::tag_number(tag).min(u8::MAX as u64) as u8,
                byron_prefix: None,
                cbor: Vec::from(bytes),
            });
        }

        d.array()?;
        let variant = d.u8()?;

        match variant {
            // byron
            0 => {
                d.array()?;

                // byron-specific sub-variant of the header
                let (a, b): (u8, u64) = d.decode()?;

                d.tag()?;
                let bytes = d.bytes()?;

                Ok(HeaderContent {
                    variant,
                    byron_prefix: Some((a, b)),
                    cbor: Vec::from(bytes),
                })
            }
            // shelley and beyond
            _ => {
                d.tag()?;
                let bytes = d.bytes()?;

                Ok(HeaderContent {
                    variant,
                    byron_prefix: None,
                    cbor: Vec::from(bytes),
                })
            }
        }
    }
}

impl Encode<()> for HeaderContent {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.array(2)?;
        e.u8(self.variant)?;

        // variant 0 is byron
        if self.variant == 0 {
            e.array(2)?;

            if let Some((a, b)) = self.byron_prefix {
                e.array(2)?;
                e.u8(a)?;
                e.u64(b)?;
            } else {
                return Err(encode::Error::message("header variant 0 but no byron prefix"));
            }

            e.tag(Tag::Cbor)?;
            e.bytes(&self.cbor)?;
        } else {
            e.tag(Tag::Cbor)?;
            e.bytes(&self.cbor)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miniprotocols::Point;
    use scrolls_codec::minicbor;

    #[test]
    fn find_intersect_wire_shape() {
        let point = Point::Specific(5, vec![0xaa; 32]);
        let msg = Message::FindIntersect(vec![point]);

        let bytes = minicbor::to_vec(&msg).unwrap();
        // [4, [[5, h'aa…']]]
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x04);

        let back: Message = minicbor::decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn roll_forward_roundtrip() {
        let content = HeaderContent {
            variant: 6,
            byron_prefix: None,
            cbor: vec![0x84, 0x01, 0x02, 0x03, 0x04],
        };
        let tip = Tip(Point::Specific(9, vec![0x01; 32]), 42);
        let msg = Message::RollForward(content.clone(), tip.clone());

        let bytes = minicbor::to_vec(&msg).unwrap();
        let back: Message = minicbor::decode(&bytes).unwrap();

        assert_eq!(back, Message::RollForward(content, tip));
    }
}
