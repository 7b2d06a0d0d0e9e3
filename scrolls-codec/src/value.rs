//! A dynamic CBOR value for structures whose shape is only known at runtime.
//!
//! Transaction metadata (and the auxiliary structures around it) is
//! JSON-like: maps with mixed key types, nested arrays, byte strings and
//! text. Instead of decoding into fixed structs, callers pattern-match on
//! [`CborValue`] and turn missing or mistyped fields into domain errors.

use minicbor::data::{Tag, Type};
use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Uint(u64),
    Nint(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(Vec<(CborValue, CborValue)>),
    Tag(u64, Box<CborValue>),
    Bool(bool),
    Null,
}

pub fn tag_number(tag: Tag) -> u64 {
    match tag {
        Tag::DateTime => 0,
        Tag::Timestamp => 1,
        Tag::PosBignum => 2,
        Tag::NegBignum => 3,
        Tag::Decimal => 4,
        Tag::Bigfloat => 5,
        Tag::ToBase64Url => 21,
        Tag::ToBase64 => 22,
        Tag::ToBase16 => 23,
        Tag::Cbor => 24,
        Tag::Uri => 32,
        Tag::Base64Url => 33,
        Tag::Base64 => 34,
        Tag::Regex => 35,
        Tag::Mime => 36,
        Tag::Unassigned(n) => n,
        _ => u64::MAX,
    }
}

impl CborValue {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, decode::Error> {
        minicbor::decode(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // encoding a value we decoded cannot fail
        minicbor::to_vec(self).expect("infallible cbor encode")
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            CborValue::Uint(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CborValue::Text(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CborValue]> {
        match self {
            CborValue::Array(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(CborValue, CborValue)]> {
        match self {
            CborValue::Map(x) => Some(x),
            _ => None,
        }
    }

    /// Looks up a map entry by exact key equality
    pub fn get(&self, key: &CborValue) -> Option<&CborValue> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Looks up a map entry by an unsigned key
    pub fn get_uint(&self, key: u64) -> Option<&CborValue> {
        self.get(&CborValue::Uint(key))
    }

    /// Looks up a map entry by a text key
    pub fn get_text(&self, key: &str) -> Option<&CborValue> {
        self.as_map()?.iter().find_map(|(k, v)| match k {
            CborValue::Text(x) if x == key => Some(v),
            _ => None,
        })
    }

    /// Descends through tags and nested cbor-in-bytes wrapping, re-decoding
    /// byte strings that themselves parse as CBOR
    pub fn unwrap_nested(self) -> Self {
        match self {
            CborValue::Tag(_, inner) => inner.unwrap_nested(),
            CborValue::Bytes(raw) => match CborValue::from_cbor(&raw) {
                Ok(inner) => inner,
                Err(_) => CborValue::Bytes(raw),
            },
            other => other,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CborValue::Null,
            serde_json::Value::Bool(x) => CborValue::Bool(*x),
            serde_json::Value::Number(n) => {
                if let Some(x) = n.as_u64() {
                    CborValue::Uint(x)
                } else if let Some(x) = n.as_i64() {
                    CborValue::Nint(x)
                } else {
                    CborValue::Null
                }
            }
            serde_json::Value::String(x) => CborValue::Text(x.clone()),
            serde_json::Value::Array(xs) => {
                CborValue::Array(xs.iter().map(CborValue::from_json).collect())
            }
            serde_json::Value::Object(xs) => CborValue::Map(
                xs.iter()
                    .map(|(k, v)| (CborValue::Text(k.clone()), CborValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl<'b, C> Decode<'b, C> for CborValue {
    fn decode(d: &mut Decoder<'b>, ctx: &mut C) -> Result<Self, decode::Error> {
        match d.datatype()? {
            Type::Bool => Ok(CborValue::Bool(d.bool()?)),
            Type::Null | Type::Undefined => {
                d.skip()?;
                Ok(CborValue::Null)
            }
            Type::U8 | Type::U16 | Type::U32 | Type::U64 => Ok(CborValue::Uint(d.u64()?)),
            Type::I8 | Type::I16 | Type::I32 | Type::I64 => Ok(CborValue::Nint(d.i64()?)),
            Type::Int => {
                let x = i128::from(d.int()?);
                let x = i64::try_from(x)
                    .map_err(|_| decode::Error::message("integer out of 64-bit range"))?;
                Ok(CborValue::Nint(x))
            }
            Type::Bytes => Ok(CborValue::Bytes(d.bytes()?.to_vec())),
            Type::BytesIndef => {
                let mut all = Vec::new();
                for chunk in d.bytes_iter()? {
                    all.extend_from_slice(chunk?);
                }
                Ok(CborValue::Bytes(all))
            }
            Type::String => Ok(CborValue::Text(d.str()?.to_string())),
            Type::StringIndef => {
                let mut all = String::new();
                for chunk in d.str_iter()? {
                    all.push_str(chunk?);
                }
                Ok(CborValue::Text(all))
            }
            Type::Array | Type::ArrayIndef => {
                let len = d.array()?;
                let mut items = Vec::new();
                match len {
                    Some(n) => {
                        for _ in 0..n {
                            items.push(d.decode_with(ctx)?);
                        }
                    }
                    None => loop {
                        if d.datatype()? == Type::Break {
                            d.skip()?;
                            break;
                        }
                        items.push(d.decode_with(ctx)?);
                    },
                }
                Ok(CborValue::Array(items))
            }
            Type::Map | Type::MapIndef => {
                let len = d.map()?;
                let mut entries = Vec::new();
                match len {
                    Some(n) => {
                        for _ in 0..n {
                            let k = d.decode_with(ctx)?;
                            let v = d.decode_with(ctx)?;
                            entries.push((k, v));
                        }
                    }
                    None => loop {
                        if d.datatype()? == Type::Break {
                            d.skip()?;
                            break;
                        }
                        let k = d.decode_with(ctx)?;
                        let v = d.decode_with(ctx)?;
                        entries.push((k, v));
                    },
                }
                Ok(CborValue::Map(entries))
            }
            Type::Tag => {
                let tag = d.tag()?;
                let inner: CborValue = d.decode_with(ctx)?;
                Ok(CborValue::Tag(tag_number(tag), Box::new(inner)))
            }
            Type::F16 | Type::F32 | Type::F64 | Type::Simple => {
                d.skip()?;
                Ok(CborValue::Null)
            }
            other => Err(decode::Error::message(format!(
                "unsupported cbor type {other}"
            ))),
        }
    }
}

impl<C> Encode<C> for CborValue {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            CborValue::Uint(x) => {
                e.u64(*x)?;
            }
            CborValue::Nint(x) => {
                e.i64(*x)?;
            }
            CborValue::Bytes(x) => {
                e.bytes(x)?;
            }
            CborValue::Text(x) => {
                e.str(x)?;
            }
            CborValue::Array(xs) => {
                e.array(xs.len() as u64)?;
                for x in xs {
                    e.encode_with(x, ctx)?;
                }
            }
            CborValue::Map(xs) => {
                e.map(xs.len() as u64)?;
                for (k, v) in xs {
                    e.encode_with(k, ctx)?;
                    e.encode_with(v, ctx)?;
                }
            }
            CborValue::Tag(n, inner) => {
                e.tag(Tag::Unassigned(*n))?;
                e.encode_with(inner.as_ref(), ctx)?;
            }
            CborValue::Bool(x) => {
                e.bool(*x)?;
            }
            CborValue::Null => {
                e.null()?;
            }
        };

        Ok(())
    }
}
