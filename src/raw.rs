// SPDX-License-Identifier: Apache-2.0

// Generic CBOR tree used by the leaf codecs. Tags are preserved when
// serializing to CBOR; when serializing to JSON, tags are stripped and
// byte strings are written as hex text (JSON output is display-only).
use serde::de::{self, Deserialize, EnumAccess, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use serde::ser::{SerializeMap as _, SerializeSeq as _, SerializeTupleVariant as _};

use crate::error::Error;

/// deserialized CBOR item
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Bytes(Vec<u8>),
    Float(f64),
    Text(String),
    Bool(bool),
    Array(Vec<RawValue>),
    Map(Vec<(RawValue, RawValue)>),
    Tagged(u64, Box<RawValue>),
}

impl RawValue {
    pub fn from_cbor(buf: &[u8]) -> Result<RawValue, Error> {
        ciborium::de::from_reader(buf).map_err(Error::decode)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf: Vec<u8> = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(Error::encode)?;
        Ok(buf)
    }

    pub fn tagged(tag: u64, value: RawValue) -> RawValue {
        RawValue::Tagged(tag, Box::new(value))
    }

    /// the tag number and inner value, if this is a tagged item
    pub fn as_tagged(&self) -> Option<(u64, &RawValue)> {
        match self {
            RawValue::Tagged(t, v) => Some((*t, v)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RawValue::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RawValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RawValue]> {
        match self {
            RawValue::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(RawValue, RawValue)]> {
        match self {
            RawValue::Map(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl Serialize for RawValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Bytes(b) => {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&hex::encode(b))
                } else {
                    serializer.serialize_bytes(b)
                }
            }
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Array(vs) => {
                let mut seq = serializer.serialize_seq(Some(vs.len()))?;
                for v in vs.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Self::Map(vs) => {
                let mut map = serializer.serialize_map(Some(vs.len()))?;
                for (k, v) in vs.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Tagged(t, v) => {
                if serializer.is_human_readable() {
                    // JSON has no tags; drop it.
                    v.serialize(serializer)
                } else {
                    let mut acc =
                        serializer.serialize_tuple_variant("@@TAG@@", 0, "@@TAGGED@@", 2)?;
                    acc.serialize_field(t)?;
                    acc.serialize_field(v)?;
                    acc.end()
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for RawValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(RawValueVisitor {})
    }
}

struct RawValueVisitor;

impl<'de> Visitor<'de> for RawValueVisitor {
    type Value = RawValue;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("an arbitrary CBOR structure")
    }

    fn visit_i8<E: de::Error>(self, v: i8) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_i16<E: de::Error>(self, v: i16) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_i32<E: de::Error>(self, v: i32) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v))
    }

    fn visit_u8<E: de::Error>(self, v: u8) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_u16<E: de::Error>(self, v: u16) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_u32<E: de::Error>(self, v: u32) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(RawValue::Integer(v.try_into().map_err(E::custom)?))
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> Result<Self::Value, E> {
        Ok(RawValue::Float(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(RawValue::Float(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(RawValue::Bool(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(RawValue::Text(v.to_string()))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(RawValue::Bytes(v.to_vec()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawValue::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawValue::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut ret = Vec::new();

        while let Some(v) = seq.next_element::<RawValue>()? {
            ret.push(v);
        }

        Ok(RawValue::Array(ret))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut ret = Vec::new();

        while let Some((key, val)) = map.next_entry::<RawValue, RawValue>()? {
            ret.push((key, val));
        }

        Ok(RawValue::Map(ret))
    }

    // adapted from ciborium implementation of Value::Tag.
    fn visit_enum<A: EnumAccess<'de>>(self, acc: A) -> Result<Self::Value, A::Error> {
        use serde::de::VariantAccess;

        struct Inner;

        impl<'de> serde::de::Visitor<'de> for Inner {
            type Value = RawValue;

            fn expecting(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(formatter, "a CBOR tagged value")
            }

            #[inline]
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut acc: A) -> Result<Self::Value, A::Error> {
                let tag: u64 = acc
                    .next_element()?
                    .ok_or_else(|| de::Error::custom("expected tag"))?;
                let val = acc
                    .next_element()?
                    .ok_or_else(|| de::Error::custom("expected val"))?;
                Ok(RawValue::Tagged(tag, Box::new(val)))
            }
        }

        let (name, data): (String, _) = acc.variant()?;
        assert_eq!("@@TAGGED@@", name);
        data.tuple_variant(2, Inner)
    }
}

/// wraps a value into a CBOR tag when serializing
pub(crate) struct TagWrap<'a, T: Serialize>(pub u64, pub &'a T);

impl<T: Serialize> Serialize for TagWrap<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            self.1.serialize(serializer)
        } else {
            let mut acc = serializer.serialize_tuple_variant("@@TAG@@", 0, "@@TAGGED@@", 2)?;
            acc.serialize_field(&self.0)?;
            acc.serialize_field(self.1)?;
            acc.end()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::{de::from_reader, ser::into_writer};

    #[test]
    fn serde() {
        let rv = RawValue::Integer(7);

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&rv, &mut buf).unwrap();
        assert_eq!(vec![0x07], buf);

        let rv2: RawValue = from_reader(buf.as_slice()).unwrap();
        assert_eq!(rv2, rv);

        let rv = RawValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&rv, &mut buf).unwrap();
        assert_eq!(
            vec![
                0x44, // byte string (4)
                0xde, 0xad, 0xbe, 0xef,
            ],
            buf
        );

        let rv2: RawValue = from_reader(buf.as_slice()).unwrap();
        assert_eq!(rv2, rv);

        let rv = RawValue::Map(vec![
            (RawValue::Integer(0), RawValue::Text("acme".to_string())),
            (RawValue::Integer(1), RawValue::Bool(true)),
        ]);

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&rv, &mut buf).unwrap();
        assert_eq!(
            vec![
                0xa2, // map (2)
                0x00, // 0
                0x64, // text string (4)
                0x61, 0x63, 0x6d, 0x65, // "acme"
                0x01, // 1
                0xf5, // true
            ],
            buf
        );

        let rv2: RawValue = from_reader(buf.as_slice()).unwrap();
        assert_eq!(rv2, rv);
    }

    #[test]
    fn tagged() {
        let rv = RawValue::tagged(550, RawValue::Bytes(vec![0x01, 0x02]));

        let buf = rv.to_cbor().unwrap();
        assert_eq!(
            buf,
            vec![
                0xd9, // tag in the next 2 bytes
                0x02, 0x26, // 550
                0x42, // byte string (2)
                0x01, 0x02,
            ]
        );

        let rv2 = RawValue::from_cbor(buf.as_slice()).unwrap();
        assert_eq!(rv2, rv);

        let (tag, inner) = rv2.as_tagged().unwrap();
        assert_eq!(tag, 550);
        assert_eq!(inner.as_bytes().unwrap(), &[0x01, 0x02]);
    }

    #[test]
    fn json_strips_tags() {
        let rv = RawValue::tagged(1, RawValue::Text("epoch".to_string()));
        let val = serde_json::to_string(&rv).unwrap();
        assert_eq!(val, r#""epoch""#);

        let rv = RawValue::Bytes(vec![0xde, 0xad]);
        let val = serde_json::to_string(&rv).unwrap();
        assert_eq!(val, r#""dead""#);
    }

    #[test]
    fn accessors() {
        assert_eq!(RawValue::Integer(-7).as_integer(), Some(-7));
        assert_eq!(RawValue::Text("x".to_string()).as_text(), Some("x"));
        assert_eq!(RawValue::Bool(true).as_bool(), Some(true));
        assert_eq!(RawValue::Null.as_integer(), None);
        assert!(RawValue::Array(vec![]).as_array().unwrap().is_empty());
        assert!(RawValue::Map(vec![]).as_map().unwrap().is_empty());
    }
}
