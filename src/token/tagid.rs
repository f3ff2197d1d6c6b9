// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{de, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::raw::RawValue;

const TAG_UUID: u64 = 37;

/// Identifies a manifest or a module tag. On the wire this is either a
/// text string or a tag-37 UUID byte string.
#[derive(Debug, Clone, PartialEq)]
pub enum TagId {
    Text(String),
    Uuid(Uuid),
}

impl TagId {
    pub fn to_raw(&self) -> RawValue {
        match self {
            TagId::Text(s) => RawValue::Text(s.clone()),
            TagId::Uuid(u) => RawValue::tagged(TAG_UUID, RawValue::Bytes(u.as_bytes().to_vec())),
        }
    }

    pub fn from_raw(raw: &RawValue) -> Result<TagId, Error> {
        match raw {
            RawValue::Text(s) => Ok(TagId::Text(s.clone())),
            RawValue::Tagged(TAG_UUID, inner) => {
                let bytes = inner
                    .as_bytes()
                    .ok_or_else(|| Error::invalid("tag ID", "UUID must be a byte string"))?;
                let uuid = Uuid::from_slice(bytes)
                    .map_err(|e| Error::invalid("tag ID", e.to_string()))?;
                Ok(TagId::Uuid(uuid))
            }
            other => Err(Error::invalid("tag ID", format!("unexpected item: {other:?}"))),
        }
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagId::Text(s) => f.write_str(s),
            TagId::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> TagId {
        TagId::Text(s.to_string())
    }
}

impl From<Uuid> for TagId {
    fn from(u: Uuid) -> TagId {
        TagId::Uuid(u)
    }
}

impl Serialize for TagId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.to_raw().serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for TagId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;
        TagId::from_raw(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::{de::from_reader, ser::into_writer};

    #[test]
    fn serde() {
        let id = TagId::from("cca-ta");

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&id, &mut buf).unwrap();
        assert_eq!(
            buf,
            vec![
                0x66, // text string (6)
                0x63, 0x63, 0x61, 0x2d, 0x74, 0x61, // "cca-ta"
            ]
        );

        let id2: TagId = from_reader(buf.as_slice()).unwrap();
        assert_eq!(id2, id);

        let uuid = Uuid::parse_str("31fb5abf-023e-4992-aa4e-95f9c1503bfa").unwrap();
        let id = TagId::from(uuid);

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&id, &mut buf).unwrap();
        assert_eq!(buf[..4], [0xd8, 0x25, 0x50, 0x31]); // tag 37, bstr (16), first byte

        let id2: TagId = from_reader(buf.as_slice()).unwrap();
        assert_eq!(id2, id);
        assert_eq!(id2.to_string(), "31fb5abf-023e-4992-aa4e-95f9c1503bfa");
    }

    #[test]
    fn bad_uuid_length() {
        let raw = RawValue::tagged(37, RawValue::Bytes(vec![0x01, 0x02]));
        let err = TagId::from_raw(&raw).unwrap_err();
        assert!(err.to_string().starts_with("invalid tag ID"));
    }
}
