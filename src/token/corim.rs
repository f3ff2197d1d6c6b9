// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::ser::SerializeMap;
use serde::{de, Deserialize, Serialize};

use crate::error::Error;
use crate::raw::{RawValue, TagWrap};
use crate::token::comid::{parse_numeric_role, uri_text};
use crate::token::cryptokey::HashEntry;
use crate::token::extension::Extensions;
use crate::token::tagid::TagId;
use crate::token::TAG_UNSIGNED_CORIM;

const TAG_EPOCH_TIME: u64 = 1;
const TAG_URI: u64 = 32;
const TAG_OID: u64 = 111;

/// The role of a CoRIM entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorimRole(pub i64);

pub const ROLE_MANIFEST_CREATOR: CorimRole = CorimRole(1);
pub const ROLE_MANIFEST_SIGNER: CorimRole = CorimRole(2);

impl fmt::Display for CorimRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            1 => f.write_str("manifestCreator"),
            2 => f.write_str("manifestSigner"),
            n => write!(f, "Role({n})"),
        }
    }
}

impl CorimRole {
    pub fn parse(text: &str) -> Result<CorimRole, Error> {
        match text {
            "manifestCreator" => Ok(ROLE_MANIFEST_CREATOR),
            "manifestSigner" => Ok(ROLE_MANIFEST_SIGNER),
            other => parse_numeric_role(other)
                .map(CorimRole)
                .ok_or_else(|| Error::invalid("CoRIM role", other)),
        }
    }
}

impl Serialize for CorimRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_i64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for CorimRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;
        match &raw {
            RawValue::Integer(i) => Ok(CorimRole(*i)),
            RawValue::Text(s) => CorimRole::parse(s).map_err(de::Error::custom),
            other => Err(de::Error::custom(format!("unexpected role: {other:?}"))),
        }
    }
}

/// An organization responsible for some aspect of a CoRIM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorimEntity {
    pub name: String,
    pub reg_id: Option<String>,
    pub roles: Vec<CorimRole>,
    pub extensions: Extensions,
}

impl Serialize for CorimEntity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 2 + self.reg_id.is_some() as usize + self.extensions.len();
        let mut map = serializer.serialize_map(Some(len))?;

        if hr {
            map.serialize_entry("name", &self.name)?;
        } else {
            map.serialize_entry(&0, &self.name)?;
        }

        if let Some(reg_id) = &self.reg_id {
            let raw = RawValue::tagged(TAG_URI, RawValue::Text(reg_id.clone()));
            if hr {
                map.serialize_entry("regid", &raw)?;
            } else {
                map.serialize_entry(&1, &raw)?;
            }
        }

        if hr {
            map.serialize_entry("roles", &self.roles)?;
        } else {
            map.serialize_entry(&2, &self.roles)?;
        }

        self.extensions.serialize_into(&mut map, hr)?;

        map.end()
    }
}

impl<'de> Deserialize<'de> for CorimEntity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(CorimEntityVisitor)
    }
}

struct CorimEntityVisitor;

impl<'de> de::Visitor<'de> for CorimEntityVisitor {
    type Value = CorimEntity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an entity map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = CorimEntity::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "name" => Some(0),
                    "regid" => Some(1),
                    "roles" => Some(2),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => ret.name = map.next_value::<String>()?,
                Some(1) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.reg_id = Some(uri_text(&raw).map_err(de::Error::custom)?);
                }
                Some(2) => ret.roles = map.next_value::<Vec<CorimRole>>()?,
                _ => {
                    let value = map.next_value::<RawValue>()?;
                    ret.extensions
                        .collect(&key, &value)
                        .map_err(de::Error::custom)?;
                }
            }
        }

        Ok(ret)
    }
}

/// A reference to a dependent RIM: where to fetch it, and optionally the
/// digest it must match.
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    pub href: String,
    pub thumbprint: Option<HashEntry>,
}

impl Serialize for Locator {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 1 + self.thumbprint.is_some() as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        let href = RawValue::tagged(TAG_URI, RawValue::Text(self.href.clone()));
        if hr {
            map.serialize_entry("href", &href)?;
        } else {
            map.serialize_entry(&0, &href)?;
        }

        if let Some(thumbprint) = &self.thumbprint {
            if hr {
                map.serialize_entry("thumbprint", thumbprint)?;
            } else {
                map.serialize_entry(&1, thumbprint)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(LocatorVisitor)
    }
}

struct LocatorVisitor;

impl<'de> de::Visitor<'de> for LocatorVisitor {
    type Value = Locator;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a locator map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut href: Option<String> = None;
        let mut thumbprint: Option<HashEntry> = None;

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "href" => Some(0),
                    "thumbprint" => Some(1),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => {
                    let raw = map.next_value::<RawValue>()?;
                    href = Some(uri_text(&raw).map_err(de::Error::custom)?);
                }
                Some(1) => thumbprint = Some(map.next_value::<HashEntry>()?),
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(Locator {
            href: href.ok_or_else(|| de::Error::custom("missing locator href"))?,
            thumbprint,
        })
    }
}

/// Identifies the profile a CoRIM conforms to.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileId {
    Uri(String),
    Oid(Vec<u8>),
}

impl ProfileId {
    pub fn type_name(&self) -> &'static str {
        match self {
            ProfileId::Uri(_) => "uri",
            ProfileId::Oid(_) => "oid",
        }
    }

    pub fn to_raw(&self) -> RawValue {
        match self {
            ProfileId::Uri(s) => RawValue::tagged(TAG_URI, RawValue::Text(s.clone())),
            ProfileId::Oid(b) => RawValue::tagged(TAG_OID, RawValue::Bytes(b.clone())),
        }
    }

    pub fn from_raw(raw: &RawValue) -> Result<ProfileId, Error> {
        match raw {
            RawValue::Tagged(TAG_URI, inner) => inner
                .as_text()
                .map(|s| ProfileId::Uri(s.to_string()))
                .ok_or_else(|| Error::invalid("profile", "URI must be text")),
            RawValue::Tagged(TAG_OID, inner) => inner
                .as_bytes()
                .map(|b| ProfileId::Oid(b.to_vec()))
                .ok_or_else(|| Error::invalid("profile", "OID must be bytes")),
            // a bare text profile reads as a URI
            RawValue::Text(s) => Ok(ProfileId::Uri(s.clone())),
            other => Err(Error::invalid(
                "profile",
                format!("unexpected item: {other:?}"),
            )),
        }
    }
}

/// The window during which a manifest's claims hold, in Unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Validity {
    pub not_before: Option<i64>,
    pub not_after: i64,
}

impl Serialize for Validity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 1 + self.not_before.is_some() as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        if let Some(not_before) = self.not_before {
            let raw = RawValue::tagged(TAG_EPOCH_TIME, RawValue::Integer(not_before));
            if hr {
                map.serialize_entry("not-before", &raw)?;
            } else {
                map.serialize_entry(&0, &raw)?;
            }
        }

        let raw = RawValue::tagged(TAG_EPOCH_TIME, RawValue::Integer(self.not_after));
        if hr {
            map.serialize_entry("not-after", &raw)?;
        } else {
            map.serialize_entry(&1, &raw)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Validity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ValidityVisitor)
    }
}

struct ValidityVisitor;

impl<'de> de::Visitor<'de> for ValidityVisitor {
    type Value = Validity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a validity map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut not_before: Option<i64> = None;
        let mut not_after: Option<i64> = None;

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "not-before" => Some(0),
                    "not-after" => Some(1),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => not_before = Some(epoch_seconds(&map.next_value::<RawValue>()?)?),
                Some(1) => not_after = Some(epoch_seconds(&map.next_value::<RawValue>()?)?),
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(Validity {
            not_before,
            not_after: not_after.ok_or_else(|| de::Error::custom("missing not-after"))?,
        })
    }
}

fn epoch_seconds<E: de::Error>(raw: &RawValue) -> Result<i64, E> {
    let inner = match raw {
        RawValue::Tagged(TAG_EPOCH_TIME, inner) => inner.as_ref(),
        other => other,
    };

    match inner {
        RawValue::Integer(i) => Ok(*i),
        RawValue::Float(f) => Ok(*f as i64),
        other => Err(E::custom(format!("unexpected time value: {other:?}"))),
    }
}

/// One entry of a CoRIM's tag list: a tag number wrapping an embedded
/// CBOR-encoded tag body.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    pub number: u64,
    pub content: Vec<u8>,
}

impl Serialize for TagEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        TagWrap(self.number, &RawValue::Bytes(self.content.clone())).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;

        let (number, inner) = raw
            .as_tagged()
            .ok_or_else(|| de::Error::custom("tag entry must be a tagged item"))?;

        let content = inner
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| de::Error::custom("tag entry content must be a byte string"))?;

        Ok(TagEntry { number, content })
    }
}

/// An unsigned CoRIM: the envelope stored and served by this system.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedCorim {
    pub id: TagId,
    pub tags: Vec<TagEntry>,
    pub dependent_rims: Vec<Locator>,
    pub profile: Option<ProfileId>,
    pub validity: Option<Validity>,
    pub entities: Vec<CorimEntity>,
    pub extensions: Extensions,
}

impl UnsignedCorim {
    pub fn new(id: TagId) -> UnsignedCorim {
        UnsignedCorim {
            id,
            tags: Vec::new(),
            dependent_rims: Vec::new(),
            profile: None,
            validity: None,
            entities: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    /// Decode from a tag-501 token buffer.
    pub fn from_cbor(buf: &[u8]) -> Result<UnsignedCorim, Error> {
        if buf.len() < 3 {
            return Err(Error::TooShort);
        }

        if buf[..3] != [0xd9, 0x01, 0xf5] {
            return Err(Error::UnrecognizedFormat);
        }

        Self::from_cbor_payload(buf)
    }

    /// Decode a CoRIM map with or without its 501 tag (the payload of a
    /// COSE_Sign1 envelope may carry either form).
    pub fn from_cbor_payload(buf: &[u8]) -> Result<UnsignedCorim, Error> {
        ciborium::de::from_reader::<MaybeTagged, _>(buf)
            .map(|v| v.0)
            .map_err(Error::decode)
    }

    /// Encode as a tag-501 token.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf: Vec<u8> = Vec::new();
        ciborium::ser::into_writer(&TagWrap(TAG_UNSIGNED_CORIM, self), &mut buf)
            .map_err(Error::encode)?;
        Ok(buf)
    }
}

struct MaybeTagged(UnsignedCorim);

impl<'de> Deserialize<'de> for MaybeTagged {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> de::Visitor<'de> for V {
            type Value = MaybeTagged;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a CoRIM map, optionally tagged 501")
            }

            fn visit_map<A: de::MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                CorimVisitor.visit_map(map).map(MaybeTagged)
            }

            fn visit_enum<A: de::EnumAccess<'de>>(self, acc: A) -> Result<Self::Value, A::Error> {
                use serde::de::VariantAccess;

                struct Inner;

                impl<'de> de::Visitor<'de> for Inner {
                    type Value = UnsignedCorim;

                    fn expecting(
                        &self,
                        formatter: &mut core::fmt::Formatter<'_>,
                    ) -> core::fmt::Result {
                        write!(formatter, "a tagged CoRIM")
                    }

                    fn visit_seq<A: de::SeqAccess<'de>>(
                        self,
                        mut acc: A,
                    ) -> Result<Self::Value, A::Error> {
                        let tag: u64 = acc
                            .next_element()?
                            .ok_or_else(|| de::Error::custom("expected tag"))?;

                        if tag != TAG_UNSIGNED_CORIM {
                            return Err(de::Error::custom(format!(
                                "expected tag {TAG_UNSIGNED_CORIM}, found {tag}"
                            )));
                        }

                        acc.next_element::<UnsignedCorim>()?
                            .ok_or_else(|| de::Error::custom("expected CoRIM map"))
                    }
                }

                let (name, data): (String, _) = acc.variant()?;
                assert_eq!("@@TAGGED@@", name);
                data.tuple_variant(2, Inner).map(MaybeTagged)
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl Serialize for UnsignedCorim {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 2
            + !self.dependent_rims.is_empty() as usize
            + self.profile.is_some() as usize
            + self.validity.is_some() as usize
            + !self.entities.is_empty() as usize
            + self.extensions.len();
        let mut map = serializer.serialize_map(Some(len))?;

        if hr {
            map.serialize_entry("corim-id", &self.id)?;
            map.serialize_entry("tags", &self.tags)?;
        } else {
            map.serialize_entry(&0, &self.id)?;
            map.serialize_entry(&1, &self.tags)?;
        }

        if !self.dependent_rims.is_empty() {
            if hr {
                map.serialize_entry("dependent-rims", &self.dependent_rims)?;
            } else {
                map.serialize_entry(&2, &self.dependent_rims)?;
            }
        }

        if let Some(profile) = &self.profile {
            if hr {
                map.serialize_entry("profile", &profile.to_raw())?;
            } else {
                map.serialize_entry(&3, &profile.to_raw())?;
            }
        }

        if let Some(validity) = &self.validity {
            if hr {
                map.serialize_entry("validity", validity)?;
            } else {
                map.serialize_entry(&4, validity)?;
            }
        }

        if !self.entities.is_empty() {
            if hr {
                map.serialize_entry("entities", &self.entities)?;
            } else {
                map.serialize_entry(&5, &self.entities)?;
            }
        }

        self.extensions.serialize_into(&mut map, hr)?;

        map.end()
    }
}

impl<'de> Deserialize<'de> for UnsignedCorim {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(CorimVisitor)
    }
}

struct CorimVisitor;

impl<'de> de::Visitor<'de> for CorimVisitor {
    type Value = UnsignedCorim;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a CoRIM map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut id: Option<TagId> = None;
        let mut tags: Vec<TagEntry> = Vec::new();
        let mut dependent_rims: Vec<Locator> = Vec::new();
        let mut profile: Option<ProfileId> = None;
        let mut validity: Option<Validity> = None;
        let mut entities: Vec<CorimEntity> = Vec::new();
        let mut extensions = Extensions::new();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "corim-id" => Some(0),
                    "tags" => Some(1),
                    "dependent-rims" => Some(2),
                    "profile" => Some(3),
                    "validity" => Some(4),
                    "entities" => Some(5),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => id = Some(map.next_value::<TagId>()?),
                Some(1) => tags = map.next_value::<Vec<TagEntry>>()?,
                Some(2) => dependent_rims = map.next_value::<Vec<Locator>>()?,
                Some(3) => {
                    let raw = map.next_value::<RawValue>()?;
                    profile = Some(ProfileId::from_raw(&raw).map_err(de::Error::custom)?);
                }
                Some(4) => validity = Some(map.next_value::<Validity>()?),
                Some(5) => entities = map.next_value::<Vec<CorimEntity>>()?,
                _ => {
                    let value = map.next_value::<RawValue>()?;
                    extensions.collect(&key, &value).map_err(de::Error::custom)?;
                }
            }
        }

        Ok(UnsignedCorim {
            id: id.ok_or_else(|| de::Error::custom("missing CoRIM ID"))?,
            tags,
            dependent_rims,
            profile,
            validity,
            entities,
            extensions,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{Comid, TAG_COMID};

    fn sample_corim() -> UnsignedCorim {
        let mut comid = Comid::new(TagId::from("test-tag"));
        comid
            .triples
            .attest_verif_keys
            .push(crate::token::KeyTriple {
                environment: Default::default(),
                verif_keys: vec![crate::token::CryptoKey::PkixBase64Key("MFkw".to_string())],
            });

        let mut corim = UnsignedCorim::new(TagId::from("cca-ta"));
        corim.tags.push(TagEntry {
            number: TAG_COMID,
            content: comid.to_cbor().unwrap(),
        });
        corim.profile = Some(ProfileId::Uri("http://arm.com/cca/ssd/1".to_string()));
        corim.validity = Some(Validity {
            not_before: Some(1_600_000_000),
            not_after: 1_700_000_000,
        });
        corim.dependent_rims.push(Locator {
            href: "https://acme.example/rim".to_string(),
            thumbprint: Some(HashEntry::new(1, vec![0x11; 32])),
        });
        corim.entities.push(CorimEntity {
            name: "ACME Ltd.".to_string(),
            reg_id: Some("https://acme.example".to_string()),
            roles: vec![ROLE_MANIFEST_CREATOR],
            extensions: Extensions::new(),
        });

        corim
    }

    #[test]
    fn round_trip() {
        let corim = sample_corim();

        let buf = corim.to_cbor().unwrap();
        // tag 501
        assert_eq!(buf[..3], [0xd9, 0x01, 0xf5]);

        let corim2 = UnsignedCorim::from_cbor(&buf).unwrap();
        assert_eq!(corim2, corim);
    }

    #[test]
    fn payload_without_tag() {
        let corim = sample_corim();

        // serialize just the map, as some signers embed it in the payload
        let mut buf: Vec<u8> = Vec::new();
        ciborium::ser::into_writer(&corim, &mut buf).unwrap();

        let corim2 = UnsignedCorim::from_cbor_payload(&buf).unwrap();
        assert_eq!(corim2, corim);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(matches!(
            UnsignedCorim::from_cbor(&[0x01, 0x02]),
            Err(Error::TooShort)
        ));
        assert!(matches!(
            UnsignedCorim::from_cbor(&[0xa1, 0x00, 0x60]),
            Err(Error::UnrecognizedFormat)
        ));
    }

    #[test]
    fn corim_roles() {
        assert_eq!(ROLE_MANIFEST_CREATOR.to_string(), "manifestCreator");
        assert_eq!(CorimRole(9).to_string(), "Role(9)");
        assert_eq!(
            CorimRole::parse("manifestSigner").unwrap(),
            ROLE_MANIFEST_SIGNER
        );
        assert_eq!(CorimRole::parse("Role(9)").unwrap(), CorimRole(9));
        assert!(CorimRole::parse("jester").is_err());
    }

    #[test]
    fn validity_seconds() {
        let validity = Validity {
            not_before: None,
            not_after: 1_700_000_000,
        };

        let mut buf: Vec<u8> = Vec::new();
        ciborium::ser::into_writer(&validity, &mut buf).unwrap();

        let validity2: Validity = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(validity2, validity);
    }
}
