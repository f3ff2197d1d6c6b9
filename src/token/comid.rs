// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::ser::SerializeMap;
use serde::{de, Deserialize, Serialize};

use crate::error::Error;
use crate::raw::RawValue;
use crate::token::cryptokey::CryptoKey;
use crate::token::environment::Environment;
use crate::token::extension::Extensions;
use crate::token::measurement::Measurement;
use crate::token::tagid::TagId;

const TAG_URI: u64 = 32;

/// The role of a CoMID entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComidRole(pub i64);

pub const ROLE_TAG_CREATOR: ComidRole = ComidRole(0);
pub const ROLE_CREATOR: ComidRole = ComidRole(1);
pub const ROLE_MAINTAINER: ComidRole = ComidRole(2);

impl fmt::Display for ComidRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("tagCreator"),
            1 => f.write_str("creator"),
            2 => f.write_str("maintainer"),
            n => write!(f, "Role({n})"),
        }
    }
}

impl ComidRole {
    pub fn parse(text: &str) -> Result<ComidRole, Error> {
        match text {
            "tagCreator" => Ok(ROLE_TAG_CREATOR),
            "creator" => Ok(ROLE_CREATOR),
            "maintainer" => Ok(ROLE_MAINTAINER),
            other => parse_numeric_role(other)
                .map(ComidRole)
                .ok_or_else(|| Error::invalid("CoMID role", other)),
        }
    }
}

pub(crate) fn parse_numeric_role(text: &str) -> Option<i64> {
    text.strip_prefix("Role(")
        .and_then(|s| s.strip_suffix(')'))
        .and_then(|s| s.parse::<i64>().ok())
}

impl Serialize for ComidRole {
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

impl<'de> Deserialize<'de> for ComidRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;
        match &raw {
            RawValue::Integer(i) => Ok(ComidRole(*i)),
            RawValue::Text(s) => ComidRole::parse(s).map_err(de::Error::custom),
            other => Err(de::Error::custom(format!("unexpected role: {other:?}"))),
        }
    }
}

/// An organization responsible for some aspect of a CoMID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComidEntity {
    pub name: String,
    pub reg_id: Option<String>,
    pub roles: Vec<ComidRole>,
    pub extensions: Extensions,
}

impl Serialize for ComidEntity {
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

impl<'de> Deserialize<'de> for ComidEntity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ComidEntityVisitor)
    }
}

struct ComidEntityVisitor;

impl<'de> de::Visitor<'de> for ComidEntityVisitor {
    type Value = ComidEntity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an entity map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = ComidEntity::default();

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
                Some(0) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.name = entity_name(&raw).map_err(de::Error::custom)?;
                }
                Some(1) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.reg_id = Some(uri_text(&raw).map_err(de::Error::custom)?);
                }
                Some(2) => ret.roles = map.next_value::<Vec<ComidRole>>()?,
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

pub(crate) fn entity_name(raw: &RawValue) -> Result<String, Error> {
    raw.as_text()
        .map(str::to_string)
        .ok_or_else(|| Error::invalid("entity name", "only text names are supported"))
}

pub(crate) fn uri_text(raw: &RawValue) -> Result<String, Error> {
    match raw {
        RawValue::Text(s) => Ok(s.clone()),
        RawValue::Tagged(TAG_URI, inner) => inner
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid("URI", "must be text")),
        other => Err(Error::invalid("URI", format!("unexpected item: {other:?}"))),
    }
}

/// The relation of a linked tag to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRel {
    Supplements,
    Replaces,
}

impl TagRel {
    pub fn code(&self) -> i64 {
        match self {
            TagRel::Supplements => 0,
            TagRel::Replaces => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<TagRel, Error> {
        match code {
            0 => Ok(TagRel::Supplements),
            1 => Ok(TagRel::Replaces),
            other => Err(Error::invalid("tag relation", other.to_string())),
        }
    }
}

/// A reference to another module tag this one supplements or replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedTag {
    pub linked_tag_id: TagId,
    pub rel: TagRel,
}

impl Serialize for LinkedTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let mut map = serializer.serialize_map(Some(2))?;

        if hr {
            map.serialize_entry("target", &self.linked_tag_id)?;
            map.serialize_entry("rel", &self.rel.code())?;
        } else {
            map.serialize_entry(&0, &self.linked_tag_id)?;
            map.serialize_entry(&1, &self.rel.code())?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for LinkedTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(LinkedTagVisitor)
    }
}

struct LinkedTagVisitor;

impl<'de> de::Visitor<'de> for LinkedTagVisitor {
    type Value = LinkedTag;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a linked-tag map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut id: Option<TagId> = None;
        let mut rel: Option<TagRel> = None;

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "target" => Some(0),
                    "rel" => Some(1),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => id = Some(map.next_value::<TagId>()?),
                Some(1) => {
                    let code = map.next_value::<i64>()?;
                    rel = Some(TagRel::from_code(code).map_err(de::Error::custom)?);
                }
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(LinkedTag {
            linked_tag_id: id.ok_or_else(|| de::Error::custom("missing linked tag ID"))?,
            rel: rel.ok_or_else(|| de::Error::custom("missing tag relation"))?,
        })
    }
}

/// Identifies a CoMID and its revision.
#[derive(Debug, Clone, PartialEq)]
pub struct TagIdentity {
    pub tag_id: TagId,
    pub tag_version: u64,
}

impl Serialize for TagIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 1 + (self.tag_version != 0) as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        if hr {
            map.serialize_entry("id", &self.tag_id)?;
        } else {
            map.serialize_entry(&0, &self.tag_id)?;
        }

        if self.tag_version != 0 {
            if hr {
                map.serialize_entry("version", &self.tag_version)?;
            } else {
                map.serialize_entry(&1, &self.tag_version)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for TagIdentity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(TagIdentityVisitor)
    }
}

struct TagIdentityVisitor;

impl<'de> de::Visitor<'de> for TagIdentityVisitor {
    type Value = TagIdentity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a tag-identity map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut id: Option<TagId> = None;
        let mut version: u64 = 0;

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "id" => Some(0),
                    "version" => Some(1),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => id = Some(map.next_value::<TagId>()?),
                Some(1) => version = map.next_value::<u64>()?,
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(TagIdentity {
            tag_id: id.ok_or_else(|| de::Error::custom("missing tag ID"))?,
            tag_version: version,
        })
    }
}

/// Binds an attesting environment to measurements. On the wire this is a
/// two-element array.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTriple {
    pub environment: Environment,
    pub measurements: Vec<Measurement>,
}

impl Serialize for ValueTriple {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq as _;

        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.environment)?;
        seq.serialize_element(&self.measurements)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ValueTriple {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> de::Visitor<'de> for V {
            type Value = ValueTriple;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [environment, measurements] record")
            }

            fn visit_seq<A: de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let environment = seq
                    .next_element::<Environment>()?
                    .ok_or_else(|| de::Error::custom("missing environment"))?;
                let measurements = seq
                    .next_element::<Vec<Measurement>>()?
                    .ok_or_else(|| de::Error::custom("missing measurements"))?;

                Ok(ValueTriple {
                    environment,
                    measurements,
                })
            }
        }

        deserializer.deserialize_seq(V)
    }
}

/// Binds an attesting environment to cryptographic keys. On the wire this
/// is a two-element array.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTriple {
    pub environment: Environment,
    pub verif_keys: Vec<CryptoKey>,
}

impl Serialize for KeyTriple {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq as _;

        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.environment)?;
        seq.serialize_element(&self.verif_keys)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for KeyTriple {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> de::Visitor<'de> for V {
            type Value = KeyTriple;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [environment, verification-keys] record")
            }

            fn visit_seq<A: de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let environment = seq
                    .next_element::<Environment>()?
                    .ok_or_else(|| de::Error::custom("missing environment"))?;
                let verif_keys = seq
                    .next_element::<Vec<CryptoKey>>()?
                    .ok_or_else(|| de::Error::custom("missing verification keys"))?;

                Ok(KeyTriple {
                    environment,
                    verif_keys,
                })
            }
        }

        deserializer.deserialize_seq(V)
    }
}

/// The triples of a CoMID, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triples {
    pub reference_values: Vec<ValueTriple>,
    pub endorsed_values: Vec<ValueTriple>,
    pub dev_identity_keys: Vec<KeyTriple>,
    pub attest_verif_keys: Vec<KeyTriple>,
    /// kept only so that its presence can be rejected by the mapper
    pub cond_endorse_series: Vec<RawValue>,
    pub extensions: Extensions,
}

impl Triples {
    pub fn is_empty(&self) -> bool {
        self.reference_values.is_empty()
            && self.endorsed_values.is_empty()
            && self.dev_identity_keys.is_empty()
            && self.attest_verif_keys.is_empty()
            && self.cond_endorse_series.is_empty()
            && self.extensions.is_empty()
    }
}

impl Serialize for Triples {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = !self.reference_values.is_empty() as usize
            + !self.endorsed_values.is_empty() as usize
            + !self.dev_identity_keys.is_empty() as usize
            + !self.attest_verif_keys.is_empty() as usize
            + !self.cond_endorse_series.is_empty() as usize
            + self.extensions.len();
        let mut map = serializer.serialize_map(Some(len))?;

        if !self.reference_values.is_empty() {
            if hr {
                map.serialize_entry("reference-values", &self.reference_values)?;
            } else {
                map.serialize_entry(&0, &self.reference_values)?;
            }
        }

        if !self.endorsed_values.is_empty() {
            if hr {
                map.serialize_entry("endorsed-values", &self.endorsed_values)?;
            } else {
                map.serialize_entry(&1, &self.endorsed_values)?;
            }
        }

        if !self.dev_identity_keys.is_empty() {
            if hr {
                map.serialize_entry("dev-identity-keys", &self.dev_identity_keys)?;
            } else {
                map.serialize_entry(&2, &self.dev_identity_keys)?;
            }
        }

        if !self.attest_verif_keys.is_empty() {
            if hr {
                map.serialize_entry("attester-verification-keys", &self.attest_verif_keys)?;
            } else {
                map.serialize_entry(&3, &self.attest_verif_keys)?;
            }
        }

        if !self.cond_endorse_series.is_empty() {
            if hr {
                map.serialize_entry("conditional-endorsement-series", &self.cond_endorse_series)?;
            } else {
                map.serialize_entry(&8, &self.cond_endorse_series)?;
            }
        }

        self.extensions.serialize_into(&mut map, hr)?;

        map.end()
    }
}

impl<'de> Deserialize<'de> for Triples {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(TriplesVisitor)
    }
}

struct TriplesVisitor;

impl<'de> de::Visitor<'de> for TriplesVisitor {
    type Value = Triples;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a triples map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = Triples::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "reference-values" => Some(0),
                    "endorsed-values" => Some(1),
                    "dev-identity-keys" => Some(2),
                    "attester-verification-keys" => Some(3),
                    "conditional-endorsement-series" => Some(8),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => ret.reference_values = map.next_value::<Vec<ValueTriple>>()?,
                Some(1) => ret.endorsed_values = map.next_value::<Vec<ValueTriple>>()?,
                Some(2) => ret.dev_identity_keys = map.next_value::<Vec<KeyTriple>>()?,
                Some(3) => ret.attest_verif_keys = map.next_value::<Vec<KeyTriple>>()?,
                Some(8) => ret.cond_endorse_series = map.next_value::<Vec<RawValue>>()?,
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

/// One CoMID: a tagged module identity and the triples describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Comid {
    pub language: Option<String>,
    pub tag_identity: TagIdentity,
    pub entities: Vec<ComidEntity>,
    pub linked_tags: Vec<LinkedTag>,
    pub triples: Triples,
    pub extensions: Extensions,
}

impl Comid {
    pub fn new(tag_id: TagId) -> Comid {
        Comid {
            language: None,
            tag_identity: TagIdentity {
                tag_id,
                tag_version: 0,
            },
            entities: Vec::new(),
            linked_tags: Vec::new(),
            triples: Triples::default(),
            extensions: Extensions::new(),
        }
    }

    /// Decode a CoMID from the content of a CoRIM tag entry (a bare map,
    /// without the 506 tag).
    pub fn from_cbor(buf: &[u8]) -> Result<Comid, Error> {
        ciborium::de::from_reader(buf).map_err(Error::decode)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf: Vec<u8> = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(Error::encode)?;
        Ok(buf)
    }
}

impl Serialize for Comid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = 2
            + self.language.is_some() as usize
            + !self.entities.is_empty() as usize
            + !self.linked_tags.is_empty() as usize
            + self.extensions.len();
        let mut map = serializer.serialize_map(Some(len))?;

        if let Some(language) = &self.language {
            if hr {
                map.serialize_entry("language", language)?;
            } else {
                map.serialize_entry(&0, language)?;
            }
        }

        if hr {
            map.serialize_entry("tag-identity", &self.tag_identity)?;
        } else {
            map.serialize_entry(&1, &self.tag_identity)?;
        }

        if !self.entities.is_empty() {
            if hr {
                map.serialize_entry("entities", &self.entities)?;
            } else {
                map.serialize_entry(&2, &self.entities)?;
            }
        }

        if !self.linked_tags.is_empty() {
            if hr {
                map.serialize_entry("linked-tags", &self.linked_tags)?;
            } else {
                map.serialize_entry(&3, &self.linked_tags)?;
            }
        }

        if hr {
            map.serialize_entry("triples", &self.triples)?;
        } else {
            map.serialize_entry(&4, &self.triples)?;
        }

        self.extensions.serialize_into(&mut map, hr)?;

        map.end()
    }
}

impl<'de> Deserialize<'de> for Comid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ComidVisitor)
    }
}

struct ComidVisitor;

impl<'de> de::Visitor<'de> for ComidVisitor {
    type Value = Comid;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a CoMID map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut language: Option<String> = None;
        let mut tag_identity: Option<TagIdentity> = None;
        let mut entities: Vec<ComidEntity> = Vec::new();
        let mut linked_tags: Vec<LinkedTag> = Vec::new();
        let mut triples = Triples::default();
        let mut extensions = Extensions::new();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "language" => Some(0),
                    "tag-identity" => Some(1),
                    "entities" => Some(2),
                    "linked-tags" => Some(3),
                    "triples" => Some(4),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => language = Some(map.next_value::<String>()?),
                Some(1) => tag_identity = Some(map.next_value::<TagIdentity>()?),
                Some(2) => entities = map.next_value::<Vec<ComidEntity>>()?,
                Some(3) => linked_tags = map.next_value::<Vec<LinkedTag>>()?,
                Some(4) => triples = map.next_value::<Triples>()?,
                _ => {
                    let value = map.next_value::<RawValue>()?;
                    extensions.collect(&key, &value).map_err(de::Error::custom)?;
                }
            }
        }

        Ok(Comid {
            language,
            tag_identity: tag_identity
                .ok_or_else(|| de::Error::custom("missing tag identity"))?,
            entities,
            linked_tags,
            triples,
            extensions,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::environment::{Class, ClassId};
    use crate::token::measurement::{Mval, Version};

    fn sample_comid() -> Comid {
        let mut comid = Comid::new(TagId::from("test-tag"));
        comid.tag_identity.tag_version = 2;
        comid.language = Some("en-GB".to_string());
        comid.entities.push(ComidEntity {
            name: "ACME Ltd.".to_string(),
            reg_id: Some("https://acme.example".to_string()),
            roles: vec![ROLE_TAG_CREATOR, ROLE_CREATOR],
            extensions: Extensions::new(),
        });
        comid.linked_tags.push(LinkedTag {
            linked_tag_id: TagId::from("other-tag"),
            rel: TagRel::Supplements,
        });
        comid.triples.reference_values.push(ValueTriple {
            environment: Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0xaa, 0xbb])),
                    vendor: Some("ACME".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            measurements: vec![Measurement {
                key: None,
                val: Mval {
                    version: Some(Version {
                        version: "1.0.0".to_string(),
                        scheme: 16384,
                    }),
                    ..Default::default()
                },
                authorized_by: None,
            }],
        });
        comid.triples.attest_verif_keys.push(KeyTriple {
            environment: Environment::default(),
            verif_keys: vec![CryptoKey::PkixBase64Key("MFkw".to_string())],
        });

        comid
    }

    #[test]
    fn round_trip() {
        let comid = sample_comid();

        let buf = comid.to_cbor().unwrap();
        let comid2 = Comid::from_cbor(&buf).unwrap();
        assert_eq!(comid2, comid);
    }

    #[test]
    fn roles() {
        assert_eq!(ROLE_TAG_CREATOR.to_string(), "tagCreator");
        assert_eq!(ROLE_MAINTAINER.to_string(), "maintainer");
        assert_eq!(ComidRole(7).to_string(), "Role(7)");

        assert_eq!(ComidRole::parse("creator").unwrap(), ROLE_CREATOR);
        assert_eq!(ComidRole::parse("Role(7)").unwrap(), ComidRole(7));
        assert!(ComidRole::parse("emperor").is_err());
    }

    #[test]
    fn unknown_map_keys_are_cached() {
        let mut comid = sample_comid();
        comid
            .extensions
            .collect(&RawValue::Integer(-100), &RawValue::Text("x".to_string()))
            .unwrap();
        comid
            .triples
            .extensions
            .collect(&RawValue::Integer(-101), &RawValue::Integer(9))
            .unwrap();

        let buf = comid.to_cbor().unwrap();
        let comid2 = Comid::from_cbor(&buf).unwrap();

        assert_eq!(comid2.extensions.cached.len(), 1);
        assert_eq!(comid2.extensions.cached[0].0, "-100");
        assert_eq!(comid2.triples.extensions.cached.len(), 1);
        assert_eq!(comid2, comid);
    }

    #[test]
    fn cond_endorse_series_detected() {
        let mut comid = sample_comid();
        comid
            .triples
            .cond_endorse_series
            .push(RawValue::Array(vec![]));

        let buf = comid.to_cbor().unwrap();
        let comid2 = Comid::from_cbor(&buf).unwrap();
        assert_eq!(comid2.triples.cond_endorse_series.len(), 1);
    }

    #[test]
    fn missing_tag_identity() {
        // {4: {}}
        let raw = RawValue::Map(vec![(RawValue::Integer(4), RawValue::Map(vec![]))]);
        let err = Comid::from_cbor(&raw.to_cbor().unwrap()).unwrap_err();
        assert!(err.to_string().contains("missing tag identity"));
    }
}
