// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::ser::SerializeMap;
use serde::{de, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::raw::RawValue;
use crate::registry;

const TAG_UUID: u64 = 37;
const TAG_OID: u64 = 111;
const TAG_UEID: u64 = 550;
const TAG_BYTES: u64 = 560;

/// Identifies the class of an attesting environment.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassId {
    Oid(Vec<u8>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Extension { type_name: String, bytes: Vec<u8> },
}

impl ClassId {
    pub fn type_name(&self) -> String {
        match self {
            ClassId::Oid(_) => "oid".to_string(),
            ClassId::Uuid(_) => "uuid".to_string(),
            ClassId::Bytes(_) => "bytes".to_string(),
            ClassId::Extension { type_name, .. } => type_name.clone(),
        }
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        match self {
            ClassId::Oid(b) | ClassId::Bytes(b) => b.clone(),
            ClassId::Uuid(u) => u.as_bytes().to_vec(),
            ClassId::Extension { bytes, .. } => bytes.clone(),
        }
    }

    pub fn from_parts(type_name: &str, bytes: &[u8]) -> Result<ClassId, Error> {
        match type_name {
            "oid" => Ok(ClassId::Oid(bytes.to_vec())),
            "uuid" => Uuid::from_slice(bytes)
                .map(ClassId::Uuid)
                .map_err(|e| Error::invalid("class ID", e.to_string())),
            "bytes" => Ok(ClassId::Bytes(bytes.to_vec())),
            _ => Ok(ClassId::Extension {
                type_name: type_name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    pub fn to_raw(&self) -> Result<RawValue, Error> {
        let ret = match self {
            ClassId::Oid(b) => RawValue::tagged(TAG_OID, RawValue::Bytes(b.clone())),
            ClassId::Uuid(u) => {
                RawValue::tagged(TAG_UUID, RawValue::Bytes(u.as_bytes().to_vec()))
            }
            ClassId::Bytes(b) => RawValue::tagged(TAG_BYTES, RawValue::Bytes(b.clone())),
            ClassId::Extension { bytes, .. } => RawValue::from_cbor(bytes)?,
        };

        Ok(ret)
    }

    pub fn from_raw(raw: &RawValue) -> Result<ClassId, Error> {
        let (tag, inner) = raw
            .as_tagged()
            .ok_or_else(|| Error::invalid("class ID", "must be a tagged value"))?;

        match tag {
            TAG_OID => Ok(ClassId::Oid(tag_bytes("class ID", inner)?)),
            TAG_UUID => tag_uuid("class ID", inner).map(ClassId::Uuid),
            TAG_BYTES => Ok(ClassId::Bytes(tag_bytes("class ID", inner)?)),
            other => Ok(ClassId::Extension {
                type_name: registry::extension_type_name(other),
                bytes: raw.to_cbor()?,
            }),
        }
    }
}

/// Identifies an instance of an attesting environment.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceId {
    Ueid(Vec<u8>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Extension { type_name: String, bytes: Vec<u8> },
}

impl InstanceId {
    pub fn type_name(&self) -> String {
        match self {
            InstanceId::Ueid(_) => "ueid".to_string(),
            InstanceId::Uuid(_) => "uuid".to_string(),
            InstanceId::Bytes(_) => "bytes".to_string(),
            InstanceId::Extension { type_name, .. } => type_name.clone(),
        }
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        match self {
            InstanceId::Ueid(b) | InstanceId::Bytes(b) => b.clone(),
            InstanceId::Uuid(u) => u.as_bytes().to_vec(),
            InstanceId::Extension { bytes, .. } => bytes.clone(),
        }
    }

    pub fn from_parts(type_name: &str, bytes: &[u8]) -> Result<InstanceId, Error> {
        match type_name {
            "ueid" => {
                if bytes.is_empty() {
                    return Err(Error::invalid("instance", "empty UEID"));
                }
                Ok(InstanceId::Ueid(bytes.to_vec()))
            }
            "uuid" => Uuid::from_slice(bytes)
                .map(InstanceId::Uuid)
                .map_err(|e| Error::invalid("instance", e.to_string())),
            "bytes" => Ok(InstanceId::Bytes(bytes.to_vec())),
            _ => Ok(InstanceId::Extension {
                type_name: type_name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    pub fn to_raw(&self) -> Result<RawValue, Error> {
        let ret = match self {
            InstanceId::Ueid(b) => RawValue::tagged(TAG_UEID, RawValue::Bytes(b.clone())),
            InstanceId::Uuid(u) => {
                RawValue::tagged(TAG_UUID, RawValue::Bytes(u.as_bytes().to_vec()))
            }
            InstanceId::Bytes(b) => RawValue::tagged(TAG_BYTES, RawValue::Bytes(b.clone())),
            InstanceId::Extension { bytes, .. } => RawValue::from_cbor(bytes)?,
        };

        Ok(ret)
    }

    pub fn from_raw(raw: &RawValue) -> Result<InstanceId, Error> {
        let (tag, inner) = raw
            .as_tagged()
            .ok_or_else(|| Error::invalid("instance", "must be a tagged value"))?;

        match tag {
            TAG_UEID => Ok(InstanceId::Ueid(tag_bytes("instance", inner)?)),
            TAG_UUID => tag_uuid("instance", inner).map(InstanceId::Uuid),
            TAG_BYTES => Ok(InstanceId::Bytes(tag_bytes("instance", inner)?)),
            other => Ok(InstanceId::Extension {
                type_name: registry::extension_type_name(other),
                bytes: raw.to_cbor()?,
            }),
        }
    }
}

/// Identifies a group of attesting environments.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupId {
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Extension { type_name: String, bytes: Vec<u8> },
}

impl GroupId {
    pub fn type_name(&self) -> String {
        match self {
            GroupId::Uuid(_) => "uuid".to_string(),
            GroupId::Bytes(_) => "bytes".to_string(),
            GroupId::Extension { type_name, .. } => type_name.clone(),
        }
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        match self {
            GroupId::Uuid(u) => u.as_bytes().to_vec(),
            GroupId::Bytes(b) => b.clone(),
            GroupId::Extension { bytes, .. } => bytes.clone(),
        }
    }

    pub fn from_parts(type_name: &str, bytes: &[u8]) -> Result<GroupId, Error> {
        match type_name {
            "uuid" => Uuid::from_slice(bytes)
                .map(GroupId::Uuid)
                .map_err(|e| Error::invalid("group", e.to_string())),
            "bytes" => Ok(GroupId::Bytes(bytes.to_vec())),
            _ => Ok(GroupId::Extension {
                type_name: type_name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    pub fn to_raw(&self) -> Result<RawValue, Error> {
        let ret = match self {
            GroupId::Uuid(u) => {
                RawValue::tagged(TAG_UUID, RawValue::Bytes(u.as_bytes().to_vec()))
            }
            GroupId::Bytes(b) => RawValue::tagged(TAG_BYTES, RawValue::Bytes(b.clone())),
            GroupId::Extension { bytes, .. } => RawValue::from_cbor(bytes)?,
        };

        Ok(ret)
    }

    pub fn from_raw(raw: &RawValue) -> Result<GroupId, Error> {
        let (tag, inner) = raw
            .as_tagged()
            .ok_or_else(|| Error::invalid("group", "must be a tagged value"))?;

        match tag {
            TAG_UUID => tag_uuid("group", inner).map(GroupId::Uuid),
            TAG_BYTES => Ok(GroupId::Bytes(tag_bytes("group", inner)?)),
            other => Ok(GroupId::Extension {
                type_name: registry::extension_type_name(other),
                bytes: raw.to_cbor()?,
            }),
        }
    }
}

fn tag_bytes(kind: &str, inner: &RawValue) -> Result<Vec<u8>, Error> {
    inner
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::invalid(kind, "payload must be a byte string"))
}

fn tag_uuid(kind: &str, inner: &RawValue) -> Result<Uuid, Error> {
    let bytes = tag_bytes(kind, inner)?;
    Uuid::from_slice(&bytes).map_err(|e| Error::invalid(kind, e.to_string()))
}

/// The class portion of an environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Class {
    pub class_id: Option<ClassId>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub layer: Option<u64>,
    pub index: Option<u64>,
}

impl Class {
    pub fn is_empty(&self) -> bool {
        self.class_id.is_none()
            && self.vendor.is_none()
            && self.model.is_none()
            && self.layer.is_none()
            && self.index.is_none()
    }
}

impl Serialize for Class {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error as _;

        let is_human_readable = serializer.is_human_readable();
        let len = self.class_id.is_some() as usize
            + self.vendor.is_some() as usize
            + self.model.is_some() as usize
            + self.layer.is_some() as usize
            + self.index.is_some() as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        if let Some(id) = &self.class_id {
            let raw = id.to_raw().map_err(S::Error::custom)?;
            if is_human_readable {
                map.serialize_entry("id", &raw)?;
            } else {
                map.serialize_entry(&0, &raw)?;
            }
        }

        if let Some(v) = &self.vendor {
            if is_human_readable {
                map.serialize_entry("vendor", v)?;
            } else {
                map.serialize_entry(&1, v)?;
            }
        }

        if let Some(v) = &self.model {
            if is_human_readable {
                map.serialize_entry("model", v)?;
            } else {
                map.serialize_entry(&2, v)?;
            }
        }

        if let Some(v) = &self.layer {
            if is_human_readable {
                map.serialize_entry("layer", v)?;
            } else {
                map.serialize_entry(&3, v)?;
            }
        }

        if let Some(v) = &self.index {
            if is_human_readable {
                map.serialize_entry("index", v)?;
            } else {
                map.serialize_entry(&4, v)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Class {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ClassVisitor)
    }
}

struct ClassVisitor;

impl<'de> de::Visitor<'de> for ClassVisitor {
    type Value = Class;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a class map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = Class::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            match class_key_code(&key) {
                Some(0) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.class_id = Some(ClassId::from_raw(&raw).map_err(de::Error::custom)?);
                }
                Some(1) => ret.vendor = Some(map.next_value::<String>()?),
                Some(2) => ret.model = Some(map.next_value::<String>()?),
                Some(3) => ret.layer = Some(map.next_value::<u64>()?),
                Some(4) => ret.index = Some(map.next_value::<u64>()?),
                _ => {
                    map.next_value::<RawValue>()?; // ignore unknown entries
                }
            }
        }

        Ok(ret)
    }
}

/// Structured identifier of an attesting target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub class: Option<Class>,
    pub instance: Option<InstanceId>,
    pub group: Option<GroupId>,
}

impl Environment {
    pub fn is_empty(&self) -> bool {
        self.class.as_ref().map_or(true, |c| c.is_empty())
            && self.instance.is_none()
            && self.group.is_none()
    }
}

impl Serialize for Environment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error as _;

        let is_human_readable = serializer.is_human_readable();
        let len = self.class.is_some() as usize
            + self.instance.is_some() as usize
            + self.group.is_some() as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        if let Some(class) = &self.class {
            if is_human_readable {
                map.serialize_entry("class", class)?;
            } else {
                map.serialize_entry(&0, class)?;
            }
        }

        if let Some(instance) = &self.instance {
            let raw = instance.to_raw().map_err(S::Error::custom)?;
            if is_human_readable {
                map.serialize_entry("instance", &raw)?;
            } else {
                map.serialize_entry(&1, &raw)?;
            }
        }

        if let Some(group) = &self.group {
            let raw = group.to_raw().map_err(S::Error::custom)?;
            if is_human_readable {
                map.serialize_entry("group", &raw)?;
            } else {
                map.serialize_entry(&2, &raw)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(EnvironmentVisitor)
    }
}

struct EnvironmentVisitor;

impl<'de> de::Visitor<'de> for EnvironmentVisitor {
    type Value = Environment;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an environment map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = Environment::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            match env_key_code(&key) {
                Some(0) => ret.class = Some(map.next_value::<Class>()?),
                Some(1) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.instance = Some(InstanceId::from_raw(&raw).map_err(de::Error::custom)?);
                }
                Some(2) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.group = Some(GroupId::from_raw(&raw).map_err(de::Error::custom)?);
                }
                _ => {
                    map.next_value::<RawValue>()?; // ignore unknown entries
                }
            }
        }

        Ok(ret)
    }
}

fn class_key_code(key: &RawValue) -> Option<i64> {
    match key {
        RawValue::Integer(i) => Some(*i),
        RawValue::Text(s) => match s.as_str() {
            "id" => Some(0),
            "vendor" => Some(1),
            "model" => Some(2),
            "layer" => Some(3),
            "index" => Some(4),
            _ => None,
        },
        _ => None,
    }
}

fn env_key_code(key: &RawValue) -> Option<i64> {
    match key {
        RawValue::Integer(i) => Some(*i),
        RawValue::Text(s) => match s.as_str() {
            "class" => Some(0),
            "instance" => Some(1),
            "group" => Some(2),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::{de::from_reader, ser::into_writer};

    #[test]
    fn class_id_parts() {
        let id = ClassId::Oid(vec![0x55, 0x04, 0x03]);
        assert_eq!(id.type_name(), "oid");
        assert_eq!(
            ClassId::from_parts("oid", &id.store_bytes()).unwrap(),
            id
        );

        let uuid = Uuid::parse_str("31fb5abf-023e-4992-aa4e-95f9c1503bfa").unwrap();
        let id = ClassId::Uuid(uuid);
        assert_eq!(id.type_name(), "uuid");
        assert_eq!(ClassId::from_parts("uuid", &id.store_bytes()).unwrap(), id);

        let err = ClassId::from_parts("uuid", &[0x01]).unwrap_err();
        assert!(err.to_string().starts_with("invalid class ID"));
    }

    #[test]
    fn environment_serde() {
        let env = Environment {
            class: Some(Class {
                class_id: Some(ClassId::Bytes(vec![0xde, 0xad])),
                vendor: Some("acme".to_string()),
                model: None,
                layer: Some(0),
                index: None,
            }),
            instance: Some(InstanceId::Ueid(vec![0x01, 0x02, 0x03])),
            group: None,
        };

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&env, &mut buf).unwrap();

        let env2: Environment = from_reader(buf.as_slice()).unwrap();
        assert_eq!(env2, env);
    }

    #[test]
    fn environment_explicit_bytes() {
        // {1: 550(h'01')}
        let buf: Vec<u8> = vec![
            0xa1, // map (1)
            0x01, // 1 (instance)
            0xd9, // tag in the next 2 bytes
            0x02, 0x26, // 550 (ueid)
            0x41, // byte string (1)
            0x01,
        ];

        let env: Environment = from_reader(buf.as_slice()).unwrap();
        assert_eq!(env.instance, Some(InstanceId::Ueid(vec![0x01])));
        assert!(env.class.is_none());

        let mut buf2: Vec<u8> = Vec::new();
        into_writer(&env, &mut buf2).unwrap();
        assert_eq!(buf2, buf);
    }

    #[test]
    fn extension_id_round_trip() {
        // tag 600 is the CCA platform implementation ID in some profiles
        let raw = RawValue::tagged(600, RawValue::Bytes(vec![0x7f; 32]));
        let id = ClassId::from_raw(&raw).unwrap();

        assert_eq!(id.type_name(), "tag(600)");
        assert_eq!(id.to_raw().unwrap(), raw);

        let id2 = ClassId::from_parts("tag(600)", &id.store_bytes()).unwrap();
        assert_eq!(id2, id);
    }

    #[test]
    fn is_empty() {
        assert!(Environment::default().is_empty());
        assert!(Environment {
            class: Some(Class::default()),
            ..Default::default()
        }
        .is_empty());
        assert!(!Environment {
            group: Some(GroupId::Bytes(vec![0x01])),
            ..Default::default()
        }
        .is_empty());
    }
}
