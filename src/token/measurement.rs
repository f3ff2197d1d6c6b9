// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::ser::SerializeMap;
use serde::{de, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::raw::RawValue;
use crate::registry;
use crate::token::cryptokey::{CryptoKey, HashEntry};
use crate::token::extension::Extensions;

const TAG_UUID: u64 = 37;
const TAG_OID: u64 = 111;
const TAG_SVN: u64 = 552;
const TAG_MIN_SVN: u64 = 553;
const TAG_BYTES: u64 = 560;

/// Identifies a measurement within a triple.
#[derive(Debug, Clone, PartialEq)]
pub enum Mkey {
    Uint(u64),
    Text(String),
    Uuid(Uuid),
    Oid(Vec<u8>),
    Extension { type_name: String, bytes: Vec<u8> },
}

impl Mkey {
    pub fn type_name(&self) -> String {
        match self {
            Mkey::Uint(_) => "uint".to_string(),
            Mkey::Text(_) => "string".to_string(),
            Mkey::Uuid(_) => "uuid".to_string(),
            Mkey::Oid(_) => "oid".to_string(),
            Mkey::Extension { type_name, .. } => type_name.clone(),
        }
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        match self {
            Mkey::Uint(v) => v.to_be_bytes().to_vec(),
            Mkey::Text(s) => s.as_bytes().to_vec(),
            Mkey::Uuid(u) => u.as_bytes().to_vec(),
            Mkey::Oid(b) => b.clone(),
            Mkey::Extension { bytes, .. } => bytes.clone(),
        }
    }

    pub fn from_parts(type_name: &str, bytes: &[u8]) -> Result<Mkey, Error> {
        match type_name {
            "uint" => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::invalid("mkey", "uint must be 8 big-endian bytes"))?;
                Ok(Mkey::Uint(u64::from_be_bytes(arr)))
            }
            "string" => std::str::from_utf8(bytes)
                .map(|s| Mkey::Text(s.to_string()))
                .map_err(|_| Error::invalid("mkey", "string mkey must be valid UTF-8")),
            "uuid" => Uuid::from_slice(bytes)
                .map(Mkey::Uuid)
                .map_err(|e| Error::invalid("mkey", e.to_string())),
            "oid" => Ok(Mkey::Oid(bytes.to_vec())),
            _ => Ok(Mkey::Extension {
                type_name: type_name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    pub fn to_raw(&self) -> Result<RawValue, Error> {
        let ret = match self {
            Mkey::Uint(v) => RawValue::Integer(
                i64::try_from(*v).map_err(|e| Error::invalid("mkey", e.to_string()))?,
            ),
            Mkey::Text(s) => RawValue::Text(s.clone()),
            Mkey::Uuid(u) => RawValue::tagged(TAG_UUID, RawValue::Bytes(u.as_bytes().to_vec())),
            Mkey::Oid(b) => RawValue::tagged(TAG_OID, RawValue::Bytes(b.clone())),
            Mkey::Extension { bytes, .. } => RawValue::from_cbor(bytes)?,
        };

        Ok(ret)
    }

    pub fn from_raw(raw: &RawValue) -> Result<Mkey, Error> {
        match raw {
            RawValue::Integer(v) => u64::try_from(*v)
                .map(Mkey::Uint)
                .map_err(|_| Error::invalid("mkey", "negative uint")),
            RawValue::Text(s) => Ok(Mkey::Text(s.clone())),
            RawValue::Tagged(TAG_UUID, inner) => {
                let bytes = inner
                    .as_bytes()
                    .ok_or_else(|| Error::invalid("mkey", "UUID must be a byte string"))?;
                Uuid::from_slice(bytes)
                    .map(Mkey::Uuid)
                    .map_err(|e| Error::invalid("mkey", e.to_string()))
            }
            RawValue::Tagged(TAG_OID, inner) => inner
                .as_bytes()
                .map(|b| Mkey::Oid(b.to_vec()))
                .ok_or_else(|| Error::invalid("mkey", "OID must be a byte string")),
            RawValue::Tagged(tag, _) => Ok(Mkey::Extension {
                type_name: registry::extension_type_name(*tag),
                bytes: raw.to_cbor()?,
            }),
            other => Err(Error::invalid("mkey", format!("unexpected item: {other:?}"))),
        }
    }
}

/// the version-scheme registry names used by the measurement mapper
pub fn version_scheme_name(code: i64) -> String {
    match code {
        1 => "multipartnumeric".to_string(),
        2 => "multipartnumeric+suffix".to_string(),
        3 => "alphanumeric".to_string(),
        4 => "decimal".to_string(),
        16384 => "semver".to_string(),
        other => format!("version-scheme({other})"),
    }
}

pub fn parse_version_scheme(text: &str) -> Result<i64, Error> {
    match text {
        "multipartnumeric" => Ok(1),
        "multipartnumeric+suffix" => Ok(2),
        "alphanumeric" => Ok(3),
        "decimal" => Ok(4),
        "semver" => Ok(16384),
        other => other
            .strip_prefix("version-scheme(")
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::invalid("version scheme", other)),
    }
}

/// A measured version string and its versioning scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub version: String,
    pub scheme: i64,
}

impl Version {
    pub fn scheme_name(&self) -> String {
        version_scheme_name(self.scheme)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let human_readable = serializer.is_human_readable();
        let mut map = serializer.serialize_map(Some(2))?;

        if human_readable {
            map.serialize_entry("value", &self.version)?;
            map.serialize_entry("scheme", &self.scheme)?;
        } else {
            map.serialize_entry(&0, &self.version)?;
            map.serialize_entry(&1, &self.scheme)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(VersionVisitor)
    }
}

struct VersionVisitor;

impl<'de> de::Visitor<'de> for VersionVisitor {
    type Value = Version;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a version map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut version = String::new();
        let mut scheme: i64 = 1; // multipartnumeric is the registry default

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "value" => Some(0),
                    "scheme" => Some(1),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => version = map.next_value::<String>()?,
                Some(1) => scheme = map.next_value::<i64>()?,
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(Version { version, scheme })
    }
}

/// A security version number, exact or minimum.
#[derive(Debug, Clone, PartialEq)]
pub enum SvnValue {
    Exact(i64),
    Min(i64),
}

impl SvnValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SvnValue::Exact(_) => "exact-value",
            SvnValue::Min(_) => "min-value",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            SvnValue::Exact(v) | SvnValue::Min(v) => *v,
        }
    }

    pub fn from_parts(type_name: &str, value: i64) -> Result<SvnValue, Error> {
        match type_name {
            "exact-value" => Ok(SvnValue::Exact(value)),
            "min-value" => Ok(SvnValue::Min(value)),
            other => Err(Error::invalid("SVN", format!("unexpected type: {other}"))),
        }
    }

    pub fn to_raw(&self) -> RawValue {
        match self {
            SvnValue::Exact(v) => RawValue::tagged(TAG_SVN, RawValue::Integer(*v)),
            SvnValue::Min(v) => RawValue::tagged(TAG_MIN_SVN, RawValue::Integer(*v)),
        }
    }

    pub fn from_raw(raw: &RawValue) -> Result<SvnValue, Error> {
        match raw {
            RawValue::Integer(v) => Ok(SvnValue::Exact(*v)),
            RawValue::Tagged(TAG_SVN, inner) => inner
                .as_integer()
                .map(SvnValue::Exact)
                .ok_or_else(|| Error::invalid("SVN", "must be an integer")),
            RawValue::Tagged(TAG_MIN_SVN, inner) => inner
                .as_integer()
                .map(SvnValue::Min)
                .ok_or_else(|| Error::invalid("SVN", "must be an integer")),
            other => Err(Error::invalid("SVN", format!("unexpected item: {other:?}"))),
        }
    }
}

/// Boolean claims about the state of the measured environment. Code points
/// 0-9 are the named flags; any other integer key is an extension flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagsMap {
    pub is_configured: Option<bool>,
    pub is_secure: Option<bool>,
    pub is_recovery: Option<bool>,
    pub is_debug: Option<bool>,
    pub is_replay_protected: Option<bool>,
    pub is_integrity_protected: Option<bool>,
    pub is_runtime_measured: Option<bool>,
    pub is_immutable: Option<bool>,
    pub is_tcb: Option<bool>,
    pub is_confidentiality_protected: Option<bool>,
    pub extensions: Vec<(i64, bool)>,
}

impl FlagsMap {
    pub fn is_empty(&self) -> bool {
        self.named().iter().all(|(_, v)| v.is_none()) && self.extensions.is_empty()
    }

    /// the named flags in code-point order
    pub fn named(&self) -> [(i64, Option<bool>); 10] {
        [
            (0, self.is_configured),
            (1, self.is_secure),
            (2, self.is_recovery),
            (3, self.is_debug),
            (4, self.is_replay_protected),
            (5, self.is_integrity_protected),
            (6, self.is_runtime_measured),
            (7, self.is_immutable),
            (8, self.is_tcb),
            (9, self.is_confidentiality_protected),
        ]
    }

    pub fn set_named(&mut self, code_point: i64, value: bool) -> Result<(), Error> {
        let slot = match code_point {
            0 => &mut self.is_configured,
            1 => &mut self.is_secure,
            2 => &mut self.is_recovery,
            3 => &mut self.is_debug,
            4 => &mut self.is_replay_protected,
            5 => &mut self.is_integrity_protected,
            6 => &mut self.is_runtime_measured,
            7 => &mut self.is_immutable,
            8 => &mut self.is_tcb,
            9 => &mut self.is_confidentiality_protected,
            other => {
                return Err(Error::UnexpectedCodepoint(other));
            }
        };

        *slot = Some(value);
        Ok(())
    }
}

impl Serialize for FlagsMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let named: Vec<(i64, bool)> = self
            .named()
            .iter()
            .filter_map(|(cp, v)| v.map(|v| (*cp, v)))
            .collect();

        let mut map = serializer.serialize_map(Some(named.len() + self.extensions.len()))?;

        for (cp, v) in named.iter().chain(self.extensions.iter()) {
            map.serialize_entry(cp, v)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for FlagsMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(FlagsMapVisitor)
    }
}

struct FlagsMapVisitor;

impl<'de> de::Visitor<'de> for FlagsMapVisitor {
    type Value = FlagsMap;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a flags map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = FlagsMap::default();

        while let Some(key) = map.next_key::<i64>()? {
            let value = map.next_value::<bool>()?;

            if (0..=9).contains(&key) {
                ret.set_named(key, value).map_err(de::Error::custom)?;
            } else {
                ret.extensions.push((key, value));
            }
        }

        Ok(ret)
    }
}

/// The index of an integrity register: either numeric or textual.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterIndex {
    Uint(u64),
    Text(String),
}

impl fmt::Display for RegisterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterIndex::Uint(v) => write!(f, "{v}"),
            RegisterIndex::Text(s) => f.write_str(s),
        }
    }
}

/// A set of integrity registers, each holding one or more digests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityRegisters {
    pub entries: Vec<(RegisterIndex, Vec<HashEntry>)>,
}

impl IntegrityRegisters {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for IntegrityRegisters {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;

        for (index, digests) in &self.entries {
            match index {
                RegisterIndex::Uint(v) => map.serialize_entry(v, digests)?,
                RegisterIndex::Text(s) => map.serialize_entry(s, digests)?,
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for IntegrityRegisters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(IntegrityRegistersVisitor)
    }
}

struct IntegrityRegistersVisitor;

impl<'de> de::Visitor<'de> for IntegrityRegistersVisitor {
    type Value = IntegrityRegisters;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an integrity-registers map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = IntegrityRegisters::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            let index = match &key {
                RawValue::Integer(v) => RegisterIndex::Uint(
                    u64::try_from(*v).map_err(|_| de::Error::custom("negative register index"))?,
                ),
                RawValue::Text(s) => RegisterIndex::Text(s.clone()),
                other => {
                    return Err(de::Error::custom(format!(
                        "unexpected register index: {other:?}"
                    )))
                }
            };

            let digests = map.next_value::<Vec<HashEntry>>()?;
            ret.entries.push((index, digests));
        }

        Ok(ret)
    }
}

/// The values measured for an environment, one slot per code point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mval {
    pub version: Option<Version>,
    pub svn: Option<SvnValue>,
    pub digests: Option<Vec<HashEntry>>,
    pub flags: Option<FlagsMap>,
    pub raw_value: Option<Vec<u8>>,
    pub mac_addr: Option<Vec<u8>>,
    pub ip_addr: Option<Vec<u8>>,
    pub serial_number: Option<String>,
    pub ueid: Option<Vec<u8>>,
    pub uuid: Option<Uuid>,
    pub name: Option<String>,
    pub crypto_keys: Option<Vec<CryptoKey>>,
    pub integrity_registers: Option<IntegrityRegisters>,
    pub extensions: Extensions,
}

impl Mval {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.svn.is_none()
            && self.digests.is_none()
            && self.flags.is_none()
            && self.raw_value.is_none()
            && self.mac_addr.is_none()
            && self.ip_addr.is_none()
            && self.serial_number.is_none()
            && self.ueid.is_none()
            && self.uuid.is_none()
            && self.name.is_none()
            && self.crypto_keys.is_none()
            && self.integrity_registers.is_none()
            && self.extensions.is_empty()
    }
}

impl Serialize for Mval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let hr = serializer.is_human_readable();
        let len = self.version.is_some() as usize
            + self.svn.is_some() as usize
            + self.digests.is_some() as usize
            + self.flags.is_some() as usize
            + self.raw_value.is_some() as usize
            + self.mac_addr.is_some() as usize
            + self.ip_addr.is_some() as usize
            + self.serial_number.is_some() as usize
            + self.ueid.is_some() as usize
            + self.uuid.is_some() as usize
            + self.name.is_some() as usize
            + self.crypto_keys.is_some() as usize
            + self.integrity_registers.is_some() as usize
            + self.extensions.len();
        let mut map = serializer.serialize_map(Some(len))?;

        fn entry<M, V>(map: &mut M, hr: bool, name: &str, code: i64, value: &V) -> Result<(), M::Error>
        where
            M: SerializeMap,
            V: Serialize + ?Sized,
        {
            if hr {
                map.serialize_entry(name, value)
            } else {
                map.serialize_entry(&code, value)
            }
        }

        if let Some(v) = &self.version {
            entry(&mut map, hr, "version", 0, v)?;
        }
        if let Some(svn) = &self.svn {
            entry(&mut map, hr, "svn", 1, &svn.to_raw())?;
        }
        if let Some(v) = &self.digests {
            entry(&mut map, hr, "digests", 2, v)?;
        }
        if let Some(v) = &self.flags {
            entry(&mut map, hr, "flags", 3, v)?;
        }
        if let Some(bytes) = &self.raw_value {
            let raw = RawValue::tagged(TAG_BYTES, RawValue::Bytes(bytes.clone()));
            entry(&mut map, hr, "raw-value", 4, &raw)?;
        }
        if let Some(v) = &self.mac_addr {
            entry(&mut map, hr, "mac-addr", 6, &RawValue::Bytes(v.clone()))?;
        }
        if let Some(v) = &self.ip_addr {
            entry(&mut map, hr, "ip-addr", 7, &RawValue::Bytes(v.clone()))?;
        }
        if let Some(v) = &self.serial_number {
            entry(&mut map, hr, "serial-number", 8, v)?;
        }
        if let Some(v) = &self.ueid {
            entry(&mut map, hr, "ueid", 9, &RawValue::Bytes(v.clone()))?;
        }
        if let Some(uuid) = &self.uuid {
            let raw = RawValue::Bytes(uuid.as_bytes().to_vec());
            entry(&mut map, hr, "uuid", 10, &raw)?;
        }
        if let Some(v) = &self.name {
            entry(&mut map, hr, "name", 11, v)?;
        }
        if let Some(v) = &self.crypto_keys {
            entry(&mut map, hr, "cryptokeys", 13, v)?;
        }
        if let Some(v) = &self.integrity_registers {
            entry(&mut map, hr, "integrity-registers", 14, v)?;
        }

        self.extensions.serialize_into(&mut map, hr)?;

        map.end()
    }
}

impl<'de> Deserialize<'de> for Mval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(MvalVisitor)
    }
}

struct MvalVisitor;

impl<'de> de::Visitor<'de> for MvalVisitor {
    type Value = Mval;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a measurement-values map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = Mval::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => mval_key_code(s),
                _ => None,
            };

            match code {
                Some(0) => ret.version = Some(map.next_value::<Version>()?),
                Some(1) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.svn = Some(SvnValue::from_raw(&raw).map_err(de::Error::custom)?);
                }
                Some(2) => ret.digests = Some(map.next_value::<Vec<HashEntry>>()?),
                Some(3) => ret.flags = Some(map.next_value::<FlagsMap>()?),
                Some(4) => {
                    let raw = map.next_value::<RawValue>()?;
                    let bytes = match &raw {
                        RawValue::Bytes(b) => b.clone(),
                        RawValue::Tagged(TAG_BYTES, inner) => inner
                            .as_bytes()
                            .map(<[u8]>::to_vec)
                            .ok_or_else(|| de::Error::custom("raw-value must be bytes"))?,
                        _ => return Err(de::Error::custom("raw-value must be bytes")),
                    };
                    ret.raw_value = Some(bytes);
                }
                Some(6) => ret.mac_addr = Some(next_bytes(&mut map, "mac-addr")?),
                Some(7) => ret.ip_addr = Some(next_bytes(&mut map, "ip-addr")?),
                Some(8) => ret.serial_number = Some(map.next_value::<String>()?),
                Some(9) => ret.ueid = Some(next_bytes(&mut map, "ueid")?),
                Some(10) => {
                    let bytes = next_bytes(&mut map, "uuid")?;
                    ret.uuid =
                        Some(Uuid::from_slice(&bytes).map_err(de::Error::custom)?);
                }
                Some(11) => ret.name = Some(map.next_value::<String>()?),
                Some(13) => ret.crypto_keys = Some(map.next_value::<Vec<CryptoKey>>()?),
                Some(14) => {
                    ret.integrity_registers = Some(map.next_value::<IntegrityRegisters>()?)
                }
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

fn mval_key_code(name: &str) -> Option<i64> {
    match name {
        "version" => Some(0),
        "svn" => Some(1),
        "digests" => Some(2),
        "flags" => Some(3),
        "raw-value" => Some(4),
        "mac-addr" => Some(6),
        "ip-addr" => Some(7),
        "serial-number" => Some(8),
        "ueid" => Some(9),
        "uuid" => Some(10),
        "name" => Some(11),
        "cryptokeys" => Some(13),
        "integrity-registers" => Some(14),
        _ => None,
    }
}

fn next_bytes<'de, A>(map: &mut A, what: &str) -> Result<Vec<u8>, A::Error>
where
    A: de::MapAccess<'de>,
{
    let raw = map.next_value::<RawValue>()?;
    raw.as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| de::Error::custom(format!("{what} must be a byte string")))
}

/// One measurement: an optional key, the measured values, and the keys
/// authorized to endorse them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub key: Option<Mkey>,
    pub val: Mval,
    pub authorized_by: Option<Vec<CryptoKey>>,
}

impl Serialize for Measurement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error as _;

        let is_human_readable = serializer.is_human_readable();
        let len = 1 + self.key.is_some() as usize + self.authorized_by.is_some() as usize;
        let mut map = serializer.serialize_map(Some(len))?;

        if let Some(key) = &self.key {
            let raw = key.to_raw().map_err(S::Error::custom)?;
            if is_human_readable {
                map.serialize_entry("key", &raw)?;
            } else {
                map.serialize_entry(&0, &raw)?;
            }
        }

        if is_human_readable {
            map.serialize_entry("value", &self.val)?;
        } else {
            map.serialize_entry(&1, &self.val)?;
        }

        if let Some(auth) = &self.authorized_by {
            if is_human_readable {
                map.serialize_entry("authorized-by", auth)?;
            } else {
                map.serialize_entry(&2, auth)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Measurement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(MeasurementVisitor)
    }
}

struct MeasurementVisitor;

impl<'de> de::Visitor<'de> for MeasurementVisitor {
    type Value = Measurement;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a measurement map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut ret = Measurement::default();

        while let Some(key) = map.next_key::<RawValue>()? {
            let code = match &key {
                RawValue::Integer(i) => Some(*i),
                RawValue::Text(s) => match s.as_str() {
                    "key" => Some(0),
                    "value" => Some(1),
                    "authorized-by" => Some(2),
                    _ => None,
                },
                _ => None,
            };

            match code {
                Some(0) => {
                    let raw = map.next_value::<RawValue>()?;
                    ret.key = Some(Mkey::from_raw(&raw).map_err(de::Error::custom)?);
                }
                Some(1) => ret.val = map.next_value::<Mval>()?,
                Some(2) => ret.authorized_by = Some(map.next_value::<Vec<CryptoKey>>()?),
                _ => {
                    map.next_value::<RawValue>()?;
                }
            }
        }

        Ok(ret)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::{de::from_reader, ser::into_writer};

    #[test]
    fn mkey_parts() {
        let key = Mkey::Uint(0x11223344);
        assert_eq!(key.type_name(), "uint");
        assert_eq!(
            key.store_bytes(),
            vec![0x00, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44]
        );
        assert_eq!(Mkey::from_parts("uint", &key.store_bytes()).unwrap(), key);

        let key = Mkey::Text("component.rot".to_string());
        assert_eq!(key.type_name(), "string");
        assert_eq!(Mkey::from_parts("string", &key.store_bytes()).unwrap(), key);

        let err = Mkey::from_parts("string", &[0xff, 0xfe]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));

        let err = Mkey::from_parts("uint", &[0x01]).unwrap_err();
        assert!(err.to_string().contains("8 big-endian bytes"));
    }

    #[test]
    fn svn_serde() {
        let svn = SvnValue::Exact(7);
        let buf = svn.to_raw().to_cbor().unwrap();
        assert_eq!(
            buf,
            vec![
                0xd9, // tag in the next 2 bytes
                0x02, 0x28, // 552
                0x07,
            ]
        );
        assert_eq!(
            SvnValue::from_raw(&RawValue::from_cbor(&buf).unwrap()).unwrap(),
            svn
        );

        let svn = SvnValue::Min(3);
        assert_eq!(svn.type_name(), "min-value");
        assert_eq!(SvnValue::from_parts("min-value", 3).unwrap(), svn);

        // a bare integer reads as an exact SVN
        assert_eq!(
            SvnValue::from_raw(&RawValue::Integer(9)).unwrap(),
            SvnValue::Exact(9)
        );
    }

    #[test]
    fn flags_serde() {
        let mut flags = FlagsMap::default();
        flags.set_named(1, true).unwrap();
        flags.set_named(8, false).unwrap();
        flags.extensions.push((-1, true));

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&flags, &mut buf).unwrap();
        assert_eq!(
            buf,
            vec![
                0xa3, // map (3)
                0x01, // 1 (is-secure)
                0xf5, // true
                0x08, // 8 (is-tcb)
                0xf4, // false
                0x20, // -1
                0xf5, // true
            ]
        );

        let flags2: FlagsMap = from_reader(buf.as_slice()).unwrap();
        assert_eq!(flags2, flags);
        assert!(!flags2.is_empty());
        assert!(FlagsMap::default().is_empty());
    }

    #[test]
    fn integrity_registers_serde() {
        let regs = IntegrityRegisters {
            entries: vec![
                (
                    RegisterIndex::Uint(0),
                    vec![HashEntry::new(1, vec![0xaa; 32])],
                ),
                (
                    RegisterIndex::Text("rim".to_string()),
                    vec![HashEntry::new(8, vec![0xbb; 64])],
                ),
            ],
        };

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&regs, &mut buf).unwrap();

        let regs2: IntegrityRegisters = from_reader(buf.as_slice()).unwrap();
        assert_eq!(regs2, regs);
        assert_eq!(regs2.entries[1].0.to_string(), "rim");
    }

    #[test]
    fn measurement_round_trip() {
        let mea = Measurement {
            key: Some(Mkey::Uint(2)),
            val: Mval {
                version: Some(Version {
                    version: "1.2.3".to_string(),
                    scheme: 16384,
                }),
                svn: Some(SvnValue::Min(1)),
                digests: Some(vec![HashEntry::new(1, vec![0x01; 32])]),
                raw_value: Some(vec![0xde, 0xad]),
                serial_number: Some("ZX-99".to_string()),
                name: Some("boot-fw".to_string()),
                ..Default::default()
            },
            authorized_by: Some(vec![CryptoKey::PkixBase64Key("MFkw".to_string())]),
        };

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&mea, &mut buf).unwrap();

        let mea2: Measurement = from_reader(buf.as_slice()).unwrap();
        assert_eq!(mea2, mea);
    }

    #[test]
    fn mval_unknown_key_is_cached() {
        // {11: "x", -70000: h'0102'}
        let raw = RawValue::Map(vec![
            (RawValue::Integer(11), RawValue::Text("x".to_string())),
            (RawValue::Integer(-70000), RawValue::Bytes(vec![0x01, 0x02])),
        ]);
        let buf = raw.to_cbor().unwrap();

        let mval: Mval = from_reader(buf.as_slice()).unwrap();
        assert_eq!(mval.name.as_deref(), Some("x"));
        assert_eq!(mval.extensions.cached.len(), 1);
        assert_eq!(mval.extensions.cached[0].0, "-70000");

        // the cached entry is re-emitted on encode
        let mut buf2: Vec<u8> = Vec::new();
        into_writer(&mval, &mut buf2).unwrap();
        let mval2: Mval = from_reader(buf2.as_slice()).unwrap();
        assert_eq!(mval2, mval);
    }

    #[test]
    fn version_schemes() {
        assert_eq!(version_scheme_name(16384), "semver");
        assert_eq!(version_scheme_name(77), "version-scheme(77)");
        assert_eq!(parse_version_scheme("semver").unwrap(), 16384);
        assert_eq!(parse_version_scheme("version-scheme(77)").unwrap(), 77);
        assert!(parse_version_scheme("bogus").is_err());
    }
}
