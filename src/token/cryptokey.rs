// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use base64::Engine as _;
use serde::{de, Deserialize, Serialize};

use crate::error::Error;
use crate::raw::RawValue;
use crate::registry;

const TAG_PKIX_BASE64_KEY: u64 = 554;
const TAG_PKIX_BASE64_CERT: u64 = 555;
const TAG_PKIX_BASE64_CERT_PATH: u64 = 556;
const TAG_THUMBPRINT: u64 = 557;
const TAG_COSE_KEY: u64 = 558;
const TAG_CERT_THUMBPRINT: u64 = 559;
const TAG_BYTES: u64 = 560;
const TAG_CERT_PATH_THUMBPRINT: u64 = 561;

/// The name of a hash algorithm in the named-information registry, used by
/// the textual form of thumbprints.
pub fn hash_alg_name(id: u64) -> String {
    match id {
        1 => "sha-256".to_string(),
        2 => "sha-256-128".to_string(),
        3 => "sha-256-120".to_string(),
        4 => "sha-256-96".to_string(),
        5 => "sha-256-64".to_string(),
        6 => "sha-256-32".to_string(),
        7 => "sha-384".to_string(),
        8 => "sha-512".to_string(),
        9 => "sha3-224".to_string(),
        10 => "sha3-256".to_string(),
        11 => "sha3-384".to_string(),
        12 => "sha3-512".to_string(),
        other => format!("hash-alg({other})"),
    }
}

pub fn hash_alg_id(name: &str) -> Result<u64, Error> {
    match name {
        "sha-256" => Ok(1),
        "sha-256-128" => Ok(2),
        "sha-256-120" => Ok(3),
        "sha-256-96" => Ok(4),
        "sha-256-64" => Ok(5),
        "sha-256-32" => Ok(6),
        "sha-384" => Ok(7),
        "sha-512" => Ok(8),
        "sha3-224" => Ok(9),
        "sha3-256" => Ok(10),
        "sha3-384" => Ok(11),
        "sha3-512" => Ok(12),
        other => other
            .strip_prefix("hash-alg(")
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::invalid("hash algorithm", other)),
    }
}

/// One digest: a hash algorithm and its output.
#[derive(Debug, Clone, PartialEq)]
pub struct HashEntry {
    pub alg_id: u64,
    pub value: Vec<u8>,
}

impl HashEntry {
    pub fn new(alg_id: u64, value: Vec<u8>) -> HashEntry {
        HashEntry { alg_id, value }
    }

    pub fn to_raw(&self) -> RawValue {
        RawValue::Array(vec![
            RawValue::Integer(self.alg_id as i64),
            RawValue::Bytes(self.value.clone()),
        ])
    }

    pub fn from_raw(raw: &RawValue) -> Result<HashEntry, Error> {
        let fields = raw
            .as_array()
            .ok_or_else(|| Error::invalid("digest", "must be an array"))?;

        if fields.len() != 2 {
            return Err(Error::invalid(
                "digest",
                format!("must have 2 fields, found {}", fields.len()),
            ));
        }

        let alg_id = fields[0]
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| Error::invalid("digest", "algorithm must be a uint"))?;
        let value = fields[1]
            .as_bytes()
            .ok_or_else(|| Error::invalid("digest", "value must be a byte string"))?;

        Ok(HashEntry::new(alg_id, value.to_vec()))
    }

    /// Parse the textual form `<alg-name>;<base64(value)>`.
    pub fn parse(text: &str) -> Result<HashEntry, Error> {
        let (alg, b64) = text
            .split_once(';')
            .ok_or_else(|| Error::invalid("digest", format!("missing ';' in {text:?}")))?;

        let value = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| Error::invalid("digest", e.to_string()))?;

        Ok(HashEntry::new(hash_alg_id(alg)?, value))
    }
}

impl fmt::Display for HashEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{}",
            hash_alg_name(self.alg_id),
            base64::engine::general_purpose::STANDARD.encode(&self.value)
        )
    }
}

impl Serialize for HashEntry {
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

impl<'de> Deserialize<'de> for HashEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;
        HashEntry::from_raw(&raw).map_err(de::Error::custom)
    }
}

/// A verification or identity key bound to an attesting environment.
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoKey {
    PkixBase64Key(String),
    PkixBase64Cert(String),
    PkixBase64CertPath(String),
    Thumbprint(HashEntry),
    CertThumbprint(HashEntry),
    CertPathThumbprint(HashEntry),
    CoseKey(Vec<u8>),
    Bytes(Vec<u8>),
    /// any other tagged value; the bytes retain the tag
    Extension { type_name: String, bytes: Vec<u8> },
}

impl CryptoKey {
    pub fn type_name(&self) -> String {
        match self {
            CryptoKey::PkixBase64Key(_) => "pkix-base64-key".to_string(),
            CryptoKey::PkixBase64Cert(_) => "pkix-base64-cert".to_string(),
            CryptoKey::PkixBase64CertPath(_) => "pkix-base64-cert-path".to_string(),
            CryptoKey::Thumbprint(_) => "thumbprint".to_string(),
            CryptoKey::CertThumbprint(_) => "cert-thumbprint".to_string(),
            CryptoKey::CertPathThumbprint(_) => "cert-path-thumbprint".to_string(),
            CryptoKey::CoseKey(_) => "cose-key".to_string(),
            CryptoKey::Bytes(_) => "bytes".to_string(),
            CryptoKey::Extension { type_name, .. } => type_name.clone(),
        }
    }

    /// The persisted payload: UTF-8 text for the PEM-ish and thumbprint
    /// forms, raw bytes for `bytes`/`cose-key`, the full tagged CBOR
    /// encoding for extensions.
    pub fn store_bytes(&self) -> Vec<u8> {
        match self {
            CryptoKey::PkixBase64Key(s)
            | CryptoKey::PkixBase64Cert(s)
            | CryptoKey::PkixBase64CertPath(s) => s.as_bytes().to_vec(),
            CryptoKey::Thumbprint(d)
            | CryptoKey::CertThumbprint(d)
            | CryptoKey::CertPathThumbprint(d) => d.to_string().into_bytes(),
            CryptoKey::CoseKey(b) | CryptoKey::Bytes(b) => b.clone(),
            CryptoKey::Extension { bytes, .. } => bytes.clone(),
        }
    }

    /// Reconstruct a key from its persisted `(type, bytes)` pair.
    pub fn from_parts(type_name: &str, bytes: &[u8]) -> Result<CryptoKey, Error> {
        let text = || {
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| {
                    Error::invalid(
                        "crypto key",
                        format!("data for {type_name} must be a valid UTF-8 string"),
                    )
                })
        };

        match type_name {
            "pkix-base64-key" => Ok(CryptoKey::PkixBase64Key(text()?)),
            "pkix-base64-cert" => Ok(CryptoKey::PkixBase64Cert(text()?)),
            "pkix-base64-cert-path" => Ok(CryptoKey::PkixBase64CertPath(text()?)),
            "thumbprint" => Ok(CryptoKey::Thumbprint(HashEntry::parse(&text()?)?)),
            "cert-thumbprint" => Ok(CryptoKey::CertThumbprint(HashEntry::parse(&text()?)?)),
            "cert-path-thumbprint" => {
                Ok(CryptoKey::CertPathThumbprint(HashEntry::parse(&text()?)?))
            }
            "cose-key" => Ok(CryptoKey::CoseKey(bytes.to_vec())),
            "bytes" => Ok(CryptoKey::Bytes(bytes.to_vec())),
            _ => Ok(CryptoKey::Extension {
                type_name: type_name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    pub fn to_raw(&self) -> Result<RawValue, Error> {
        let ret = match self {
            CryptoKey::PkixBase64Key(s) => {
                RawValue::tagged(TAG_PKIX_BASE64_KEY, RawValue::Text(s.clone()))
            }
            CryptoKey::PkixBase64Cert(s) => {
                RawValue::tagged(TAG_PKIX_BASE64_CERT, RawValue::Text(s.clone()))
            }
            CryptoKey::PkixBase64CertPath(s) => {
                RawValue::tagged(TAG_PKIX_BASE64_CERT_PATH, RawValue::Text(s.clone()))
            }
            CryptoKey::Thumbprint(d) => RawValue::tagged(TAG_THUMBPRINT, d.to_raw()),
            CryptoKey::CertThumbprint(d) => RawValue::tagged(TAG_CERT_THUMBPRINT, d.to_raw()),
            CryptoKey::CertPathThumbprint(d) => {
                RawValue::tagged(TAG_CERT_PATH_THUMBPRINT, d.to_raw())
            }
            CryptoKey::CoseKey(b) => RawValue::tagged(TAG_COSE_KEY, RawValue::Bytes(b.clone())),
            CryptoKey::Bytes(b) => RawValue::tagged(TAG_BYTES, RawValue::Bytes(b.clone())),
            CryptoKey::Extension { bytes, .. } => RawValue::from_cbor(bytes)?,
        };

        Ok(ret)
    }

    pub fn from_raw(raw: &RawValue) -> Result<CryptoKey, Error> {
        let (tag, inner) = raw
            .as_tagged()
            .ok_or_else(|| Error::invalid("crypto key", "must be a tagged value"))?;

        let text = |what: &str| {
            inner
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| Error::invalid("crypto key", format!("{what} must be text")))
        };

        let bytes = |what: &str| {
            inner
                .as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::invalid("crypto key", format!("{what} must be bytes")))
        };

        match tag {
            TAG_PKIX_BASE64_KEY => Ok(CryptoKey::PkixBase64Key(text("pkix-base64-key")?)),
            TAG_PKIX_BASE64_CERT => Ok(CryptoKey::PkixBase64Cert(text("pkix-base64-cert")?)),
            TAG_PKIX_BASE64_CERT_PATH => {
                Ok(CryptoKey::PkixBase64CertPath(text("pkix-base64-cert-path")?))
            }
            TAG_THUMBPRINT => Ok(CryptoKey::Thumbprint(HashEntry::from_raw(inner)?)),
            TAG_CERT_THUMBPRINT => Ok(CryptoKey::CertThumbprint(HashEntry::from_raw(inner)?)),
            TAG_CERT_PATH_THUMBPRINT => {
                Ok(CryptoKey::CertPathThumbprint(HashEntry::from_raw(inner)?))
            }
            TAG_COSE_KEY => Ok(CryptoKey::CoseKey(bytes("cose-key")?)),
            TAG_BYTES => Ok(CryptoKey::Bytes(bytes("bytes")?)),
            other => Ok(CryptoKey::Extension {
                type_name: registry::extension_type_name(other),
                bytes: raw.to_cbor()?,
            }),
        }
    }
}

impl Serialize for CryptoKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error as _;
        self.to_raw().map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CryptoKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawValue::deserialize(deserializer)?;
        CryptoKey::from_raw(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::{de::from_reader, ser::into_writer};

    #[test]
    fn pem_key_round_trip() {
        let key = CryptoKey::PkixBase64Key("MFkwEwYHKoZI".to_string());

        let mut buf: Vec<u8> = Vec::new();
        into_writer(&key, &mut buf).unwrap();
        // tag 554, text string (12)
        assert_eq!(buf[..4], [0xd9, 0x02, 0x2a, 0x6c]);

        let key2: CryptoKey = from_reader(buf.as_slice()).unwrap();
        assert_eq!(key2, key);

        assert_eq!(key.type_name(), "pkix-base64-key");
        let parts = key.store_bytes();
        assert_eq!(parts, b"MFkwEwYHKoZI");
        assert_eq!(CryptoKey::from_parts("pkix-base64-key", &parts).unwrap(), key);
    }

    #[test]
    fn thumbprint_round_trip() {
        let key = CryptoKey::CertThumbprint(HashEntry::new(1, vec![0xde, 0xad, 0xbe, 0xef]));

        let buf = key.to_raw().unwrap().to_cbor().unwrap();
        assert_eq!(
            buf,
            vec![
                0xd9, // tag in the next 2 bytes
                0x02, 0x2f, // 559
                0x82, // array (2)
                0x01, // 1 (sha-256)
                0x44, // byte string (4)
                0xde, 0xad, 0xbe, 0xef,
            ]
        );

        let key2 = CryptoKey::from_raw(&RawValue::from_cbor(&buf).unwrap()).unwrap();
        assert_eq!(key2, key);

        let parts = key.store_bytes();
        assert_eq!(std::str::from_utf8(&parts).unwrap(), "sha-256;3q2+7w==");
        assert_eq!(CryptoKey::from_parts("cert-thumbprint", &parts).unwrap(), key);
    }

    #[test]
    fn bytes_and_cose_key() {
        for (key, name) in [
            (CryptoKey::Bytes(vec![0x01, 0x02]), "bytes"),
            (CryptoKey::CoseKey(vec![0xa1, 0x01, 0x02]), "cose-key"),
        ] {
            assert_eq!(key.type_name(), name);
            let parts = key.store_bytes();
            assert_eq!(CryptoKey::from_parts(name, &parts).unwrap(), key);

            let raw = key.to_raw().unwrap();
            assert_eq!(CryptoKey::from_raw(&raw).unwrap(), key);
        }
    }

    #[test]
    fn extension_round_trip() {
        // unknown tag 59999 wrapping a byte string
        let raw = RawValue::tagged(59999, RawValue::Bytes(vec![0x0a, 0x0b]));
        let key = CryptoKey::from_raw(&raw).unwrap();

        assert_eq!(key.type_name(), "tag(59999)");

        let parts = key.store_bytes();
        let key2 = CryptoKey::from_parts("tag(59999)", &parts).unwrap();
        assert_eq!(key2, key);

        // the stored bytes retain the tag
        assert_eq!(key2.to_raw().unwrap(), raw);
    }

    #[test]
    fn non_utf8_text_type() {
        let err = CryptoKey::from_parts("pkix-base64-cert", &[0xff, 0xfe]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn hash_alg_names() {
        assert_eq!(hash_alg_name(1), "sha-256");
        assert_eq!(hash_alg_name(8), "sha-512");
        assert_eq!(hash_alg_name(99), "hash-alg(99)");
        assert_eq!(hash_alg_id("sha-384").unwrap(), 7);
        assert_eq!(hash_alg_id("hash-alg(99)").unwrap(), 99);
        assert!(hash_alg_id("foo").is_err());
    }
}
