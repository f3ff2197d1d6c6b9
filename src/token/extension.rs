// SPDX-License-Identifier: Apache-2.0

use serde::ser::SerializeMap;

use crate::error::Error;
use crate::raw::RawValue;

/// specifies the type of an extension value (without requiring a concrete value)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionKind {
    Bool,
    String,
    Bytes,
    Integer,
    Uint,
    Float,
    Array,
    Map,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::Bool => "bool",
            ExtensionKind::String => "string",
            ExtensionKind::Bytes => "bytes",
            ExtensionKind::Integer => "int",
            ExtensionKind::Uint => "uint",
            ExtensionKind::Float => "float",
            ExtensionKind::Array => "array",
            ExtensionKind::Map => "map",
        }
    }

    pub fn from_str(text: &str) -> Result<ExtensionKind, Error> {
        match text {
            "bool" => Ok(ExtensionKind::Bool),
            "string" => Ok(ExtensionKind::String),
            "bytes" => Ok(ExtensionKind::Bytes),
            "int" => Ok(ExtensionKind::Integer),
            "uint" => Ok(ExtensionKind::Uint),
            "float" => Ok(ExtensionKind::Float),
            "array" => Ok(ExtensionKind::Array),
            "map" => Ok(ExtensionKind::Map),
            other => Err(Error::Validation(format!("unknown extension kind: {other}"))),
        }
    }

    pub fn of(value: &RawValue) -> Option<ExtensionKind> {
        match value {
            RawValue::Bool(_) => Some(ExtensionKind::Bool),
            RawValue::Text(_) => Some(ExtensionKind::String),
            RawValue::Bytes(_) => Some(ExtensionKind::Bytes),
            RawValue::Integer(v) if *v >= 0 => Some(ExtensionKind::Uint),
            RawValue::Integer(_) => Some(ExtensionKind::Integer),
            RawValue::Float(_) => Some(ExtensionKind::Float),
            RawValue::Array(_) => Some(ExtensionKind::Array),
            RawValue::Map(_) => Some(ExtensionKind::Map),
            RawValue::Null | RawValue::Tagged(..) => None,
        }
    }

    fn matches(&self, value: &RawValue) -> bool {
        matches!(
            (self, value),
            (ExtensionKind::Bool, RawValue::Bool(_))
                | (ExtensionKind::String, RawValue::Text(_))
                | (ExtensionKind::Bytes, RawValue::Bytes(_))
                | (ExtensionKind::Integer, RawValue::Integer(_))
                | (ExtensionKind::Float, RawValue::Float(_))
                | (ExtensionKind::Array, RawValue::Array(_))
                | (ExtensionKind::Map, RawValue::Map(_))
        ) || matches!((self, value), (ExtensionKind::Uint, RawValue::Integer(v)) if *v >= 0)
    }
}

/// A named extension field: a value the application registered under a
/// field name and an integer map key.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionEntry {
    pub name: String,
    pub json_tag: String,
    /// the integer map key and its modifiers, e.g. `-72000,keyasint`
    pub cbor_tag: String,
    pub kind: ExtensionKind,
    pub value: RawValue,
}

impl ExtensionEntry {
    /// the integer map key this entry serializes under
    pub fn cbor_key(&self) -> Option<i64> {
        self.cbor_tag
            .split(',')
            .next()
            .and_then(|s| s.parse::<i64>().ok())
    }
}

/// Extension values attached to an extensible token map.
///
/// Named entries carry a field name and a declared kind; cached entries
/// are raw CBOR collected for map keys the decoder did not recognize,
/// keyed by the stringified key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extensions {
    pub named: Vec<ExtensionEntry>,
    pub cached: Vec<(String, Vec<u8>)>,
}

impl Extensions {
    pub fn new() -> Extensions {
        Extensions::default()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.cached.is_empty()
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.cached.len()
    }

    /// Set a named extension field.
    pub fn set(
        &mut self,
        name: &str,
        key: i64,
        kind: ExtensionKind,
        value: RawValue,
    ) -> Result<(), Error> {
        if !kind.matches(&value) {
            return Err(Error::Validation(format!(
                "kind mismatch for extension {name:?}: value is {value:?}, but want {k}",
                k = kind.as_str()
            )));
        }

        if self.named.iter().any(|e| e.name == name) {
            return Err(Error::Validation(format!(
                "extension {name:?} already set"
            )));
        }

        self.named.push(ExtensionEntry {
            name: name.to_string(),
            json_tag: name.to_string(),
            cbor_tag: format!("{key},keyasint"),
            kind,
            value,
        });

        Ok(())
    }

    /// Cache a map entry the decoder did not recognize.
    pub(crate) fn collect(&mut self, key: &RawValue, value: &RawValue) -> Result<(), Error> {
        let key_text = match key {
            RawValue::Integer(i) => i.to_string(),
            RawValue::Text(s) => s.clone(),
            other => {
                return Err(Error::CborDecode(format!(
                    "unsupported extension map key: {other:?}"
                )))
            }
        };

        self.cached.push((key_text, value.to_cbor()?));

        Ok(())
    }

    pub(crate) fn serialize_into<M>(&self, map: &mut M, human_readable: bool) -> Result<(), M::Error>
    where
        M: SerializeMap,
    {
        use serde::ser::Error as _;

        for entry in &self.named {
            if human_readable {
                let key = if entry.json_tag.is_empty() {
                    entry.name.as_str()
                } else {
                    entry.json_tag.as_str()
                };
                map.serialize_entry(key, &entry.value)?;
            } else {
                let key = entry
                    .cbor_key()
                    .ok_or_else(|| M::Error::custom(format!("bad cbor tag: {}", entry.cbor_tag)))?;
                map.serialize_entry(&key, &entry.value)?;
            }
        }

        for (key, bytes) in &self.cached {
            let value = RawValue::from_cbor(bytes).map_err(M::Error::custom)?;

            match key.parse::<i64>() {
                Ok(n) if !human_readable => map.serialize_entry(&n, &value)?,
                _ => map.serialize_entry(key, &value)?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_and_validate() {
        let mut exts = Extensions::new();
        exts.set("vendor-data", -72000, ExtensionKind::Bytes, RawValue::Bytes(vec![0x01]))
            .unwrap();

        assert_eq!(exts.len(), 1);
        assert_eq!(exts.named[0].cbor_key(), Some(-72000));
        assert_eq!(exts.named[0].kind.as_str(), "bytes");

        let err = exts
            .set("vendor-data", -72001, ExtensionKind::Bytes, RawValue::Bytes(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("already set"));

        let err = exts
            .set("other", -72001, ExtensionKind::Bool, RawValue::Integer(1))
            .unwrap_err();
        assert!(err.to_string().contains("kind mismatch"));
    }

    #[test]
    fn collect_unknown_keys() {
        let mut exts = Extensions::new();
        exts.collect(&RawValue::Integer(-1), &RawValue::Text("x".to_string()))
            .unwrap();

        assert_eq!(exts.cached.len(), 1);
        assert_eq!(exts.cached[0].0, "-1");
        // 0x61 'x'
        assert_eq!(exts.cached[0].1, vec![0x61, 0x78]);
    }

    #[test]
    fn kinds() {
        assert_eq!(ExtensionKind::of(&RawValue::Integer(1)), Some(ExtensionKind::Uint));
        assert_eq!(
            ExtensionKind::of(&RawValue::Integer(-1)),
            Some(ExtensionKind::Integer)
        );
        assert_eq!(ExtensionKind::of(&RawValue::Null), None);

        for kind in ["bool", "string", "bytes", "int", "uint", "float", "array", "map"] {
            assert_eq!(ExtensionKind::from_str(kind).unwrap().as_str(), kind);
        }
        assert!(ExtensionKind::from_str("enum").is_err());
    }
}
