// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::error::Error;

// Well-known CBOR tags used by the built-in identity codecs. Extension
// types registered through this module must not collide with these.
const RESERVED_TAGS: &[u64] = &[
    1, 18, 32, 37, 111, 501, 506, 550, 552, 553, 554, 555, 556, 557, 558, 559, 560, 561,
];

lazy_static! {
    static ref TYPE_REGISTER: Mutex<BTreeMap<u64, String>> = Mutex::new(BTreeMap::new());
}

/// Register a type name for a CBOR tag number, so that tagged identity
/// values (class IDs, instances, groups, mkeys, crypto keys) carrying that
/// tag are persisted under a stable name instead of the synthetic
/// `tag(<n>)`. Intended to be called once at process start-up, before any
/// tokens are decoded.
pub fn register_extension_type(tag: u64, name: &str) -> Result<(), Error> {
    if RESERVED_TAGS.contains(&tag) {
        return Err(Error::Configuration(format!(
            "tag {tag} is reserved by a built-in type"
        )));
    }

    let mut register = TYPE_REGISTER.lock().unwrap();

    match register.get(&tag) {
        Some(existing) if existing != name => Err(Error::Configuration(format!(
            "tag {tag} already registered as {existing:?}"
        ))),
        _ => {
            register.insert(tag, name.to_string());
            Ok(())
        }
    }
}

/// The registered name for a tag, or the synthetic fallback `tag(<n>)`.
pub fn extension_type_name(tag: u64) -> String {
    let register = TYPE_REGISTER.lock().unwrap();

    match register.get(&tag) {
        Some(name) => name.clone(),
        None => format!("tag({tag})"),
    }
}

/// The tag number registered under a name, if any. Synthetic `tag(<n>)`
/// names resolve without a registry entry.
pub fn extension_type_tag(name: &str) -> Option<u64> {
    if let Some(inner) = name.strip_prefix("tag(").and_then(|s| s.strip_suffix(')')) {
        return inner.parse::<u64>().ok();
    }

    let register = TYPE_REGISTER.lock().unwrap();

    register
        .iter()
        .find(|(_, n)| n.as_str() == name)
        .map(|(t, _)| *t)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        register_extension_type(60000, "test.impl-id").unwrap();
        assert_eq!(extension_type_name(60000), "test.impl-id");
        assert_eq!(extension_type_tag("test.impl-id"), Some(60000));

        // re-registering the same mapping is fine
        register_extension_type(60000, "test.impl-id").unwrap();

        let err = register_extension_type(60000, "other").unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn fallback_name() {
        assert_eq!(extension_type_name(59999), "tag(59999)");
        assert_eq!(extension_type_tag("tag(59999)"), Some(59999));
        assert_eq!(extension_type_tag("unknown-name"), None);
    }

    #[test]
    fn reserved() {
        let err = register_extension_type(501, "corim").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }
}
