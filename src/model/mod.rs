// SPDX-License-Identifier: Apache-2.0

//! The relational model: one row struct per table, each carrying its
//! bidirectional mapping to the token types and its own CRUD. Rows use an
//! `id` of 0 to mean "not yet saved".

mod crypto_key;
mod digest;
mod entity;
mod environment;
mod extension;
mod flag;
mod integrity_register;
mod key_triple;
mod linked_tag;
mod locator;
mod manifest;
mod measurement;
mod module_tag;
mod role;
mod value_triple;

pub use self::crypto_key::CryptoKey;
pub use self::digest::Digest;
pub use self::entity::Entity;
pub use self::environment::{environment_match_conditions, Environment};
pub use self::extension::ExtensionValue;
pub use self::flag::{flags_from_token, flags_to_token, Flag};
pub use self::integrity_register::IntegrityRegister;
pub use self::key_triple::{key_triples_to_token, KeyTriple};
pub use self::key_triple::{ATTEST_KEY_TRIPLE, IDENTITY_KEY_TRIPLE};
pub use self::linked_tag::LinkedTag;
pub use self::locator::Locator;
pub use self::manifest::Manifest;
pub use self::measurement::{Measurement, MeasurementValueEntry};
pub use self::measurement::{
    MVAL_CRYPTO_KEYS, MVAL_DIGESTS, MVAL_FLAGS, MVAL_INTEGRITY_REGISTERS, MVAL_IP_ADDR,
    MVAL_MAC_ADDR, MVAL_NAME, MVAL_RAW_VALUE, MVAL_SERIAL_NUMBER, MVAL_SVN, MVAL_UEID,
    MVAL_UUID, MVAL_VERSION,
};
pub use self::module_tag::ModuleTag;
pub use self::role::RoleEntry;
pub use self::value_triple::{value_triples_to_token, ValueTriple};
pub use self::value_triple::{ENDORSED_VALUE_TRIPLE, REFERENCE_VALUE_TRIPLE};

use uuid::Uuid;

use crate::db::Db;
use crate::error::Error;

/// How a tag or manifest ID is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIdType {
    String,
    Uuid,
}

impl TagIdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagIdType::String => "string",
            TagIdType::Uuid => "uuid",
        }
    }

    pub fn parse(text: &str) -> Result<TagIdType, Error> {
        match text {
            "string" => Ok(TagIdType::String),
            "uuid" => Ok(TagIdType::Uuid),
            other => Err(Error::Validation(format!(
                "unsupported tag ID type: {other}"
            ))),
        }
    }
}

/// The token types do not expose how a tag ID was represented, so the
/// mapper infers it: an ID that parses as a canonical UUID is a UUID.
pub(crate) fn infer_tag_id_type(id: &str) -> TagIdType {
    if Uuid::parse_str(id).is_ok() {
        TagIdType::Uuid
    } else {
        TagIdType::String
    }
}

/// The 16 core tables, in a delete-safe order.
pub const CORE_TABLES: [&str; 16] = [
    "extensions",
    "roles",
    "flags",
    "digests",
    "measurement_value_entries",
    "integrity_registers",
    "cryptokeys",
    "measurements",
    "value_triples",
    "key_triples",
    "environments",
    "linked_tags",
    "entities",
    "locators",
    "module_tags",
    "manifests",
];

/// Remove all rows from the core tables.
pub async fn reset(db: &Db) -> Result<(), Error> {
    let mut conn = db.acquire().await?;

    for table in CORE_TABLES {
        let sql = format!("DELETE FROM {table}");
        db.execute(&mut conn, &sql, vec![]).await?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_id_type_inference() {
        assert_eq!(infer_tag_id_type("cca-ta"), TagIdType::String);
        assert_eq!(
            infer_tag_id_type("31fb5abf-023e-4992-aa4e-95f9c1503bfa"),
            TagIdType::Uuid
        );
    }

    #[test]
    fn tag_id_type_parse() {
        assert_eq!(TagIdType::parse("string").unwrap(), TagIdType::String);
        assert_eq!(TagIdType::parse("uuid").unwrap(), TagIdType::Uuid);
        assert!(TagIdType::parse("oid").is_err());
    }
}
