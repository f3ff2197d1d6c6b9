// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::raw::RawValue;
use crate::token::{ExtensionEntry, ExtensionKind, Extensions};

/// One extension value, owned by any extensible parent. A named field
/// stores its kind and one primitive slot; a cached entry (empty
/// `field_name`) stores only the stringified map key and the raw CBOR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionValue {
    pub id: i64,

    pub field_kind: String,
    pub field_name: String,
    pub json_tag: String,
    pub cbor_tag: String,

    pub value_bytes: Option<Vec<u8>>,
    pub value_text: Option<String>,
    pub value_int: Option<i64>,
    pub value_float: Option<f64>,

    pub owner_id: i64,
    pub owner_type: String,
}

impl ExtensionValue {
    pub fn is_cached(&self) -> bool {
        self.field_name.is_empty()
    }
}

pub(crate) fn extensions_from_token(origin: &Extensions) -> Result<Vec<ExtensionValue>, Error> {
    let mut ret = Vec::with_capacity(origin.len());

    for entry in &origin.named {
        let mut row = ExtensionValue {
            field_kind: entry.kind.as_str().to_string(),
            field_name: entry.name.clone(),
            json_tag: entry.json_tag.clone(),
            cbor_tag: entry.cbor_tag.clone(),
            ..Default::default()
        };

        match (&entry.kind, &entry.value) {
            (ExtensionKind::Bool, RawValue::Bool(v)) => row.value_int = Some(*v as i64),
            (ExtensionKind::String, RawValue::Text(v)) => row.value_text = Some(v.clone()),
            (ExtensionKind::Bytes, RawValue::Bytes(v)) => row.value_bytes = Some(v.clone()),
            (ExtensionKind::Integer | ExtensionKind::Uint, RawValue::Integer(v)) => {
                row.value_int = Some(*v)
            }
            (ExtensionKind::Float, RawValue::Float(v)) => row.value_float = Some(*v),
            // complex values are stored CBOR-encoded
            (ExtensionKind::Array | ExtensionKind::Map, value) => {
                row.value_bytes = Some(value.to_cbor()?)
            }
            (kind, value) => {
                return Err(Error::Validation(format!(
                    "extension {name:?}: kind {k} does not match value {value:?}",
                    name = entry.name,
                    k = kind.as_str()
                )))
            }
        }

        ret.push(row);
    }

    for (key, bytes) in &origin.cached {
        ret.push(ExtensionValue {
            field_name: String::new(),
            json_tag: key.clone(),
            value_bytes: Some(bytes.clone()),
            ..Default::default()
        });
    }

    Ok(ret)
}

pub(crate) fn extensions_to_token(origin: &[ExtensionValue]) -> Result<Extensions, Error> {
    let mut ret = Extensions::new();

    for row in origin {
        if row.is_cached() {
            ret.cached.push((
                row.json_tag.clone(),
                row.value_bytes.clone().unwrap_or_default(),
            ));
            continue;
        }

        let kind = ExtensionKind::from_str(&row.field_kind)?;

        let value = match kind {
            ExtensionKind::Bool => RawValue::Bool(row.value_int.unwrap_or(0) != 0),
            ExtensionKind::String => {
                RawValue::Text(row.value_text.clone().unwrap_or_default())
            }
            ExtensionKind::Bytes => {
                RawValue::Bytes(row.value_bytes.clone().unwrap_or_default())
            }
            ExtensionKind::Integer | ExtensionKind::Uint => {
                RawValue::Integer(row.value_int.unwrap_or(0))
            }
            ExtensionKind::Float => RawValue::Float(row.value_float.unwrap_or(0.0)),
            ExtensionKind::Array | ExtensionKind::Map => {
                let bytes = row.value_bytes.as_deref().ok_or_else(|| {
                    Error::Validation(format!("missing data for extension {:?}", row.field_name))
                })?;
                RawValue::from_cbor(bytes)?
            }
        };

        ret.named.push(ExtensionEntry {
            name: row.field_name.clone(),
            json_tag: row.json_tag.clone(),
            cbor_tag: row.cbor_tag.clone(),
            kind,
            value,
        });
    }

    Ok(ret)
}

impl ExtensionValue {
    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO extensions (field_kind, field_name, json_tag, cbor_tag, \
             value_bytes, value_text, value_int, value_float, owner_id, owner_type) \
             VALUES ({})",
            d.placeholders(1, 10)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.field_kind.clone()),
                    BindValue::from(self.field_name.clone()),
                    BindValue::from(self.json_tag.clone()),
                    BindValue::from(self.cbor_tag.clone()),
                    BindValue::OptBlob(self.value_bytes.clone()),
                    BindValue::OptText(self.value_text.clone()),
                    BindValue::OptInt(self.value_int),
                    BindValue::OptFloat(self.value_float),
                    BindValue::from(self.owner_id),
                    BindValue::from(self.owner_type.clone()),
                ],
            )
            .await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        let sql = format!(
            "DELETE FROM extensions WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_owned(
        db: &Db,
        conn: &mut AnyConnection,
        owner_id: i64,
        owner_type: &str,
    ) -> Result<Vec<ExtensionValue>, Error> {
        let d = db.dialect();
        let sql = format!(
            "SELECT id, field_kind, field_name, json_tag, cbor_tag, value_bytes, \
             value_text, value_int, value_float, owner_id, owner_type \
             FROM extensions WHERE owner_id = {} AND owner_type = {} ORDER BY id",
            d.placeholder(1),
            d.placeholder(2)
        );

        let rows = db
            .fetch_all(
                conn,
                &sql,
                vec![BindValue::from(owner_id), BindValue::from(owner_type)],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ExtensionValue {
                    id: row.try_get("id")?,
                    field_kind: row.try_get("field_kind")?,
                    field_name: row.try_get("field_name")?,
                    json_tag: row.try_get("json_tag")?,
                    cbor_tag: row.try_get("cbor_tag")?,
                    value_bytes: row.try_get("value_bytes")?,
                    value_text: row.try_get("value_text")?,
                    value_int: row.try_get("value_int")?,
                    value_float: row.try_get("value_float")?,
                    owner_id: row.try_get("owner_id")?,
                    owner_type: row.try_get("owner_type")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn named_round_trip() {
        let mut exts = Extensions::new();
        exts.set("vendor-data", -72000, ExtensionKind::Bytes, RawValue::Bytes(vec![0x01, 0x02]))
            .unwrap();
        exts.set("weight", -72001, ExtensionKind::Float, RawValue::Float(0.5))
            .unwrap();
        exts.set(
            "labels",
            -72002,
            ExtensionKind::Array,
            RawValue::Array(vec![RawValue::Text("a".to_string())]),
        )
        .unwrap();

        let rows = extensions_from_token(&exts).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].field_kind, "bytes");
        assert_eq!(rows[0].value_bytes.as_deref(), Some(&[0x01, 0x02][..]));
        assert_eq!(rows[1].value_float, Some(0.5));
        // complex kinds are CBOR-encoded into value_bytes
        assert!(rows[2].value_bytes.is_some());

        let exts2 = extensions_to_token(&rows).unwrap();
        assert_eq!(exts2, exts);
    }

    #[test]
    fn cached_round_trip() {
        let mut exts = Extensions::new();
        exts.collect(&RawValue::Integer(-7), &RawValue::Text("opaque".to_string()))
            .unwrap();

        let rows = extensions_from_token(&exts).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_cached());
        assert_eq!(rows[0].json_tag, "-7");

        let exts2 = extensions_to_token(&rows).unwrap();
        assert_eq!(exts2, exts);
    }
}
