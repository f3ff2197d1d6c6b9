// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db, Dialect};
use crate::error::Error;
use crate::token::{self, decode_oid};

/// A deduplicated attesting-environment row.
///
/// There is a 1-to-1 correspondence between an environment and its class,
/// so the class is collapsed into this row to avoid a needless join. Rows
/// are unique under the full column tuple; see [`Environment::insert`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub id: i64,

    pub class_type: Option<String>,
    pub class_bytes: Option<Vec<u8>>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub layer: Option<i64>,
    pub index: Option<i64>,

    pub instance_type: Option<String>,
    pub instance_bytes: Option<Vec<u8>>,

    pub group_type: Option<String>,
    pub group_bytes: Option<Vec<u8>>,
}

impl Environment {
    pub fn from_token(origin: &token::Environment) -> Result<Environment, Error> {
        let mut ret = Environment::default();

        if let Some(class) = &origin.class {
            if let Some(class_id) = &class.class_id {
                ret.class_type = Some(class_id.type_name());
                ret.class_bytes = Some(class_id.store_bytes());
            }

            ret.vendor = class.vendor.clone();
            ret.model = class.model.clone();
            ret.layer = class.layer.map(|v| v as i64);
            ret.index = class.index.map(|v| v as i64);
        }

        if let Some(instance) = &origin.instance {
            ret.instance_type = Some(instance.type_name());
            ret.instance_bytes = Some(instance.store_bytes());
        }

        if let Some(group) = &origin.group {
            ret.group_type = Some(group.type_name());
            ret.group_bytes = Some(group.store_bytes());
        }

        Ok(ret)
    }

    pub fn to_token(&self) -> Result<token::Environment, Error> {
        let mut ret = token::Environment::default();

        let mut class = token::Class {
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            layer: self.layer.map(|v| v as u64),
            index: self.index.map(|v| v as u64),
            class_id: None,
        };

        if let Some(class_type) = &self.class_type {
            let bytes = self
                .class_bytes
                .as_deref()
                .ok_or_else(|| Error::Validation("missing class ID data".to_string()))?;

            class.class_id = Some(token::ClassId::from_parts(class_type, bytes)?);
        }

        if !class.is_empty() {
            ret.class = Some(class);
        }

        if let Some(instance_type) = &self.instance_type {
            let bytes = self
                .instance_bytes
                .as_deref()
                .ok_or_else(|| Error::Validation("missing instance data".to_string()))?;

            ret.instance = Some(token::InstanceId::from_parts(instance_type, bytes)?);
        }

        if let Some(group_type) = &self.group_type {
            let bytes = self
                .group_bytes
                .as_deref()
                .ok_or_else(|| Error::Validation("missing group data".to_string()))?;

            ret.group = Some(token::GroupId::from_parts(group_type, bytes)?);
        }

        Ok(ret)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.class_type.is_none() != self.class_bytes.is_none() {
            return Err(Error::NullMismatch(
                "class_type and class_bytes".to_string(),
            ));
        }

        if self.instance_type.is_none() != self.instance_bytes.is_none() {
            return Err(Error::NullMismatch(
                "instance_type and instance_bytes".to_string(),
            ));
        }

        if self.group_type.is_none() != self.group_bytes.is_none() {
            return Err(Error::NullMismatch(
                "group_type and group_bytes".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.class_type.is_none()
            && self.class_bytes.is_none()
            && self.vendor.is_none()
            && self.model.is_none()
            && self.layer.is_none()
            && self.index.is_none()
            && self.instance_type.is_none()
            && self.instance_bytes.is_none()
            && self.group_type.is_none()
            && self.group_bytes.is_none()
    }

    /// Content-addressed insert: if a row equal under the full tuple
    /// (treating NULL as equal to NULL) already exists, its id is adopted
    /// and no new row is created.
    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.validate()?;

        let d = db.dialect();
        let (conditions, binds) = environment_match_conditions(self, true, d, 1);

        let sql = if conditions.is_empty() {
            "SELECT id FROM environments".to_string()
        } else {
            format!(
                "SELECT id FROM environments WHERE {}",
                conditions.join(" AND ")
            )
        };

        if let Some(row) = db.fetch_optional(conn, &sql, binds).await? {
            self.id = row.try_get("id")?;
            return Ok(());
        }

        let index_col = d.quote("index");
        let sql = format!(
            "INSERT INTO environments (class_type, class_bytes, vendor, model, layer, \
             {index_col}, instance_type, instance_bytes, group_type, group_bytes) \
             VALUES ({})",
            d.placeholders(1, 10)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::OptText(self.class_type.clone()),
                    BindValue::OptBlob(self.class_bytes.clone()),
                    BindValue::OptText(self.vendor.clone()),
                    BindValue::OptText(self.model.clone()),
                    BindValue::OptInt(self.layer),
                    BindValue::OptInt(self.index),
                    BindValue::OptText(self.instance_type.clone()),
                    BindValue::OptBlob(self.instance_bytes.clone()),
                    BindValue::OptText(self.group_type.clone()),
                    BindValue::OptBlob(self.group_bytes.clone()),
                ],
            )
            .await?;

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        let d = db.dialect();
        let index_col = d.quote("index");
        let sql = format!(
            "SELECT id, class_type, class_bytes, vendor, model, layer, {index_col} AS env_index, \
             instance_type, instance_bytes, group_type, group_bytes \
             FROM environments WHERE id = {}",
            d.placeholder(1)
        );

        let row = db
            .fetch_optional(conn, &sql, vec![BindValue::from(self.id)])
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        *self = Environment::from_row(&row)?;

        Ok(())
    }

    pub(crate) fn from_row(row: &sqlx::any::AnyRow) -> Result<Environment, Error> {
        Ok(Environment {
            id: row.try_get("id")?,
            class_type: row.try_get("class_type")?,
            class_bytes: row.try_get("class_bytes")?,
            vendor: row.try_get("vendor")?,
            model: row.try_get("model")?,
            layer: row.try_get("layer")?,
            index: row.try_get("env_index")?,
            instance_type: row.try_get("instance_type")?,
            instance_bytes: row.try_get("instance_bytes")?,
            group_type: row.try_get("group_type")?,
            group_bytes: row.try_get("group_bytes")?,
        })
    }

    /// Delete this environment unless a value or key triple still
    /// references it. "Not orphaned" and "already gone" are both success.
    pub async fn delete_if_orphaned(
        &self,
        db: &Db,
        conn: &mut AnyConnection,
    ) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        let d = db.dialect();

        for table in ["key_triples", "value_triples"] {
            let sql = format!(
                "SELECT id FROM {table} WHERE environment_id = {}",
                d.placeholder(1)
            );

            let rows = db
                .fetch_all(conn, &sql, vec![BindValue::from(self.id)])
                .await
                .map_err(|e| {
                    Error::Validation(format!(
                        "error getting environment owners from {table:?}: {e}"
                    ))
                })?;

            if !rows.is_empty() {
                // not orphaned, so don't delete
                return Ok(());
            }
        }

        let sql = format!(
            "DELETE FROM environments WHERE id = {}",
            d.placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    /// Human-readable (label, value) pairs for CLI rendering.
    pub fn render_parts(&self) -> Result<Vec<(String, String)>, Error> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        self.validate()?;

        let mut ret = Vec::new();

        if let Some(vendor) = &self.vendor {
            if !vendor.is_empty() {
                ret.push(("vendor".to_string(), vendor.clone()));
            }
        }

        if let Some(model) = &self.model {
            if !model.is_empty() {
                ret.push(("model".to_string(), model.clone()));
            }
        }

        if let Some(bytes) = &self.class_bytes {
            let val = match self.class_type.as_deref() {
                Some("oid") => decode_oid(bytes)?,
                Some("uuid") => render_uuid(bytes)?,
                _ => hex::encode(bytes),
            };

            ret.push(("class".to_string(), val));
        }

        if let Some(bytes) = &self.instance_bytes {
            let val = match self.instance_type.as_deref() {
                Some("oid") => decode_oid(bytes)?,
                Some("uuid") => render_uuid(bytes)?,
                _ => hex::encode(bytes),
            };

            ret.push(("instance".to_string(), val));
        }

        if let Some(bytes) = &self.group_bytes {
            let val = match self.group_type.as_deref() {
                Some("oid") => decode_oid(bytes)?,
                Some("uuid") => render_uuid(bytes)?,
                _ => hex::encode(bytes),
            };

            ret.push(("group".to_string(), val));
        }

        if let Some(index) = self.index {
            ret.push(("index".to_string(), index.to_string()));
        }

        Ok(ret)
    }
}

fn render_uuid(bytes: &[u8]) -> Result<String, Error> {
    uuid::Uuid::from_slice(bytes)
        .map(|u| u.to_string())
        .map_err(|e| Error::invalid("UUID", e.to_string()))
}

/// Build the WHERE conditions matching an environment probe. Columns set
/// on the probe must match exactly; unset columns match anything, or only
/// NULL when `exact` is true. Placeholders are numbered from `start`.
pub fn environment_match_conditions(
    env: &Environment,
    exact: bool,
    dialect: Dialect,
    start: usize,
) -> (Vec<String>, Vec<BindValue>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    let mut n = start;

    let mut push = |column: &str, bind: Option<BindValue>| match bind {
        Some(bind) => {
            conditions.push(format!("{column} = {}", dialect.placeholder(n)));
            binds.push(bind);
            n += 1;
        }
        None => {
            if exact {
                conditions.push(format!("{column} IS NULL"));
            }
        }
    };

    push(
        "class_type",
        env.class_type.clone().map(BindValue::Text),
    );
    push(
        "class_bytes",
        env.class_bytes.clone().map(BindValue::Blob),
    );
    push("vendor", env.vendor.clone().map(BindValue::Text));
    push("model", env.model.clone().map(BindValue::Text));
    push("layer", env.layer.map(BindValue::Int));
    push(&dialect.quote("index"), env.index.map(BindValue::Int));
    push(
        "instance_type",
        env.instance_type.clone().map(BindValue::Text),
    );
    push(
        "instance_bytes",
        env.instance_bytes.clone().map(BindValue::Blob),
    );
    push(
        "group_type",
        env.group_type.clone().map(BindValue::Text),
    );
    push(
        "group_bytes",
        env.group_bytes.clone().map(BindValue::Blob),
    );

    (conditions, binds)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{Class, ClassId, GroupId, InstanceId};

    fn sample_token_env() -> token::Environment {
        token::Environment {
            class: Some(Class {
                class_id: Some(ClassId::Bytes(vec![0xde, 0xad])),
                vendor: Some("acme".to_string()),
                model: Some("roadrunner".to_string()),
                layer: Some(0),
                index: Some(1),
            }),
            instance: Some(InstanceId::Ueid(vec![0x01, 0x02, 0x03])),
            group: Some(GroupId::Bytes(vec![0xbb])),
        }
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_token_env();

        let row = Environment::from_token(&origin).unwrap();
        assert_eq!(row.class_type.as_deref(), Some("bytes"));
        assert_eq!(row.vendor.as_deref(), Some("acme"));
        assert_eq!(row.instance_type.as_deref(), Some("ueid"));

        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn validate_null_pairs() {
        let row = Environment {
            class_type: Some("bytes".to_string()),
            ..Default::default()
        };
        let err = row.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "class_type and class_bytes must be set together"
        );

        let row = Environment {
            instance_bytes: Some(vec![0x01]),
            ..Default::default()
        };
        assert!(row.validate().is_err());

        assert!(Environment::default().validate().is_ok());
    }

    #[test]
    fn match_conditions_exact() {
        let probe = Environment {
            vendor: Some("acme".to_string()),
            ..Default::default()
        };

        let (conditions, binds) =
            environment_match_conditions(&probe, true, Dialect::Sqlite, 1);
        assert_eq!(conditions.len(), 10);
        assert_eq!(binds.len(), 1);
        assert!(conditions.contains(&"vendor = ?".to_string()));
        assert!(conditions.contains(&"class_type IS NULL".to_string()));
        assert!(conditions.contains(&"\"index\" IS NULL".to_string()));
    }

    #[test]
    fn match_conditions_loose() {
        let probe = Environment {
            vendor: Some("acme".to_string()),
            instance_bytes: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        };

        let (conditions, binds) =
            environment_match_conditions(&probe, false, Dialect::Postgres, 1);
        assert_eq!(
            conditions,
            vec!["vendor = $1".to_string(), "instance_bytes = $2".to_string()]
        );
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn render_parts() {
        let row = Environment {
            vendor: Some("acme".to_string()),
            class_type: Some("oid".to_string()),
            class_bytes: Some(vec![0x55, 0x04, 0x03]),
            index: Some(3),
            ..Default::default()
        };

        let parts = row.render_parts().unwrap();
        assert_eq!(
            parts,
            vec![
                ("vendor".to_string(), "acme".to_string()),
                ("class".to_string(), "2.5.4.3".to_string()),
                ("index".to_string(), "3".to_string()),
            ]
        );

        assert!(Environment::default().render_parts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dedup_insert() {
        let db = Db::open("sqlite", "sqlite::memory:", false).await.unwrap();
        let migrator = crate::migrations::Migrator::new(&db);
        migrator.init().await.unwrap();
        migrator.migrate().await.unwrap();

        let mut conn = db.acquire().await.unwrap();

        let mut first = Environment {
            vendor: Some("acme".to_string()),
            instance_type: Some("bytes".to_string()),
            instance_bytes: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        };
        first.insert(&db, &mut conn).await.unwrap();
        assert_ne!(first.id, 0);

        let mut second = Environment {
            vendor: Some("acme".to_string()),
            instance_type: Some("bytes".to_string()),
            instance_bytes: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        };
        second.insert(&db, &mut conn).await.unwrap();
        assert_eq!(second.id, first.id);

        // a distinct environment gets its own row
        let mut third = Environment {
            vendor: Some("acme".to_string()),
            group_type: Some("bytes".to_string()),
            group_bytes: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        };
        third.insert(&db, &mut conn).await.unwrap();
        assert_ne!(third.id, first.id);

        let rows = db
            .fetch_all(&mut conn, "SELECT COUNT(*) FROM environments", vec![])
            .await
            .unwrap();
        let count: i64 = rows[0].try_get(0).unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn orphan_collection() {
        let db = Db::open("sqlite", "sqlite::memory:", false).await.unwrap();
        let migrator = crate::migrations::Migrator::new(&db);
        migrator.init().await.unwrap();
        migrator.migrate().await.unwrap();

        let mut conn = db.acquire().await.unwrap();

        let mut env = Environment {
            vendor: Some("acme".to_string()),
            ..Default::default()
        };
        env.insert(&db, &mut conn).await.unwrap();

        // simulate a referencing triple
        let sql = format!(
            "INSERT INTO key_triples (environment_id, type, is_active, module_id) \
             VALUES ({})",
            db.dialect().placeholders(1, 4)
        );
        db.execute(
            &mut conn,
            &sql,
            vec![
                BindValue::from(env.id),
                BindValue::from("attest"),
                BindValue::from(false),
                BindValue::OptInt(None),
            ],
        )
        .await
        .unwrap();

        env.delete_if_orphaned(&db, &mut conn).await.unwrap();
        let rows = db
            .fetch_all(&mut conn, "SELECT id FROM environments", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        db.execute(&mut conn, "DELETE FROM key_triples", vec![])
            .await
            .unwrap();

        env.delete_if_orphaned(&db, &mut conn).await.unwrap();
        let rows = db
            .fetch_all(&mut conn, "SELECT id FROM environments", vec![])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
