// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::extension::{extensions_from_token, extensions_to_token, ExtensionValue};
use crate::model::role::RoleEntry;
use crate::token;

/// An entity row, owned by a manifest or a module tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pub id: i64,

    pub name_type: String,
    pub name: String,
    pub uri: String,

    pub role_entries: Vec<RoleEntry>,

    pub owner_id: i64,
    pub owner_type: String,

    pub extensions: Vec<ExtensionValue>,
}

impl Entity {
    pub fn from_comid(origin: &token::ComidEntity) -> Result<Entity, Error> {
        Ok(Entity {
            name_type: "string".to_string(),
            name: origin.name.clone(),
            uri: origin.reg_id.clone().unwrap_or_default(),
            role_entries: origin
                .roles
                .iter()
                .map(|role| RoleEntry::new(&role.to_string()))
                .collect(),
            extensions: extensions_from_token(&origin.extensions)?,
            ..Default::default()
        })
    }

    pub fn to_comid(&self) -> Result<token::ComidEntity, Error> {
        let mut roles = Vec::with_capacity(self.role_entries.len());
        for entry in &self.role_entries {
            roles.push(token::ComidRole::parse(&entry.role)?);
        }

        Ok(token::ComidEntity {
            name: self.name.clone(),
            reg_id: if self.uri.is_empty() {
                None
            } else {
                Some(self.uri.clone())
            },
            roles,
            extensions: extensions_to_token(&self.extensions)?,
        })
    }

    pub fn from_corim(origin: &token::CorimEntity) -> Result<Entity, Error> {
        Ok(Entity {
            name_type: "string".to_string(),
            name: origin.name.clone(),
            uri: origin.reg_id.clone().unwrap_or_default(),
            role_entries: origin
                .roles
                .iter()
                .map(|role| RoleEntry::new(&role.to_string()))
                .collect(),
            extensions: extensions_from_token(&origin.extensions)?,
            ..Default::default()
        })
    }

    pub fn to_corim(&self) -> Result<token::CorimEntity, Error> {
        let mut roles = Vec::with_capacity(self.role_entries.len());
        for entry in &self.role_entries {
            roles.push(token::CorimRole::parse(&entry.role)?);
        }

        Ok(token::CorimEntity {
            name: self.name.clone(),
            reg_id: if self.uri.is_empty() {
                None
            } else {
                Some(self.uri.clone())
            },
            roles,
            extensions: extensions_to_token(&self.extensions)?,
        })
    }

    pub fn roles(&self) -> Vec<String> {
        self.role_entries
            .iter()
            .map(|entry| entry.role.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.role_entries.is_empty() {
            return Err(Error::Validation("no roles".to_string()));
        }

        Ok(())
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO entities (name_type, name, uri, owner_id, owner_type) VALUES ({})",
            d.placeholders(1, 5)
        );

        let uri = if self.uri.is_empty() {
            None
        } else {
            Some(self.uri.clone())
        };

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.name_type.clone()),
                    BindValue::from(self.name.clone()),
                    BindValue::OptText(uri),
                    BindValue::from(self.owner_id),
                    BindValue::from(self.owner_type.clone()),
                ],
            )
            .await?;

        for (i, entry) in self.role_entries.iter_mut().enumerate() {
            entry.entity_id = self.id;

            entry
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting role at index {i}: {e}")))?;
        }

        for ext in self.extensions.iter_mut() {
            ext.owner_id = self.id;
            ext.owner_type = "entity".to_string();

            ext.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting extension: {e}")))?;
        }

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        self.role_entries = RoleEntry::select_for_entity(db, conn, self.id).await?;
        self.extensions = ExtensionValue::select_owned(db, conn, self.id, "entity").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, ext) in self.extensions.iter().enumerate() {
            ext.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("extension at index {i}: {e}")))?;
        }

        for (i, entry) in self.role_entries.iter().enumerate() {
            entry
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("role at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM entities WHERE id = {}",
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
    ) -> Result<Vec<Entity>, Error> {
        let d = db.dialect();
        let sql = format!(
            "SELECT id, name_type, name, uri, owner_id, owner_type FROM entities \
             WHERE owner_id = {} AND owner_type = {} ORDER BY id",
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

        let mut ret: Vec<Entity> = rows
            .iter()
            .map(|row| {
                Ok(Entity {
                    id: row.try_get("id")?,
                    name_type: row.try_get("name_type")?,
                    name: row.try_get("name")?,
                    uri: row.try_get::<Option<String>, _>("uri")?.unwrap_or_default(),
                    role_entries: Vec::new(),
                    owner_id: row.try_get("owner_id")?,
                    owner_type: row.try_get("owner_type")?,
                    extensions: Vec::new(),
                })
            })
            .collect::<Result<_, Error>>()?;

        for (i, entity) in ret.iter_mut().enumerate() {
            entity
                .select(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))?;
        }

        Ok(ret)
    }
}

pub(crate) fn comid_entities_from_token(
    origin: &[token::ComidEntity],
) -> Result<Vec<Entity>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, entity)| {
            Entity::from_comid(entity)
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))
        })
        .collect()
}

pub(crate) fn corim_entities_from_token(
    origin: &[token::CorimEntity],
) -> Result<Vec<Entity>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, entity)| {
            Entity::from_corim(entity)
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{ComidEntity, Extensions, ROLE_CREATOR, ROLE_TAG_CREATOR};

    #[test]
    fn comid_round_trip() {
        let origin = ComidEntity {
            name: "ACME Ltd.".to_string(),
            reg_id: Some("https://acme.example".to_string()),
            roles: vec![ROLE_TAG_CREATOR, ROLE_CREATOR],
            extensions: Extensions::new(),
        };

        let row = Entity::from_comid(&origin).unwrap();
        assert_eq!(row.name, "ACME Ltd.");
        assert_eq!(row.roles(), vec!["tagCreator", "creator"]);
        assert_eq!(row.to_comid().unwrap(), origin);
    }

    #[test]
    fn validate_requires_roles() {
        let row = Entity {
            name: "ACME".to_string(),
            ..Default::default()
        };

        let err = row.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation error: no roles");
    }
}
