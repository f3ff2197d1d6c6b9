// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::{infer_tag_id_type, TagIdType};
use crate::token::{self, TagId, TagRel};

/// A module tag's reference to another tag it supplements or replaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedTag {
    pub id: i64,

    pub linked_tag_id_type: String,
    pub linked_tag_id: String,
    pub tag_relation: String,

    pub module_id: i64,
}

impl LinkedTag {
    pub fn from_token(origin: &token::LinkedTag) -> Result<LinkedTag, Error> {
        let linked_tag_id = origin.linked_tag_id.to_string();

        let tag_relation = match origin.rel {
            TagRel::Supplements => "supplements",
            TagRel::Replaces => "replaces",
        };

        Ok(LinkedTag {
            linked_tag_id_type: infer_tag_id_type(&linked_tag_id).as_str().to_string(),
            linked_tag_id,
            tag_relation: tag_relation.to_string(),
            ..Default::default()
        })
    }

    pub fn to_token(&self) -> Result<token::LinkedTag, Error> {
        let linked_tag_id = match TagIdType::parse(&self.linked_tag_id_type)? {
            TagIdType::String => TagId::from(self.linked_tag_id.as_str()),
            TagIdType::Uuid => {
                let uuid = uuid::Uuid::parse_str(&self.linked_tag_id)
                    .map_err(|e| Error::invalid("linked tag ID", e.to_string()))?;
                TagId::from(uuid)
            }
        };

        let rel = match self.tag_relation.as_str() {
            "supplements" => TagRel::Supplements,
            "replaces" => TagRel::Replaces,
            other => {
                return Err(Error::Validation(format!(
                    "unexpected tag relation: {other}"
                )))
            }
        };

        Ok(token::LinkedTag {
            linked_tag_id,
            rel,
        })
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO linked_tags (linked_tag_id_type, linked_tag_id, tag_relation, \
             module_id) VALUES ({})",
            d.placeholders(1, 4)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.linked_tag_id_type.clone()),
                    BindValue::from(self.linked_tag_id.clone()),
                    BindValue::from(self.tag_relation.clone()),
                    BindValue::from(self.module_id),
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
            "DELETE FROM linked_tags WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_module(
        db: &Db,
        conn: &mut AnyConnection,
        module_id: i64,
    ) -> Result<Vec<LinkedTag>, Error> {
        let sql = format!(
            "SELECT id, linked_tag_id_type, linked_tag_id, tag_relation, module_id \
             FROM linked_tags WHERE module_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(module_id)])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(LinkedTag {
                    id: row.try_get("id")?,
                    linked_tag_id_type: row.try_get("linked_tag_id_type")?,
                    linked_tag_id: row.try_get("linked_tag_id")?,
                    tag_relation: row.try_get("tag_relation")?,
                    module_id: row.try_get("module_id")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_round_trip() {
        let origin = token::LinkedTag {
            linked_tag_id: TagId::from("other-tag"),
            rel: TagRel::Replaces,
        };

        let row = LinkedTag::from_token(&origin).unwrap();
        assert_eq!(row.linked_tag_id_type, "string");
        assert_eq!(row.tag_relation, "replaces");
        assert_eq!(row.to_token().unwrap(), origin);

        let uuid = uuid::Uuid::parse_str("31fb5abf-023e-4992-aa4e-95f9c1503bfa").unwrap();
        let origin = token::LinkedTag {
            linked_tag_id: TagId::from(uuid),
            rel: TagRel::Supplements,
        };

        let row = LinkedTag::from_token(&origin).unwrap();
        assert_eq!(row.linked_tag_id_type, "uuid");
        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn bad_relation() {
        let row = LinkedTag {
            linked_tag_id_type: "string".to_string(),
            linked_tag_id: "x".to_string(),
            tag_relation: "clones".to_string(),
            ..Default::default()
        };

        let err = row.to_token().unwrap_err();
        assert!(err.to_string().contains("unexpected tag relation"));
    }
}
