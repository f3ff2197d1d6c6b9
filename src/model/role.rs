// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::token::{ComidRole, CorimRole};

/// One role held by an entity, as its canonical string form (or the
/// `Role(<n>)` fallback for unknown codes).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleEntry {
    pub id: i64,

    pub role: String,

    pub entity_id: i64,
}

impl RoleEntry {
    pub fn new(role: &str) -> RoleEntry {
        RoleEntry {
            role: role.to_string(),
            ..Default::default()
        }
    }

    /// A role entry validated as a CoMID role.
    pub fn new_comid(role: &str) -> Result<RoleEntry, Error> {
        ComidRole::parse(role)?;
        Ok(RoleEntry::new(role))
    }

    /// A role entry validated as a CoRIM role.
    pub fn new_corim(role: &str) -> Result<RoleEntry, Error> {
        CorimRole::parse(role)?;
        Ok(RoleEntry::new(role))
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO roles (role, entity_id) VALUES ({})",
            d.placeholders(1, 2)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.role.clone()),
                    BindValue::from(self.entity_id),
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
            "DELETE FROM roles WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_entity(
        db: &Db,
        conn: &mut AnyConnection,
        entity_id: i64,
    ) -> Result<Vec<RoleEntry>, Error> {
        let sql = format!(
            "SELECT id, role, entity_id FROM roles WHERE entity_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(entity_id)])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(RoleEntry {
                    id: row.try_get("id")?,
                    role: row.try_get("role")?,
                    entity_id: row.try_get("entity_id")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validated_constructors() {
        assert_eq!(RoleEntry::new_comid("tagCreator").unwrap().role, "tagCreator");
        assert_eq!(RoleEntry::new_comid("Role(42)").unwrap().role, "Role(42)");
        assert!(RoleEntry::new_comid("manifestCreator").is_err());

        assert_eq!(
            RoleEntry::new_corim("manifestSigner").unwrap().role,
            "manifestSigner"
        );
        assert!(RoleEntry::new_corim("maintainer").is_err());
    }
}
