// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::token::HashEntry;

/// One digest row, owned polymorphically (measurement, locator thumbprint,
/// integrity register).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Digest {
    pub id: i64,

    pub alg_id: i64,
    pub value: Vec<u8>,

    pub owner_id: i64,
    pub owner_type: String,
}

impl Digest {
    pub fn new(alg_id: i64, value: Vec<u8>) -> Digest {
        Digest {
            alg_id,
            value,
            ..Default::default()
        }
    }

    pub fn from_token(origin: &HashEntry) -> Digest {
        Digest::new(origin.alg_id as i64, origin.value.clone())
    }

    pub fn to_token(&self) -> HashEntry {
        HashEntry::new(self.alg_id as u64, self.value.clone())
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO digests (alg_id, value, owner_id, owner_type) VALUES ({})",
            d.placeholders(1, 4)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.alg_id),
                    BindValue::from(self.value.clone()),
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
            "DELETE FROM digests WHERE id = {}",
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
    ) -> Result<Vec<Digest>, Error> {
        let d = db.dialect();
        let sql = format!(
            "SELECT id, alg_id, value, owner_id, owner_type FROM digests \
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

        rows.iter()
            .map(|row| {
                Ok(Digest {
                    id: row.try_get("id")?,
                    alg_id: row.try_get("alg_id")?,
                    value: row.try_get("value")?,
                    owner_id: row.try_get("owner_id")?,
                    owner_type: row.try_get("owner_type")?,
                })
            })
            .collect()
    }
}

pub(crate) fn digests_from_token(origin: &[HashEntry]) -> Vec<Digest> {
    origin.iter().map(Digest::from_token).collect()
}

pub(crate) fn digests_to_token(origin: &[Digest]) -> Vec<HashEntry> {
    origin.iter().map(Digest::to_token).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_round_trip() {
        let entry = HashEntry::new(1, vec![0xde, 0xad]);
        let digest = Digest::from_token(&entry);

        assert_eq!(digest.alg_id, 1);
        assert_eq!(digest.to_token(), entry);
    }
}
