// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::token::FlagsMap;

/// One boolean flag of a measurement. Code points 0-9 are the named
/// flags; anything else is an extension flag (negative allowed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flag {
    pub id: i64,

    pub code_point: i64,
    pub value: bool,

    pub measurement_id: i64,
}

impl Flag {
    pub fn new(code_point: i64, value: bool) -> Flag {
        Flag {
            code_point,
            value,
            ..Default::default()
        }
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO flags (code_point, value, measurement_id) VALUES ({})",
            d.placeholders(1, 3)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.code_point),
                    BindValue::from(self.value),
                    BindValue::from(self.measurement_id),
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
            "DELETE FROM flags WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_measurement(
        db: &Db,
        conn: &mut AnyConnection,
        measurement_id: i64,
    ) -> Result<Vec<Flag>, Error> {
        let sql = format!(
            "SELECT id, code_point, value, measurement_id FROM flags \
             WHERE measurement_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(measurement_id)])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Flag {
                    id: row.try_get("id")?,
                    code_point: row.try_get("code_point")?,
                    value: row.try_get::<i64, _>("value")? != 0,
                    measurement_id: row.try_get("measurement_id")?,
                })
            })
            .collect()
    }
}

pub fn flags_from_token(origin: Option<&FlagsMap>) -> Vec<Flag> {
    let origin = match origin {
        Some(v) => v,
        None => return Vec::new(),
    };

    let mut ret = Vec::new();

    for (code_point, value) in origin.named() {
        if let Some(value) = value {
            ret.push(Flag::new(code_point, value));
        }
    }

    for (code_point, value) in &origin.extensions {
        ret.push(Flag::new(*code_point, *value));
    }

    ret
}

pub fn flags_to_token(origin: &[Flag]) -> Option<FlagsMap> {
    if origin.is_empty() {
        return None;
    }

    let mut ret = FlagsMap::default();

    for flag in origin {
        if ret.set_named(flag.code_point, flag.value).is_err() {
            ret.extensions.push((flag.code_point, flag.value));
        }
    }

    Some(ret)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_round_trip() {
        let mut flags = FlagsMap::default();
        flags.is_secure = Some(true);
        flags.is_debug = Some(false);
        flags.extensions.push((-3, true));

        let rows = flags_from_token(Some(&flags));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], Flag::new(1, true));
        assert_eq!(rows[1], Flag::new(3, false));
        assert_eq!(rows[2], Flag::new(-3, true));

        assert_eq!(flags_to_token(&rows), Some(flags));
    }

    #[test]
    fn empty() {
        assert!(flags_from_token(None).is_empty());
        assert_eq!(flags_to_token(&[]), None);
    }
}
