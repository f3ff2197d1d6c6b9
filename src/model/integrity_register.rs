// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::digest::{digests_from_token, digests_to_token, Digest};
use crate::token::{IntegrityRegisters, RegisterIndex};

/// One integrity register: a numeric or textual index owning digests.
/// Exactly one of the index columns is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityRegister {
    pub id: i64,

    pub index_uint: Option<i64>,
    pub index_text: Option<String>,

    pub digests: Vec<Digest>,

    pub measurement_id: i64,
}

impl IntegrityRegister {
    /// The index as a string: the textual index, the numeric index
    /// formatted, or "nil" when neither is set.
    pub fn string_index(&self) -> String {
        if let Some(text) = &self.index_text {
            text.clone()
        } else if let Some(val) = self.index_uint {
            val.to_string()
        } else {
            "nil".to_string()
        }
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO integrity_registers (index_uint, index_text, measurement_id) \
             VALUES ({})",
            d.placeholders(1, 3)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::OptInt(self.index_uint),
                    BindValue::OptText(self.index_text.clone()),
                    BindValue::from(self.measurement_id),
                ],
            )
            .await?;

        for (i, digest) in self.digests.iter_mut().enumerate() {
            digest.owner_id = self.id;
            digest.owner_type = "integrity_register".to_string();

            digest
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting digest {i}: {e}")))?;
        }

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        self.digests = Digest::select_owned(db, conn, self.id, "integrity_register").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, digest) in self.digests.iter().enumerate() {
            digest
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("digest at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM integrity_registers WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_measurement(
        db: &Db,
        conn: &mut AnyConnection,
        measurement_id: i64,
    ) -> Result<Vec<IntegrityRegister>, Error> {
        let sql = format!(
            "SELECT id, index_uint, index_text, measurement_id FROM integrity_registers \
             WHERE measurement_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(measurement_id)])
            .await?;

        let mut ret: Vec<IntegrityRegister> = rows
            .iter()
            .map(|row| {
                Ok(IntegrityRegister {
                    id: row.try_get("id")?,
                    index_uint: row.try_get("index_uint")?,
                    index_text: row.try_get("index_text")?,
                    digests: Vec::new(),
                    measurement_id: row.try_get("measurement_id")?,
                })
            })
            .collect::<Result<_, Error>>()?;

        for register in &mut ret {
            register.select(db, conn).await?;
        }

        Ok(ret)
    }
}

pub(crate) fn integrity_registers_from_token(
    origin: Option<&IntegrityRegisters>,
) -> Vec<IntegrityRegister> {
    let origin = match origin {
        Some(v) => v,
        None => return Vec::new(),
    };

    origin
        .entries
        .iter()
        .map(|(index, digests)| {
            let mut ret = IntegrityRegister {
                digests: digests_from_token(digests),
                ..Default::default()
            };

            match index {
                RegisterIndex::Uint(v) => ret.index_uint = Some(*v as i64),
                RegisterIndex::Text(s) => ret.index_text = Some(s.clone()),
            }

            ret
        })
        .collect()
}

pub(crate) fn integrity_registers_to_token(
    origin: &[IntegrityRegister],
) -> Result<Option<IntegrityRegisters>, Error> {
    if origin.is_empty() {
        return Ok(None);
    }

    let mut ret = IntegrityRegisters::default();

    for register in origin {
        let index = match (&register.index_uint, &register.index_text) {
            (Some(u), Some(t)) => {
                return Err(Error::Validation(format!(
                    "both uint and string indices are set: {u}, {t} (ID {id})",
                    id = register.id
                )))
            }
            (Some(u), None) => RegisterIndex::Uint(*u as u64),
            (None, Some(t)) => RegisterIndex::Text(t.clone()),
            (None, None) => {
                return Err(Error::Validation(format!(
                    "neither index set at ID {id}",
                    id = register.id
                )))
            }
        };

        if register.digests.is_empty() {
            return Err(Error::Validation(format!(
                "no digests for index {}",
                register.string_index()
            )));
        }

        ret.entries
            .push((index, digests_to_token(&register.digests)));
    }

    Ok(Some(ret))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::HashEntry;

    #[test]
    fn token_round_trip() {
        let origin = IntegrityRegisters {
            entries: vec![
                (RegisterIndex::Uint(0), vec![HashEntry::new(1, vec![0xaa])]),
                (
                    RegisterIndex::Text("rim".to_string()),
                    vec![HashEntry::new(8, vec![0xbb])],
                ),
            ],
        };

        let rows = integrity_registers_from_token(Some(&origin));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index_uint, Some(0));
        assert_eq!(rows[0].string_index(), "0");
        assert_eq!(rows[1].index_text.as_deref(), Some("rim"));

        let back = integrity_registers_to_token(&rows).unwrap();
        assert_eq!(back, Some(origin));
    }

    #[test]
    fn bad_indices() {
        let register = IntegrityRegister {
            index_uint: Some(1),
            index_text: Some("pcr".to_string()),
            digests: vec![Digest::new(1, vec![0x01])],
            ..Default::default()
        };
        assert!(integrity_registers_to_token(&[register]).is_err());

        let register = IntegrityRegister {
            digests: vec![Digest::new(1, vec![0x01])],
            ..Default::default()
        };
        assert!(integrity_registers_to_token(&[register]).is_err());
        assert_eq!(
            IntegrityRegister::default().string_index(),
            "nil".to_string()
        );

        let register = IntegrityRegister {
            index_uint: Some(1),
            ..Default::default()
        };
        let err = integrity_registers_to_token(&[register]).unwrap_err();
        assert!(err.to_string().contains("no digests"));
    }
}
