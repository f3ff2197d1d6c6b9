// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::environment::Environment;
use crate::model::measurement::{measurements_from_token, measurements_to_token, Measurement};
use crate::token;

pub const REFERENCE_VALUE_TRIPLE: &str = "reference";
pub const ENDORSED_VALUE_TRIPLE: &str = "endorsement";

/// A reference-value or endorsed-value triple. Both kinds share this
/// table, distinguished by `triple_type`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTriple {
    pub id: i64,

    pub environment_id: i64,
    pub environment: Option<Environment>,

    pub triple_type: String,
    pub is_active: bool,
    pub measurements: Vec<Measurement>,

    pub module_id: i64,
}

impl ValueTriple {
    pub fn from_token(origin: &token::ValueTriple, triple_type: &str) -> Result<ValueTriple, Error> {
        Ok(ValueTriple {
            environment: Some(
                Environment::from_token(&origin.environment)
                    .map_err(|e| Error::Validation(format!("environment: {e}")))?,
            ),
            triple_type: triple_type.to_string(),
            measurements: measurements_from_token(&origin.measurements)?,
            ..Default::default()
        })
    }

    pub fn to_token(&self) -> Result<token::ValueTriple, Error> {
        let environment = self
            .environment
            .as_ref()
            .ok_or_else(|| Error::Validation("environment not set".to_string()))?
            .to_token()
            .map_err(|e| Error::Validation(format!("environment: {e}")))?;

        Ok(token::ValueTriple {
            environment,
            measurements: measurements_to_token(&self.measurements)?,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.triple_type.is_empty() {
            return Err(Error::Validation("value triple type not set".to_string()));
        }

        let environment = self
            .environment
            .as_ref()
            .ok_or_else(|| Error::Validation("environment not set".to_string()))?;
        environment
            .validate()
            .map_err(|e| Error::Validation(format!("environment: {e}")))?;

        if self.measurements.is_empty() {
            return Err(Error::Validation("no measurements".to_string()));
        }

        Ok(())
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.validate()?;

        let environment = self
            .environment
            .as_mut()
            .ok_or_else(|| Error::Validation("environment not set".to_string()))?;
        environment.insert(db, conn).await?;
        self.environment_id = environment.id;

        let d = db.dialect();
        let sql = format!(
            "INSERT INTO value_triples (environment_id, type, is_active, module_id) \
             VALUES ({})",
            d.placeholders(1, 4)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.environment_id),
                    BindValue::from(self.triple_type.clone()),
                    BindValue::from(self.is_active),
                    BindValue::OptInt(if self.module_id == 0 {
                        None
                    } else {
                        Some(self.module_id)
                    }),
                ],
            )
            .await?;

        for (i, measurement) in self.measurements.iter_mut().enumerate() {
            measurement.owner_id = self.id;
            measurement.owner_type = "value_triple".to_string();

            measurement
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("measurement at index {i}: {e}")))?;
        }

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        if self.environment_id != 0 {
            let mut environment = Environment {
                id: self.environment_id,
                ..Default::default()
            };
            environment.select(db, conn).await?;
            self.environment = Some(environment);
        }

        self.measurements = Measurement::select_owned(db, conn, self.id, "value_triple").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, measurement) in self.measurements.iter().enumerate() {
            measurement
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("measurement at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM value_triples WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        if let Some(environment) = &self.environment {
            environment.delete_if_orphaned(db, conn).await?;
        }

        Ok(())
    }

    pub(crate) fn from_row(row: &sqlx::any::AnyRow) -> Result<ValueTriple, Error> {
        Ok(ValueTriple {
            id: row.try_get("id")?,
            environment_id: row
                .try_get::<Option<i64>, _>("environment_id")?
                .unwrap_or(0),
            environment: None,
            triple_type: row.try_get("type")?,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
            measurements: Vec::new(),
            module_id: row.try_get::<Option<i64>, _>("module_id")?.unwrap_or(0),
        })
    }

    pub async fn select_for_module(
        db: &Db,
        conn: &mut AnyConnection,
        module_id: i64,
    ) -> Result<Vec<ValueTriple>, Error> {
        let sql = format!(
            "SELECT id, environment_id, type, is_active, module_id FROM value_triples \
             WHERE module_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(module_id)])
            .await?;

        let mut ret: Vec<ValueTriple> = rows
            .iter()
            .map(ValueTriple::from_row)
            .collect::<Result<_, Error>>()?;

        for (i, triple) in ret.iter_mut().enumerate() {
            triple
                .select(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("value triple at index {i}: {e}")))?;
        }

        Ok(ret)
    }
}

pub(crate) fn value_triples_from_token(
    origin: &[token::ValueTriple],
    triple_type: &str,
) -> Result<Vec<ValueTriple>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, triple)| {
            ValueTriple::from_token(triple, triple_type).map_err(|e| {
                Error::Validation(format!(
                    "error converting {triple_type} value at index {i}: {e}"
                ))
            })
        })
        .collect()
}

pub fn value_triples_to_token(
    origin: &[ValueTriple],
    triple_type: &str,
) -> Result<Vec<token::ValueTriple>, Error> {
    origin
        .iter()
        .enumerate()
        .filter(|(_, triple)| triple.triple_type == triple_type)
        .map(|(i, triple)| {
            triple.to_token().map_err(|e| {
                Error::Validation(format!("could not convert value triple at index {i}: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{Class, ClassId, Mval, Version};

    fn sample_token_triple() -> token::ValueTriple {
        token::ValueTriple {
            environment: token::Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0xaa])),
                    ..Default::default()
                }),
                ..Default::default()
            },
            measurements: vec![token::Measurement {
                key: None,
                val: Mval {
                    version: Some(Version {
                        version: "1.0".to_string(),
                        scheme: 1,
                    }),
                    ..Default::default()
                },
                authorized_by: None,
            }],
        }
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_token_triple();

        let row = ValueTriple::from_token(&origin, REFERENCE_VALUE_TRIPLE).unwrap();
        assert_eq!(row.triple_type, "reference");
        assert!(!row.is_active);
        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn validation() {
        let row = ValueTriple::default();
        assert!(row.validate().is_err());

        let mut row = ValueTriple::from_token(&sample_token_triple(), ENDORSED_VALUE_TRIPLE).unwrap();
        row.measurements.clear();
        let err = row.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation error: no measurements");
    }

    #[test]
    fn split_by_type() {
        let rows = vec![
            ValueTriple::from_token(&sample_token_triple(), REFERENCE_VALUE_TRIPLE).unwrap(),
            ValueTriple::from_token(&sample_token_triple(), ENDORSED_VALUE_TRIPLE).unwrap(),
        ];

        assert_eq!(
            value_triples_to_token(&rows, REFERENCE_VALUE_TRIPLE)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            value_triples_to_token(&rows, ENDORSED_VALUE_TRIPLE)
                .unwrap()
                .len(),
            1
        );
    }
}
