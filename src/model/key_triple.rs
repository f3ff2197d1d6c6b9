// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::crypto_key::{crypto_keys_from_token, crypto_keys_to_token, CryptoKey};
use crate::model::environment::Environment;
use crate::token;

pub const ATTEST_KEY_TRIPLE: &str = "attest";
pub const IDENTITY_KEY_TRIPLE: &str = "identity";

/// An attest-verification-key or device-identity-key triple. Both kinds
/// share this table, distinguished by `triple_type`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyTriple {
    pub id: i64,

    pub environment_id: i64,
    pub environment: Option<Environment>,

    pub triple_type: String,
    pub key_list: Vec<CryptoKey>,
    pub authorized_by: Vec<CryptoKey>,

    pub is_active: bool,

    pub module_id: i64,
}

impl KeyTriple {
    pub fn from_token(origin: &token::KeyTriple, triple_type: &str) -> Result<KeyTriple, Error> {
        Ok(KeyTriple {
            environment: Some(
                Environment::from_token(&origin.environment)
                    .map_err(|e| Error::Validation(format!("environment: {e}")))?,
            ),
            triple_type: triple_type.to_string(),
            key_list: crypto_keys_from_token(&origin.verif_keys),
            ..Default::default()
        })
    }

    pub fn to_token(&self) -> Result<token::KeyTriple, Error> {
        let environment = self
            .environment
            .as_ref()
            .ok_or_else(|| Error::Validation("environment not set".to_string()))?
            .to_token()
            .map_err(|e| Error::Validation(format!("environment: {e}")))?;

        Ok(token::KeyTriple {
            environment,
            verif_keys: crypto_keys_to_token(&self.key_list)
                .map_err(|e| Error::Validation(format!("key list: {e}")))?,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.triple_type.is_empty() {
            return Err(Error::Validation("key triple type not set".to_string()));
        }

        let environment = self
            .environment
            .as_ref()
            .ok_or_else(|| Error::Validation("environment not set".to_string()))?;
        environment
            .validate()
            .map_err(|e| Error::Validation(format!("environment: {e}")))?;

        if self.key_list.is_empty() {
            return Err(Error::Validation("empty key list".to_string()));
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
            "INSERT INTO key_triples (environment_id, type, is_active, module_id) \
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

        for (i, key) in self.key_list.iter_mut().enumerate() {
            key.owner_id = self.id;
            key.owner_type = "key_triple".to_string();

            key.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("key list index {i}: {e}")))?;
        }

        for (i, key) in self.authorized_by.iter_mut().enumerate() {
            key.owner_id = self.id;
            key.owner_type = "key_triple_auth".to_string();

            key.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("authorized-by index {i}: {e}")))?;
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

        self.key_list = CryptoKey::select_owned(db, conn, self.id, "key_triple").await?;
        self.authorized_by = CryptoKey::select_owned(db, conn, self.id, "key_triple_auth").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, key) in self.key_list.iter().enumerate() {
            key.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("crypto key at index {i}: {e}")))?;
        }

        for (i, key) in self.authorized_by.iter().enumerate() {
            key.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("authorized-by key at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM key_triples WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        if let Some(environment) = &self.environment {
            environment.delete_if_orphaned(db, conn).await?;
        }

        Ok(())
    }

    pub(crate) fn from_row(row: &sqlx::any::AnyRow) -> Result<KeyTriple, Error> {
        Ok(KeyTriple {
            id: row.try_get("id")?,
            environment_id: row
                .try_get::<Option<i64>, _>("environment_id")?
                .unwrap_or(0),
            environment: None,
            triple_type: row.try_get("type")?,
            key_list: Vec::new(),
            authorized_by: Vec::new(),
            is_active: row.try_get::<i64, _>("is_active")? != 0,
            module_id: row.try_get::<Option<i64>, _>("module_id")?.unwrap_or(0),
        })
    }

    pub async fn select_for_module(
        db: &Db,
        conn: &mut AnyConnection,
        module_id: i64,
    ) -> Result<Vec<KeyTriple>, Error> {
        let sql = format!(
            "SELECT id, environment_id, type, is_active, module_id FROM key_triples \
             WHERE module_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(module_id)])
            .await?;

        let mut ret: Vec<KeyTriple> = rows
            .iter()
            .map(KeyTriple::from_row)
            .collect::<Result<_, Error>>()?;

        for (i, triple) in ret.iter_mut().enumerate() {
            triple
                .select(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("key triple at index {i}: {e}")))?;
        }

        Ok(ret)
    }
}

pub(crate) fn key_triples_from_token(
    origin: &[token::KeyTriple],
    triple_type: &str,
) -> Result<Vec<KeyTriple>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, triple)| {
            KeyTriple::from_token(triple, triple_type).map_err(|e| {
                Error::Validation(format!(
                    "error converting {triple_type} key at index {i}: {e}"
                ))
            })
        })
        .collect()
}

pub fn key_triples_to_token(
    origin: &[KeyTriple],
    triple_type: &str,
) -> Result<Vec<token::KeyTriple>, Error> {
    origin
        .iter()
        .enumerate()
        .filter(|(_, triple)| triple.triple_type == triple_type)
        .map(|(i, triple)| {
            triple.to_token().map_err(|e| {
                Error::Validation(format!("could not convert key triple at index {i}: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::InstanceId;

    fn sample_token_triple() -> token::KeyTriple {
        token::KeyTriple {
            environment: token::Environment {
                instance: Some(InstanceId::Ueid(vec![0x01, 0x07, 0x06])),
                ..Default::default()
            },
            verif_keys: vec![token::CryptoKey::PkixBase64Key("MFkw".to_string())],
        }
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_token_triple();

        let row = KeyTriple::from_token(&origin, ATTEST_KEY_TRIPLE).unwrap();
        assert_eq!(row.triple_type, "attest");
        assert_eq!(row.key_list.len(), 1);
        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn validation() {
        let mut row = KeyTriple::from_token(&sample_token_triple(), IDENTITY_KEY_TRIPLE).unwrap();
        row.key_list.clear();

        let err = row.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation error: empty key list");
    }
}
