// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::token;

/// One crypto key row, owned polymorphically (key triple lists,
/// measurement authorizers, measurement value keys).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CryptoKey {
    pub id: i64,

    pub key_type: String,
    pub key_bytes: Vec<u8>,

    pub owner_id: i64,
    pub owner_type: String,
}

impl CryptoKey {
    pub fn from_token(origin: &token::CryptoKey) -> CryptoKey {
        CryptoKey {
            key_type: origin.type_name(),
            key_bytes: origin.store_bytes(),
            ..Default::default()
        }
    }

    pub fn to_token(&self) -> Result<token::CryptoKey, Error> {
        token::CryptoKey::from_parts(&self.key_type, &self.key_bytes)
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO cryptokeys (key_type, key_bytes, owner_id, owner_type) VALUES ({})",
            d.placeholders(1, 4)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.key_type.clone()),
                    BindValue::from(self.key_bytes.clone()),
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
            "DELETE FROM cryptokeys WHERE id = {}",
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
    ) -> Result<Vec<CryptoKey>, Error> {
        let d = db.dialect();
        let sql = format!(
            "SELECT id, key_type, key_bytes, owner_id, owner_type FROM cryptokeys \
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
                Ok(CryptoKey {
                    id: row.try_get("id")?,
                    key_type: row.try_get("key_type")?,
                    key_bytes: row.try_get("key_bytes")?,
                    owner_id: row.try_get("owner_id")?,
                    owner_type: row.try_get("owner_type")?,
                })
            })
            .collect()
    }
}

pub(crate) fn crypto_keys_from_token(origin: &[token::CryptoKey]) -> Vec<CryptoKey> {
    origin.iter().map(CryptoKey::from_token).collect()
}

pub(crate) fn crypto_keys_to_token(origin: &[CryptoKey]) -> Result<Vec<token::CryptoKey>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, key)| {
            key.to_token().map_err(|e| {
                Error::Validation(format!("could not convert crypto key at index {i}: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_round_trip() {
        let keys = [
            token::CryptoKey::PkixBase64Cert("MIIB...".to_string()),
            token::CryptoKey::Bytes(vec![0x01, 0x02]),
            token::CryptoKey::Thumbprint(token::HashEntry::new(1, vec![0xaa; 32])),
        ];

        for key in keys {
            let row = CryptoKey::from_token(&key);
            assert_eq!(row.to_token().unwrap(), key);
        }
    }

    #[test]
    fn bad_stored_text() {
        let row = CryptoKey {
            key_type: "pkix-base64-key".to_string(),
            key_bytes: vec![0xff, 0xfe],
            ..Default::default()
        };

        assert!(row.to_token().is_err());
    }
}
