// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::digest::Digest;
use crate::token;

/// A dependent-RIM reference owned by a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locator {
    pub id: i64,

    pub href: String,
    /// at most one digest; the token format does not allow more
    pub thumbprint: Vec<Digest>,

    pub manifest_id: i64,
}

impl Locator {
    pub fn from_token(origin: &token::Locator) -> Locator {
        let mut ret = Locator {
            href: origin.href.clone(),
            ..Default::default()
        };

        if let Some(thumbprint) = &origin.thumbprint {
            ret.thumbprint.push(Digest::from_token(thumbprint));
        }

        ret
    }

    pub fn to_token(&self) -> Result<token::Locator, Error> {
        if self.thumbprint.len() > 1 {
            return Err(Error::Validation(
                "multiple thumbprints are not supported".to_string(),
            ));
        }

        Ok(token::Locator {
            href: self.href.clone(),
            thumbprint: self.thumbprint.first().map(Digest::to_token),
        })
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO locators (href, manifest_id) VALUES ({})",
            d.placeholders(1, 2)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.href.clone()),
                    BindValue::from(self.manifest_id),
                ],
            )
            .await?;

        for (i, digest) in self.thumbprint.iter_mut().enumerate() {
            digest.owner_id = self.id;
            digest.owner_type = "locator".to_string();

            digest.insert(db, conn).await.map_err(|e| {
                Error::Validation(format!("error inserting thumbprint {i}: {e}"))
            })?;
        }

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        self.thumbprint = Digest::select_owned(db, conn, self.id, "locator").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, digest) in self.thumbprint.iter().enumerate() {
            digest
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("thumbprint at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM locators WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_manifest(
        db: &Db,
        conn: &mut AnyConnection,
        manifest_id: i64,
    ) -> Result<Vec<Locator>, Error> {
        let sql = format!(
            "SELECT id, href, manifest_id FROM locators WHERE manifest_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(manifest_id)])
            .await?;

        let mut ret: Vec<Locator> = rows
            .iter()
            .map(|row| {
                Ok(Locator {
                    id: row.try_get("id")?,
                    href: row.try_get("href")?,
                    thumbprint: Vec::new(),
                    manifest_id: row.try_get("manifest_id")?,
                })
            })
            .collect::<Result<_, Error>>()?;

        for locator in &mut ret {
            locator.select(db, conn).await?;
        }

        Ok(ret)
    }
}

pub(crate) fn locators_from_token(origin: &[token::Locator]) -> Vec<Locator> {
    origin.iter().map(Locator::from_token).collect()
}

pub(crate) fn locators_to_token(origin: &[Locator]) -> Result<Vec<token::Locator>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, locator)| {
            locator
                .to_token()
                .map_err(|e| Error::Validation(format!("locator at index {i}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::HashEntry;

    #[test]
    fn token_round_trip() {
        let origin = token::Locator {
            href: "https://acme.example/rim".to_string(),
            thumbprint: Some(HashEntry::new(1, vec![0x11; 32])),
        };

        let row = Locator::from_token(&origin);
        assert_eq!(row.thumbprint.len(), 1);
        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn multiple_thumbprints_rejected() {
        let row = Locator {
            href: "https://acme.example".to_string(),
            thumbprint: vec![Digest::new(1, vec![0x01]), Digest::new(1, vec![0x02])],
            ..Default::default()
        };

        let err = row.to_token().unwrap_err();
        assert!(err.to_string().contains("multiple thumbprints"));
    }
}
