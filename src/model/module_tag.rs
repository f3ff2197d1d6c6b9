// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::entity::{comid_entities_from_token, Entity};
use crate::model::extension::{extensions_from_token, extensions_to_token, ExtensionValue};
use crate::model::key_triple::{
    key_triples_from_token, key_triples_to_token, KeyTriple, ATTEST_KEY_TRIPLE,
    IDENTITY_KEY_TRIPLE,
};
use crate::model::linked_tag::LinkedTag;
use crate::model::value_triple::{
    value_triples_from_token, value_triples_to_token, ValueTriple, ENDORSED_VALUE_TRIPLE,
    REFERENCE_VALUE_TRIPLE,
};
use crate::model::{infer_tag_id_type, TagIdType};
use crate::token::{self, Comid, TagId, TagIdentity};

/// One CoMID of a manifest, with its triples and satellite rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTag {
    pub id: i64,

    pub tag_id_type: String,
    pub tag_id: String,
    pub tag_version: i64,

    pub language: Option<String>,

    pub entities: Vec<Entity>,

    pub value_triples: Vec<ValueTriple>,
    pub key_triples: Vec<KeyTriple>,

    pub linked_tags: Vec<LinkedTag>,

    pub extensions: Vec<ExtensionValue>,
    pub triples_extensions: Vec<ExtensionValue>,

    pub manifest_id: i64,
}

impl ModuleTag {
    pub fn from_token(origin: &Comid) -> Result<ModuleTag, Error> {
        if !origin.triples.cond_endorse_series.is_empty() {
            return Err(Error::UnsupportedFeature(
                "conditional endorsement series".to_string(),
            ));
        }

        let tag_id = origin.tag_identity.tag_id.to_string();

        let mut ret = ModuleTag {
            tag_id_type: infer_tag_id_type(&tag_id).as_str().to_string(),
            tag_id,
            tag_version: origin.tag_identity.tag_version as i64,
            language: origin.language.clone(),
            entities: comid_entities_from_token(&origin.entities)?,
            ..Default::default()
        };

        ret.linked_tags = origin
            .linked_tags
            .iter()
            .enumerate()
            .map(|(i, link)| {
                LinkedTag::from_token(link).map_err(|e| {
                    Error::Validation(format!("could not convert linked tag at index {i}: {e}"))
                })
            })
            .collect::<Result<_, _>>()?;

        ret.value_triples = value_triples_from_token(
            &origin.triples.reference_values,
            REFERENCE_VALUE_TRIPLE,
        )?;
        ret.value_triples.extend(value_triples_from_token(
            &origin.triples.endorsed_values,
            ENDORSED_VALUE_TRIPLE,
        )?);

        ret.key_triples =
            key_triples_from_token(&origin.triples.attest_verif_keys, ATTEST_KEY_TRIPLE)?;
        ret.key_triples.extend(key_triples_from_token(
            &origin.triples.dev_identity_keys,
            IDENTITY_KEY_TRIPLE,
        )?);

        ret.extensions = extensions_from_token(&origin.extensions)?;
        ret.triples_extensions = extensions_from_token(&origin.triples.extensions)?;

        Ok(ret)
    }

    pub fn to_token(&self) -> Result<Comid, Error> {
        let tag_id = match TagIdType::parse(&self.tag_id_type)? {
            TagIdType::String => TagId::from(self.tag_id.as_str()),
            TagIdType::Uuid => {
                let uuid = uuid::Uuid::parse_str(&self.tag_id)
                    .map_err(|e| Error::invalid("tag ID", e.to_string()))?;
                TagId::from(uuid)
            }
        };

        let mut ret = Comid {
            language: self.language.clone(),
            tag_identity: TagIdentity {
                tag_id,
                tag_version: self.tag_version as u64,
            },
            entities: Vec::with_capacity(self.entities.len()),
            linked_tags: Vec::with_capacity(self.linked_tags.len()),
            triples: token::Triples::default(),
            extensions: extensions_to_token(&self.extensions)?,
        };

        for entity in &self.entities {
            ret.entities.push(entity.to_comid()?);
        }

        for link in &self.linked_tags {
            ret.linked_tags.push(link.to_token()?);
        }

        ret.triples.reference_values =
            value_triples_to_token(&self.value_triples, REFERENCE_VALUE_TRIPLE)?;
        ret.triples.endorsed_values =
            value_triples_to_token(&self.value_triples, ENDORSED_VALUE_TRIPLE)?;

        ret.triples.attest_verif_keys =
            key_triples_to_token(&self.key_triples, ATTEST_KEY_TRIPLE)?;
        ret.triples.dev_identity_keys =
            key_triples_to_token(&self.key_triples, IDENTITY_KEY_TRIPLE)?;

        ret.triples.extensions = extensions_to_token(&self.triples_extensions)?;

        Ok(ret)
    }

    pub fn set_active(&mut self, value: bool) {
        for triple in self.key_triples.iter_mut() {
            triple.is_active = value;
        }

        for triple in self.value_triples.iter_mut() {
            triple.is_active = value;
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tag_id_type.is_empty() || self.tag_id.is_empty() {
            return Err(Error::Validation(
                "tag ID not set (both type and value must be set)".to_string(),
            ));
        }

        TagIdType::parse(&self.tag_id_type)?;

        if self.value_triples.is_empty() && self.key_triples.is_empty() {
            return Err(Error::Validation("no triples specified".to_string()));
        }

        for (i, entity) in self.entities.iter().enumerate() {
            entity
                .validate()
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))?;
        }

        for (i, triple) in self.value_triples.iter().enumerate() {
            triple
                .validate()
                .map_err(|e| Error::Validation(format!("value triple at index {i}: {e}")))?;
        }

        for (i, triple) in self.key_triples.iter().enumerate() {
            triple
                .validate()
                .map_err(|e| Error::Validation(format!("key triple at index {i}: {e}")))?;
        }

        Ok(())
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.validate()?;

        let d = db.dialect();
        let sql = format!(
            "INSERT INTO module_tags (tag_id_type, tag_id, tag_version, language, \
             manifest_id) VALUES ({})",
            d.placeholders(1, 5)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.tag_id_type.clone()),
                    BindValue::from(self.tag_id.clone()),
                    BindValue::from(self.tag_version),
                    BindValue::OptText(self.language.clone()),
                    BindValue::from(self.manifest_id),
                ],
            )
            .await?;

        for entity in self.entities.iter_mut() {
            entity.owner_id = self.id;
            entity.owner_type = "module_tag".to_string();

            entity
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting entity: {e}")))?;
        }

        for link in self.linked_tags.iter_mut() {
            link.module_id = self.id;

            link.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting linked tag: {e}")))?;
        }

        for triple in self.value_triples.iter_mut() {
            triple.module_id = self.id;

            triple
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting value triple: {e}")))?;
        }

        for triple in self.key_triples.iter_mut() {
            triple.module_id = self.id;

            triple
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting key triple: {e}")))?;
        }

        for ext in self.extensions.iter_mut() {
            ext.owner_id = self.id;
            ext.owner_type = "module_tag".to_string();

            ext.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting extension: {e}")))?;
        }

        for ext in self.triples_extensions.iter_mut() {
            ext.owner_id = self.id;
            ext.owner_type = "triples".to_string();

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

        self.entities = Entity::select_owned(db, conn, self.id, "module_tag").await?;
        self.linked_tags = LinkedTag::select_for_module(db, conn, self.id).await?;
        self.value_triples = ValueTriple::select_for_module(db, conn, self.id).await?;
        self.key_triples = KeyTriple::select_for_module(db, conn, self.id).await?;
        self.extensions = ExtensionValue::select_owned(db, conn, self.id, "module_tag").await?;
        self.triples_extensions =
            ExtensionValue::select_owned(db, conn, self.id, "triples").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, link) in self.linked_tags.iter().enumerate() {
            link.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("linked tag at index {i}: {e}")))?;
        }

        for (i, entity) in self.entities.iter().enumerate() {
            entity
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))?;
        }

        for (i, triple) in self.value_triples.iter().enumerate() {
            triple
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("value triple at index {i}: {e}")))?;
        }

        for (i, triple) in self.key_triples.iter().enumerate() {
            triple
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("key triple at index {i}: {e}")))?;
        }

        for (i, ext) in self.extensions.iter().enumerate() {
            ext.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("extension at index {i}: {e}")))?;
        }

        for (i, ext) in self.triples_extensions.iter().enumerate() {
            ext.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("triples extension at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM module_tags WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_manifest(
        db: &Db,
        conn: &mut AnyConnection,
        manifest_id: i64,
    ) -> Result<Vec<ModuleTag>, Error> {
        let sql = format!(
            "SELECT id, tag_id_type, tag_id, tag_version, language, manifest_id \
             FROM module_tags WHERE manifest_id = {} ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(manifest_id)])
            .await?;

        let mut ret: Vec<ModuleTag> = rows
            .iter()
            .map(|row| {
                Ok(ModuleTag {
                    id: row.try_get("id")?,
                    tag_id_type: row.try_get("tag_id_type")?,
                    tag_id: row.try_get("tag_id")?,
                    tag_version: row.try_get("tag_version")?,
                    language: row.try_get("language")?,
                    manifest_id: row.try_get("manifest_id")?,
                    ..Default::default()
                })
            })
            .collect::<Result<_, Error>>()?;

        for (i, module_tag) in ret.iter_mut().enumerate() {
            module_tag
                .select(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("module tag at index {i}: {e}")))?;
        }

        Ok(ret)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::RawValue;
    use crate::token::{Class, ClassId, InstanceId, Mval, Version};

    fn sample_comid() -> Comid {
        let mut comid = Comid::new(TagId::from("test-module"));
        comid.tag_identity.tag_version = 1;

        comid.triples.reference_values.push(token::ValueTriple {
            environment: token::Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0xaa])),
                    vendor: Some("ACME".to_string()),
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
        });

        comid.triples.attest_verif_keys.push(token::KeyTriple {
            environment: token::Environment {
                instance: Some(InstanceId::Ueid(vec![0x01, 0x02])),
                ..Default::default()
            },
            verif_keys: vec![token::CryptoKey::PkixBase64Key("MFkw".to_string())],
        });

        comid
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_comid();

        let row = ModuleTag::from_token(&origin).unwrap();
        assert_eq!(row.tag_id, "test-module");
        assert_eq!(row.tag_id_type, "string");
        assert_eq!(row.value_triples.len(), 1);
        assert_eq!(row.key_triples.len(), 1);

        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn cond_endorse_series_unsupported() {
        let mut origin = sample_comid();
        origin
            .triples
            .cond_endorse_series
            .push(RawValue::Array(vec![]));

        let err = ModuleTag::from_token(&origin).unwrap_err();
        assert_eq!(
            err.to_string(),
            "conditional endorsement series not supported"
        );
    }

    #[test]
    fn set_active() {
        let mut row = ModuleTag::from_token(&sample_comid()).unwrap();

        row.set_active(true);
        assert!(row.value_triples.iter().all(|t| t.is_active));
        assert!(row.key_triples.iter().all(|t| t.is_active));

        row.set_active(false);
        assert!(row.value_triples.iter().all(|t| !t.is_active));
    }

    #[test]
    fn validate_requires_triples() {
        let row = ModuleTag {
            tag_id_type: "string".to_string(),
            tag_id: "x".to_string(),
            ..Default::default()
        };

        let err = row.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation error: no triples specified");
    }
}
