// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::entity::{corim_entities_from_token, Entity};
use crate::model::extension::{extensions_from_token, extensions_to_token, ExtensionValue};
use crate::model::locator::{locators_from_token, locators_to_token, Locator};
use crate::model::module_tag::ModuleTag;
use crate::model::{infer_tag_id_type, TagIdType};
use crate::token::{
    encode_oid, Comid, ProfileId, TagEntry, TagId, UnsignedCorim, Validity, TAG_COMID,
};

/// The stored form of one CoRIM, together with its store-internal
/// metadata (label, ingest time, raw-token digest).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub id: i64,

    pub manifest_id_type: String,
    pub manifest_id: String,

    pub digest: Option<Vec<u8>>,
    /// Unix seconds; sub-second precision does not survive the database
    pub time_added: i64,
    pub label: String,

    pub profile_type: String,
    pub profile: String,

    pub entities: Vec<Entity>,
    pub dependent_rims: Vec<Locator>,

    pub not_before: Option<i64>,
    pub not_after: Option<i64>,

    pub module_tags: Vec<ModuleTag>,

    pub extensions: Vec<ExtensionValue>,
}

impl Manifest {
    pub fn from_token(origin: &UnsignedCorim) -> Result<Manifest, Error> {
        let manifest_id = origin.id.to_string();

        let mut ret = Manifest {
            manifest_id_type: infer_tag_id_type(&manifest_id).as_str().to_string(),
            manifest_id,
            ..Default::default()
        };

        if let Some(profile) = &origin.profile {
            ret.profile_type = profile.type_name().to_string();
            ret.profile = match profile {
                ProfileId::Uri(uri) => uri.clone(),
                ProfileId::Oid(bytes) => crate::token::decode_oid(bytes)
                    .map_err(|e| Error::Validation(format!("profile: {e}")))?,
            };
        }

        ret.dependent_rims = locators_from_token(&origin.dependent_rims);
        ret.entities = corim_entities_from_token(&origin.entities)?;

        for (index, tag) in origin.tags.iter().enumerate() {
            if tag.number != TAG_COMID {
                return Err(Error::UnsupportedTag {
                    number: tag.number,
                    index,
                });
            }

            let comid = Comid::from_cbor(&tag.content).map_err(|e| {
                Error::CborDecode(format!("could not decode CoMID at index {index}: {e}"))
            })?;

            let module_tag = ModuleTag::from_token(&comid).map_err(|e| match e {
                Error::UnsupportedFeature(_) => e,
                other => Error::Validation(format!(
                    "could not create module tag at index {index}: {other}"
                )),
            })?;

            ret.module_tags.push(module_tag);
        }

        if let Some(validity) = &origin.validity {
            ret.not_before = validity.not_before;
            ret.not_after = Some(validity.not_after);
        }

        ret.extensions = extensions_from_token(&origin.extensions)?;

        Ok(ret)
    }

    pub fn to_token(&self) -> Result<UnsignedCorim, Error> {
        let id = match TagIdType::parse(&self.manifest_id_type)? {
            TagIdType::String => TagId::from(self.manifest_id.as_str()),
            TagIdType::Uuid => {
                let uuid = uuid::Uuid::parse_str(&self.manifest_id)
                    .map_err(|e| Error::invalid("manifest ID", e.to_string()))?;
                TagId::from(uuid)
            }
        };

        let mut ret = UnsignedCorim::new(id);

        if !self.profile.is_empty() {
            ret.profile = Some(match self.profile_type.as_str() {
                "uri" => ProfileId::Uri(self.profile.clone()),
                "oid" => ProfileId::Oid(
                    encode_oid(&self.profile)
                        .map_err(|e| Error::Validation(format!("profile: {e}")))?,
                ),
                other => {
                    return Err(Error::Validation(format!(
                        "invalid profile type: {other}"
                    )))
                }
            });
        }

        ret.dependent_rims = locators_to_token(&self.dependent_rims)?;

        for entity in &self.entities {
            ret.entities.push(entity.to_corim()?);
        }

        for (index, module_tag) in self.module_tags.iter().enumerate() {
            let comid = module_tag
                .to_token()
                .map_err(|e| Error::Validation(format!("module tag at index {index}: {e}")))?;

            let content = comid.to_cbor().map_err(|e| {
                Error::CborEncode(format!("could not encode CoMID at index {index}: {e}"))
            })?;

            ret.tags.push(TagEntry {
                number: TAG_COMID,
                content,
            });
        }

        match (self.not_before, self.not_after) {
            (_, Some(not_after)) => {
                ret.validity = Some(Validity {
                    not_before: self.not_before,
                    not_after,
                });
            }
            (Some(_), None) => {
                return Err(Error::Validation(
                    "not-before is set but not-after isn't".to_string(),
                ))
            }
            (None, None) => (),
        }

        ret.extensions = extensions_to_token(&self.extensions)?;

        Ok(ret)
    }

    pub fn set_active(&mut self, value: bool) {
        for module_tag in self.module_tags.iter_mut() {
            module_tag.set_active(value);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.manifest_id_type.is_empty() || self.manifest_id.is_empty() {
            return Err(Error::Validation(
                "manifest ID not set (both type and value must be set)".to_string(),
            ));
        }

        TagIdType::parse(&self.manifest_id_type)?;

        if self.module_tags.is_empty() {
            return Err(Error::Validation("no module tags".to_string()));
        }

        for (i, module_tag) in self.module_tags.iter().enumerate() {
            module_tag
                .validate()
                .map_err(|e| Error::Validation(format!("module tag at index {i}: {e}")))?;
        }

        if self.not_after.is_none() && self.not_before.is_some() {
            return Err(Error::Validation(
                "not-before is set but not-after isn't".to_string(),
            ));
        }

        for (i, entity) in self.entities.iter().enumerate() {
            entity
                .validate()
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))?;
        }

        Ok(())
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.validate()?;

        let d = db.dialect();
        let sql = format!(
            "INSERT INTO manifests (manifest_id_type, manifest_id, digest, time_added, \
             label, profile_type, profile, not_before, not_after) VALUES ({})",
            d.placeholders(1, 9)
        );

        let label = if self.label.is_empty() {
            None
        } else {
            Some(self.label.clone())
        };
        let profile_type = if self.profile_type.is_empty() {
            None
        } else {
            Some(self.profile_type.clone())
        };
        let profile = if self.profile.is_empty() {
            None
        } else {
            Some(self.profile.clone())
        };

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.manifest_id_type.clone()),
                    BindValue::from(self.manifest_id.clone()),
                    BindValue::OptBlob(self.digest.clone()),
                    BindValue::from(self.time_added),
                    BindValue::OptText(label),
                    BindValue::OptText(profile_type),
                    BindValue::OptText(profile),
                    BindValue::OptInt(self.not_before),
                    BindValue::OptInt(self.not_after),
                ],
            )
            .await?;

        for entity in self.entities.iter_mut() {
            entity.owner_id = self.id;
            entity.owner_type = "manifest".to_string();

            entity
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting entity: {e}")))?;
        }

        for locator in self.dependent_rims.iter_mut() {
            locator.manifest_id = self.id;

            locator
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting locator: {e}")))?;
        }

        for module_tag in self.module_tags.iter_mut() {
            module_tag.manifest_id = self.id;

            module_tag
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting module tag: {e}")))?;
        }

        for ext in self.extensions.iter_mut() {
            ext.owner_id = self.id;
            ext.owner_type = "manifest".to_string();

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

        self.entities = Entity::select_owned(db, conn, self.id, "manifest").await?;
        self.dependent_rims = Locator::select_for_manifest(db, conn, self.id).await?;
        self.module_tags = ModuleTag::select_for_manifest(db, conn, self.id).await?;
        self.extensions = ExtensionValue::select_owned(db, conn, self.id, "manifest").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, entity) in self.entities.iter().enumerate() {
            entity
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("entity at index {i}: {e}")))?;
        }

        for (i, module_tag) in self.module_tags.iter().enumerate() {
            module_tag
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("module tag at index {i}: {e}")))?;
        }

        for (i, locator) in self.dependent_rims.iter().enumerate() {
            locator
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("dependent RIM at index {i}: {e}")))?;
        }

        for (i, ext) in self.extensions.iter().enumerate() {
            ext.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("extension at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM manifests WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub(crate) fn from_row(row: &sqlx::any::AnyRow) -> Result<Manifest, Error> {
        Ok(Manifest {
            id: row.try_get("id")?,
            manifest_id_type: row.try_get("manifest_id_type")?,
            manifest_id: row.try_get("manifest_id")?,
            digest: row.try_get("digest")?,
            time_added: row.try_get::<Option<i64>, _>("time_added")?.unwrap_or(0),
            label: row
                .try_get::<Option<String>, _>("label")?
                .unwrap_or_default(),
            profile_type: row
                .try_get::<Option<String>, _>("profile_type")?
                .unwrap_or_default(),
            profile: row
                .try_get::<Option<String>, _>("profile")?
                .unwrap_or_default(),
            not_before: row.try_get("not_before")?,
            not_after: row.try_get("not_after")?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{
        Class, ClassId, CorimEntity, Extensions, HashEntry, InstanceId, Mval, Version,
        ROLE_MANIFEST_CREATOR,
    };

    fn sample_corim() -> UnsignedCorim {
        let mut comid = Comid::new(TagId::from("test-module"));

        comid.triples.reference_values.push(crate::token::ValueTriple {
            environment: crate::token::Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0xaa])),
                    ..Default::default()
                }),
                ..Default::default()
            },
            measurements: vec![crate::token::Measurement {
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

        comid.triples.attest_verif_keys.push(crate::token::KeyTriple {
            environment: crate::token::Environment {
                instance: Some(InstanceId::Ueid(vec![0x01, 0x02])),
                ..Default::default()
            },
            verif_keys: vec![crate::token::CryptoKey::PkixBase64Key("MFkw".to_string())],
        });

        let mut corim = UnsignedCorim::new(TagId::from("cca-ta"));
        corim.tags.push(TagEntry {
            number: TAG_COMID,
            content: comid.to_cbor().unwrap(),
        });
        corim.profile = Some(ProfileId::Uri("http://arm.com/cca/ssd/1".to_string()));
        corim.validity = Some(Validity {
            not_before: Some(1_600_000_000),
            not_after: 1_700_000_000,
        });
        corim.dependent_rims.push(crate::token::Locator {
            href: "https://acme.example/rim".to_string(),
            thumbprint: Some(HashEntry::new(1, vec![0x11; 32])),
        });
        corim.entities.push(CorimEntity {
            name: "ACME Ltd.".to_string(),
            reg_id: Some("https://acme.example".to_string()),
            roles: vec![ROLE_MANIFEST_CREATOR],
            extensions: Extensions::new(),
        });

        corim
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_corim();

        let manifest = Manifest::from_token(&origin).unwrap();
        assert_eq!(manifest.manifest_id, "cca-ta");
        assert_eq!(manifest.manifest_id_type, "string");
        assert_eq!(manifest.profile_type, "uri");
        assert_eq!(manifest.not_before, Some(1_600_000_000));
        assert_eq!(manifest.module_tags.len(), 1);

        assert_eq!(manifest.to_token().unwrap(), origin);
    }

    #[test]
    fn oid_profile_round_trip() {
        let mut origin = sample_corim();
        origin.profile = Some(ProfileId::Oid(encode_oid("1.3.6.1.4.1.4128").unwrap()));

        let manifest = Manifest::from_token(&origin).unwrap();
        assert_eq!(manifest.profile_type, "oid");
        assert_eq!(manifest.profile, "1.3.6.1.4.1.4128");

        assert_eq!(manifest.to_token().unwrap(), origin);
    }

    #[test]
    fn uuid_manifest_id() {
        let mut origin = sample_corim();
        let uuid = uuid::Uuid::parse_str("31fb5abf-023e-4992-aa4e-95f9c1503bfa").unwrap();
        origin.id = TagId::from(uuid);

        let manifest = Manifest::from_token(&origin).unwrap();
        assert_eq!(manifest.manifest_id_type, "uuid");

        assert_eq!(manifest.to_token().unwrap(), origin);
    }

    #[test]
    fn non_comid_tags_rejected() {
        let mut origin = sample_corim();
        origin.tags.push(TagEntry {
            number: 505,
            content: vec![0xa0],
        });

        let err = Manifest::from_token(&origin).unwrap_err();
        assert_eq!(
            err.to_string(),
            "tag 505 at index 1; only CoMID tags (506) are supported"
        );
    }

    #[test]
    fn validity_requires_not_after() {
        let mut manifest = Manifest::from_token(&sample_corim()).unwrap();
        manifest.not_after = None;

        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("not-before is set but not-after"));

        let err = manifest.to_token().unwrap_err();
        assert!(err.to_string().contains("not-before is set but not-after"));
    }

    #[test]
    fn validate_requires_module_tags() {
        let manifest = Manifest {
            manifest_id_type: "string".to_string(),
            manifest_id: "x".to_string(),
            ..Default::default()
        };

        let err = manifest.validate().unwrap_err();
        assert_eq!(err.to_string(), "validation error: no module tags");
    }
}
