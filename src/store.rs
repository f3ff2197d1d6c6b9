// SPDX-License-Identifier: Apache-2.0

//! The store facade: ingest, retrieval, deletion and activation of
//! manifests, plus the environment-matching query engine.

use async_trait::async_trait;
use chrono::Utc;
use md5::Md5;
use sha2::{Digest as _, Sha256, Sha512};
use sqlx::any::AnyRow;
use sqlx::AnyConnection;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::migrations::Migrator;
use crate::model;
use crate::token::{self, UnsignedCorim};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// the database dialect (sqlite, postgres, mysql, and their aliases)
    pub dbms: String,
    /// driver-specific connection string
    pub dsn: String,
    /// log every SQL statement at DEBUG
    pub trace_sql: bool,
    /// the hashing algorithm for manifest digests: md5, sha256 or sha512
    pub hash_alg: String,
    /// permit ingesting signed CoRIMs without verifying their signatures
    pub insecure: bool,
    /// overwrite an existing manifest on conflict
    pub force: bool,
    /// require a label when adding or looking up manifests
    pub require_label: bool,
}

impl Config {
    pub fn new(dbms: &str, dsn: &str) -> Config {
        Config {
            dbms: dbms.to_string(),
            dsn: dsn.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::db::Dialect::from_dbms(&self.dbms)?;

        if !["md5", "MD5", "sha256", "SHA256", "sha512", "SHA512"]
            .contains(&self.hash_alg.as_str())
        {
            return Err(Error::Configuration(format!(
                "invalid hash algorithm: {}",
                self.hash_alg
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            dbms: "sqlite".to_string(),
            dsn: "file:store.db?cache=shared".to_string(),
            trace_sql: false,
            hash_alg: "sha256".to_string(),
            insecure: false,
            force: false,
            require_label: false,
        }
    }
}

/// A persistent, queryable store of CoRIM manifests.
#[derive(Debug)]
pub struct Store {
    db: Db,
    cfg: Config,
}

impl Store {
    /// Open a store configured according to the provided config.
    pub async fn open(cfg: Config) -> Result<Store, Error> {
        cfg.validate()?;

        let db = Db::open(&cfg.dbms, &cfg.dsn, cfg.trace_sql).await?;

        Ok(Store { db, cfg })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.cfg
    }

    pub async fn close(&self) {
        self.db.close().await
    }

    /// Initialize a new database with the store's tables.
    pub async fn init(&self) -> Result<(), Error> {
        let migrator = Migrator::new(&self.db);
        migrator.init().await?;
        migrator.migrate().await?;
        Ok(())
    }

    /// Update the tables in the associated database to be compatible with
    /// this store. (There is no need to run this after `init`.)
    pub async fn migrate(&self) -> Result<usize, Error> {
        Migrator::new(&self.db).migrate().await
    }

    pub async fn rollback(&self) -> Result<usize, Error> {
        Migrator::new(&self.db).rollback().await
    }

    pub async fn migration_status(&self) -> Result<Vec<(String, bool)>, Error> {
        Migrator::new(&self.db).status().await
    }

    /// Remove all CoRIM/CoMID data from the store.
    pub async fn clear(&self) -> Result<(), Error> {
        model::reset(&self.db).await
    }

    /// Compute the digest of the provided buffer using the store's
    /// configured hashing algorithm.
    pub fn digest(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        match self.cfg.hash_alg.as_str() {
            "md5" | "MD5" => Ok(Md5::digest(input).to_vec()),
            "sha256" | "SHA256" => Ok(Sha256::digest(input).to_vec()),
            "sha512" | "SHA512" => Ok(Sha512::digest(input).to_vec()),
            // the config was validated on open, so this is unreachable
            // short of direct field manipulation
            other => Err(Error::Configuration(format!(
                "invalid hash algorithm: {other}"
            ))),
        }
    }

    /// Add the CBOR-encoded CoRIM in the provided buffer to the store.
    ///
    /// Signature validation of signed CoRIMs is not supported; if insecure
    /// ingest is allowed by the configuration, signed CoRIMs are added
    /// without validating their signatures, otherwise they are rejected.
    /// If `activate` is true, the contained triples are activated as they
    /// are added.
    pub async fn add_bytes(&self, buf: &[u8], label: &str, activate: bool) -> Result<(), Error> {
        let envelope = token::detect_envelope(buf)?;
        let digest = self.digest(buf)?;

        let corim = match envelope {
            token::Envelope::Signed => {
                if !self.cfg.insecure {
                    return Err(Error::SignatureVerificationDisabled);
                }

                let payload = token::unwrap_cose_sign1(buf)?;
                UnsignedCorim::from_cbor_payload(&payload)?
            }
            token::Envelope::Unsigned => UnsignedCorim::from_cbor(buf)?,
        };

        self.add_corim(&corim, Some(digest), label, activate).await
    }

    /// Add the provided CoRIM to the store. The digest, if set, should be
    /// the digest of the token the CoRIM was decoded from.
    pub async fn add_corim(
        &self,
        corim: &UnsignedCorim,
        digest: Option<Vec<u8>>,
        label: &str,
        activate: bool,
    ) -> Result<(), Error> {
        let mut manifest = model::Manifest::from_token(corim)?;

        manifest.digest = digest;
        manifest.label = label.to_string();

        if activate {
            manifest.set_active(true);
        }

        self.add_manifest(&mut manifest).await
    }

    /// Add the provided manifest to the store.
    pub async fn add_manifest(&self, manifest: &mut model::Manifest) -> Result<(), Error> {
        if self.cfg.require_label && manifest.label.is_empty() {
            return Err(Error::NoLabel);
        }

        let d = self.db.dialect();
        let mut conn = self.db.acquire().await?;

        let sql = format!(
            "SELECT id, manifest_id_type, manifest_id, digest, time_added, label, \
             profile_type, profile, not_before, not_after FROM manifests \
             WHERE manifest_id = {}",
            d.placeholder(1)
        );

        let existing = self
            .db
            .fetch_optional(
                &mut conn,
                &sql,
                vec![BindValue::from(manifest.manifest_id.clone())],
            )
            .await?;

        if let Some(row) = existing {
            if self.cfg.force {
                // fully populate the existing manifest, then delete it
                let mut existing = model::Manifest::from_row(&row)?;
                existing.select(&self.db, &mut conn).await.map_err(|e| {
                    Error::Validation(format!("error selecting existing manifest: {e}"))
                })?;

                drop(conn);

                let mut tx = self.db.begin().await?;
                existing.delete(&self.db, &mut tx).await.map_err(|e| {
                    Error::Validation(format!("error deleting existing manifest: {e}"))
                })?;
                tx.commit().await?;
            } else {
                let existing_digest: Option<Vec<u8>> = sqlx::Row::try_get(&row, "digest")?;

                return match (existing_digest, &manifest.digest) {
                    (Some(theirs), Some(ours)) if !theirs.is_empty() && !ours.is_empty() => {
                        if &theirs == ours {
                            Err(Error::AlreadyInStoreDigestsMatch)
                        } else {
                            Err(Error::AlreadyInStoreDigestsDiffer)
                        }
                    }
                    _ => Err(Error::AlreadyInStore),
                };
            }
        } else {
            drop(conn);
        }

        manifest.time_added = Utc::now().timestamp();

        let mut tx = self.db.begin().await?;

        if let Err(e) = manifest.insert(&self.db, &mut tx).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;

        Ok(())
    }

    /// Return the manifest associated with the specified manifest ID (the
    /// unique ID extracted from its token, not the internal row id).
    pub async fn get_manifest(
        &self,
        manifest_id: &str,
        label: &str,
    ) -> Result<model::Manifest, Error> {
        let d = self.db.dialect();
        let mut conn = self.db.acquire().await?;

        let mut sql = format!(
            "SELECT id, manifest_id_type, manifest_id, digest, time_added, label, \
             profile_type, profile, not_before, not_after FROM manifests \
             WHERE manifest_id = {}",
            d.placeholder(1)
        );
        let mut binds = vec![BindValue::from(manifest_id)];

        if !label.is_empty() {
            sql.push_str(&format!(" AND label = {}", d.placeholder(2)));
            binds.push(BindValue::from(label));
        } else if self.cfg.require_label {
            return Err(Error::NoLabel);
        }

        let row = self
            .db
            .fetch_optional(&mut conn, &sql, binds)
            .await?
            .ok_or_else(|| Error::ManifestNotFound(manifest_id.to_string()))?;

        let mut manifest = model::Manifest::from_row(&row)?;

        // fully populate nested structures
        manifest.select(&self.db, &mut conn).await?;

        Ok(manifest)
    }

    /// Delete the manifest associated with the specified manifest ID, and
    /// all its data, from the store. Orphaned environments are collected.
    pub async fn delete_manifest(&self, manifest_id: &str, label: &str) -> Result<(), Error> {
        let manifest = self.get_manifest(manifest_id, label).await?;

        let mut tx = self.db.begin().await?;

        if let Err(e) = manifest.delete(&self.db, &mut tx).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;

        Ok(())
    }

    /// The ids of environments matching the probe. Unset probe fields
    /// match any value, or only NULL when `exact` is true.
    pub async fn find_environment_ids(
        &self,
        env: &model::Environment,
        exact: bool,
    ) -> Result<Vec<i64>, Error> {
        let d = self.db.dialect();
        let (conditions, binds) = model::environment_match_conditions(env, exact, d, 1);

        let sql = if conditions.is_empty() {
            "SELECT id FROM environments".to_string()
        } else {
            format!(
                "SELECT id FROM environments WHERE {}",
                conditions.join(" AND ")
            )
        };

        let mut conn = self.db.acquire().await?;
        let rows = self.db.fetch_all(&mut conn, &sql, binds).await?;

        if rows.is_empty() {
            return Err(Error::NoEnvironmentMatch);
        }

        rows.iter()
            .map(|row| sqlx::Row::try_get::<i64, _>(row, 0).map_err(Error::from))
            .collect()
    }

    /// The ids of all module tags belonging to manifests with this label.
    pub async fn find_module_tag_ids_for_label(&self, label: &str) -> Result<Vec<i64>, Error> {
        if label.is_empty() {
            return Err(Error::Validation("no label specified".to_string()));
        }

        let d = self.db.dialect();
        let sql = format!(
            "SELECT mod.id FROM module_tags AS mod \
             JOIN manifests AS man ON man.id = mod.manifest_id \
             WHERE man.label = {}",
            d.placeholder(1)
        );

        let mut conn = self.db.acquire().await?;
        let rows = self
            .db
            .fetch_all(&mut conn, &sql, vec![BindValue::from(label)])
            .await?;

        rows.iter()
            .map(|row| sqlx::Row::try_get::<i64, _>(row, 0).map_err(Error::from))
            .collect()
    }

    /// The module-tag row ids whose tag ID equals the given text.
    pub async fn find_module_tag_ids(&self, tag_id: &str) -> Result<Vec<i64>, Error> {
        let d = self.db.dialect();
        let sql = format!(
            "SELECT id FROM module_tags WHERE tag_id = {}",
            d.placeholder(1)
        );

        let mut conn = self.db.acquire().await?;
        let rows = self
            .db
            .fetch_all(&mut conn, &sql, vec![BindValue::from(tag_id)])
            .await?;

        rows.iter()
            .map(|row| sqlx::Row::try_get::<i64, _>(row, 0).map_err(Error::from))
            .collect()
    }

    /// Value triples whose environment matches the one provided. If
    /// `exact` is true, unset probe fields must be NULL in the database;
    /// otherwise they match any value.
    pub async fn get_value_triples(
        &self,
        env: &token::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::ValueTriple>, Error> {
        let probe = model::Environment::from_token(env)?;
        self.get_triples::<model::ValueTriple>(&probe, label, exact, false)
            .await
    }

    /// Like [`Store::get_value_triples`], returning only active triples.
    pub async fn get_active_value_triples(
        &self,
        env: &token::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::ValueTriple>, Error> {
        let probe = model::Environment::from_token(env)?;
        self.get_triples::<model::ValueTriple>(&probe, label, exact, true)
            .await
    }

    /// Key triples whose environment matches the one provided.
    pub async fn get_key_triples(
        &self,
        env: &token::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::KeyTriple>, Error> {
        let probe = model::Environment::from_token(env)?;
        self.get_triples::<model::KeyTriple>(&probe, label, exact, false)
            .await
    }

    /// Like [`Store::get_key_triples`], returning only active triples.
    pub async fn get_active_key_triples(
        &self,
        env: &token::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::KeyTriple>, Error> {
        let probe = model::Environment::from_token(env)?;
        self.get_triples::<model::KeyTriple>(&probe, label, exact, true)
            .await
    }

    /// Value triples matching a column-level probe. Unlike the token
    /// probes, this can match identity bytes without constraining their
    /// type.
    pub async fn get_value_triples_matching(
        &self,
        probe: &model::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::ValueTriple>, Error> {
        self.get_triples::<model::ValueTriple>(probe, label, exact, false)
            .await
    }

    /// Key triples matching a column-level probe.
    pub async fn get_key_triples_matching(
        &self,
        probe: &model::Environment,
        label: &str,
        exact: bool,
    ) -> Result<Vec<model::KeyTriple>, Error> {
        self.get_triples::<model::KeyTriple>(probe, label, exact, false)
            .await
    }

    async fn get_triples<T: TripleRecord>(
        &self,
        probe: &model::Environment,
        label: &str,
        exact: bool,
        active_only: bool,
    ) -> Result<Vec<T>, Error> {
        let d = self.db.dialect();

        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();

        if active_only {
            conditions.push("is_active = 1".to_string());
        }

        if !probe.is_empty() {
            let env_ids = match self.find_environment_ids(probe, exact).await {
                Ok(ids) => ids,
                Err(Error::NoEnvironmentMatch) => return Err(Error::NoMatch),
                Err(e) => return Err(e),
            };

            let marks = d.placeholders(binds.len() + 1, env_ids.len());
            conditions.push(format!("environment_id IN ({marks})"));
            binds.extend(env_ids.into_iter().map(BindValue::Int));
        }

        if !label.is_empty() {
            let module_ids = self.find_module_tag_ids_for_label(label).await?;

            if module_ids.is_empty() {
                return Err(Error::NoMatch);
            }

            let marks = d.placeholders(binds.len() + 1, module_ids.len());
            conditions.push(format!("module_id IN ({marks})"));
            binds.extend(module_ids.into_iter().map(BindValue::Int));
        } else if self.cfg.require_label {
            return Err(Error::NoLabel);
        }

        let mut sql = format!(
            "SELECT id, environment_id, type, is_active, module_id FROM {}",
            T::TABLE
        );
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        sql.push_str(" ORDER BY id");

        let mut conn = self.db.acquire().await?;
        let rows = self.db.fetch_all(&mut conn, &sql, binds).await?;

        if rows.is_empty() {
            return Err(Error::NoMatch);
        }

        let mut ret: Vec<T> = rows
            .iter()
            .map(T::from_row)
            .collect::<Result<_, Error>>()?;

        // fully load nested structures
        for triple in ret.iter_mut() {
            let id = triple.database_id();
            triple.load(&self.db, &mut conn).await.map_err(|e| {
                Error::Validation(format!(
                    "{} triple with ID {id}: {e}",
                    T::triple_kind()
                ))
            })?;
        }

        Ok(ret)
    }

    /// Set the active flag on the given key-triple row ids.
    pub async fn set_key_triples_active(&self, ids: &[i64], value: bool) -> Result<(), Error> {
        self.set_active("key_triples", ids, value).await
    }

    /// Set the active flag on the given value-triple row ids.
    pub async fn set_value_triples_active(&self, ids: &[i64], value: bool) -> Result<(), Error> {
        self.set_active("value_triples", ids, value).await
    }

    /// Set the active flag on every triple owned by the given module-tag
    /// row ids. A module tag owning no triples is an error.
    pub async fn set_module_tags_active(&self, ids: &[i64], value: bool) -> Result<(), Error> {
        for id in ids {
            let key_ids = self.triple_ids_for_module("key_triples", *id).await?;
            let value_ids = self.triple_ids_for_module("value_triples", *id).await?;

            if key_ids.is_empty() && value_ids.is_empty() {
                return Err(Error::Validation(format!(
                    "no triples associated with module tag ID {id}"
                )));
            }

            if !key_ids.is_empty() {
                self.set_key_triples_active(&key_ids, value).await?;
            }

            if !value_ids.is_empty() {
                self.set_value_triples_active(&value_ids, value).await?;
            }
        }

        Ok(())
    }

    /// Set the active flag on every triple reachable from the given
    /// manifest IDs (the token IDs, not row ids).
    pub async fn set_manifests_active(
        &self,
        manifest_ids: &[String],
        value: bool,
    ) -> Result<(), Error> {
        let d = self.db.dialect();
        let mut module_ids: Vec<i64> = Vec::new();

        for manifest_id in manifest_ids {
            let sql = format!(
                "SELECT mod.id FROM module_tags AS mod \
                 JOIN manifests AS man ON man.id = mod.manifest_id \
                 WHERE man.manifest_id = {}",
                d.placeholder(1)
            );

            let mut conn = self.db.acquire().await?;
            let rows = self
                .db
                .fetch_all(&mut conn, &sql, vec![BindValue::from(manifest_id.clone())])
                .await?;

            for row in &rows {
                module_ids.push(sqlx::Row::try_get::<i64, _>(row, 0)?);
            }
        }

        self.set_module_tags_active(&module_ids, value).await
    }

    async fn set_active(&self, table: &str, ids: &[i64], value: bool) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let d = self.db.dialect();
        let marks = d.placeholders(2, ids.len());
        let sql = format!(
            "UPDATE {table} SET is_active = {} WHERE id IN ({marks})",
            d.placeholder(1)
        );

        let mut binds = vec![BindValue::from(value)];
        binds.extend(ids.iter().copied().map(BindValue::Int));

        let mut conn = self.db.acquire().await?;
        self.db.execute(&mut conn, &sql, binds).await?;

        Ok(())
    }

    async fn triple_ids_for_module(&self, table: &str, module_id: i64) -> Result<Vec<i64>, Error> {
        let d = self.db.dialect();
        let sql = format!(
            "SELECT id FROM {table} WHERE module_id = {}",
            d.placeholder(1)
        );

        let mut conn = self.db.acquire().await?;
        let rows = self
            .db
            .fetch_all(&mut conn, &sql, vec![BindValue::from(module_id)])
            .await?;

        rows.iter()
            .map(|row| sqlx::Row::try_get::<i64, _>(row, 0).map_err(Error::from))
            .collect()
    }

    /// An expression using a dialect-specific function to aggregate the
    /// specified TEXT column into a comma-separated list.
    pub fn string_aggregator_expr(&self, column_name: &str) -> String {
        self.db.dialect().string_aggregator_expr(column_name)
    }

    /// A dialect-specific expression concatenating the provided tokens.
    pub fn concat_expr(&self, tokens: &[&str]) -> String {
        self.db.dialect().concat_expr(tokens)
    }

    /// A dialect-specific expression hex-encoding the specified column.
    pub fn hex_expr(&self, column_name: &str) -> String {
        self.db.dialect().hex_expr(column_name)
    }
}

/// A triple row the query engine can fetch and eagerly load. In addition
/// to implementing the methods, a triple's table must contain
/// `environment_id`, `is_active` and `module_id` columns.
#[async_trait]
trait TripleRecord: Sized + Send {
    const TABLE: &'static str;

    fn triple_kind() -> &'static str;
    fn from_row(row: &AnyRow) -> Result<Self, Error>;
    fn database_id(&self) -> i64;

    async fn load(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error>;
}

#[async_trait]
impl TripleRecord for model::ValueTriple {
    const TABLE: &'static str = "value_triples";

    fn triple_kind() -> &'static str {
        "value"
    }

    fn from_row(row: &AnyRow) -> Result<Self, Error> {
        model::ValueTriple::from_row(row)
    }

    fn database_id(&self) -> i64 {
        self.id
    }

    async fn load(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.select(db, conn).await
    }
}

#[async_trait]
impl TripleRecord for model::KeyTriple {
    const TABLE: &'static str = "key_triples";

    fn triple_kind() -> &'static str {
        "key"
    }

    fn from_row(row: &AnyRow) -> Result<Self, Error> {
        model::KeyTriple::from_row(row)
    }

    fn database_id(&self) -> i64 {
        self.id
    }

    async fn load(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        self.select(db, conn).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::RawValue;
    use crate::token::{
        Class, ClassId, Comid, CryptoKey, Environment, HashEntry, InstanceId, KeyTriple,
        Measurement, Mval, ProfileId, SvnValue, TagEntry, TagId, ValueTriple, Version,
        TAG_COMID, TAG_COSE_SIGN1,
    };

    const CCA_INSTANCE_ID: [u8; 33] = [
        0x01, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x00, 0x0f, 0x0e, 0x0d, 0x0c, 0x0b, 0x0a,
        0x09, 0x08, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12, 0x11, 0x10, 0x1f, 0x1e, 0x1d, 0x1c, 0x1b,
        0x1a, 0x19, 0x18,
    ];

    fn cca_ta_corim() -> UnsignedCorim {
        let mut comid = Comid::new(TagId::from("cca-ta-comid"));

        comid.triples.attest_verif_keys.push(KeyTriple {
            environment: Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0x7f; 32])),
                    vendor: Some("ACME".to_string()),
                    ..Default::default()
                }),
                instance: Some(InstanceId::Ueid(CCA_INSTANCE_ID.to_vec())),
                ..Default::default()
            },
            verif_keys: vec![CryptoKey::PkixBase64Key(
                "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE".to_string(),
            )],
        });

        comid.triples.reference_values.push(ValueTriple {
            environment: Environment {
                class: Some(Class {
                    class_id: Some(ClassId::Bytes(vec![0x7f; 32])),
                    vendor: Some("ACME".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            measurements: vec![Measurement {
                key: None,
                val: Mval {
                    version: Some(Version {
                        version: "1.0.0".to_string(),
                        scheme: 16384,
                    }),
                    svn: Some(SvnValue::Exact(1)),
                    digests: Some(vec![HashEntry::new(1, vec![0x44; 32])]),
                    ..Default::default()
                },
                authorized_by: None,
            }],
        });

        let mut corim = UnsignedCorim::new(TagId::from("cca-ta"));
        corim.tags.push(TagEntry {
            number: TAG_COMID,
            content: comid.to_cbor().unwrap(),
        });
        corim.profile = Some(ProfileId::Uri("http://arm.com/cca/ssd/1".to_string()));

        corim
    }

    fn sign_unverified(payload: Vec<u8>) -> Vec<u8> {
        // a COSE_Sign1 wrapper with a placeholder signature; the store
        // never verifies it
        RawValue::tagged(
            TAG_COSE_SIGN1,
            RawValue::Array(vec![
                RawValue::Bytes(vec![0xa1, 0x01, 0x26]),
                RawValue::Map(vec![]),
                RawValue::Bytes(payload),
                RawValue::Bytes(vec![0x00; 64]),
            ]),
        )
        .to_cbor()
        .unwrap()
    }

    async fn open_test_store() -> Store {
        let mut cfg = Config::new("sqlite", "sqlite::memory:");
        cfg.insecure = true;

        let store = Store::open(cfg).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn add_dump_round_trip() {
        let store = open_test_store().await;

        let corim = cca_ta_corim();
        let signed = sign_unverified(corim.to_cbor().unwrap());

        store.add_bytes(&signed, "cca", true).await.unwrap();

        let manifest = store.get_manifest("cca-ta", "cca").await.unwrap();
        assert_eq!(manifest.label, "cca");
        assert!(manifest.time_added > 0);

        let dumped = manifest.to_token().unwrap();
        assert_eq!(dumped, corim);

        // triples were activated on add
        let triples = store
            .get_active_key_triples(&Environment::default(), "cca", false)
            .await
            .unwrap();
        assert_eq!(triples.len(), 1);
        assert!(triples[0].is_active);
    }

    #[tokio::test]
    async fn add_bytes_gating() {
        let store = open_test_store().await;

        let err = store.add_bytes(&[0x01, 0x02], "", false).await.unwrap_err();
        assert!(matches!(err, Error::TooShort));

        let err = store
            .add_bytes(&[0x01, 0x02, 0x03, 0x04], "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat));

        // signed rejected without insecure
        let mut cfg = Config::new("sqlite", "sqlite::memory:");
        cfg.insecure = false;
        let secure = Store::open(cfg).await.unwrap();
        secure.init().await.unwrap();

        let signed = sign_unverified(cca_ta_corim().to_cbor().unwrap());
        let err = secure.add_bytes(&signed, "", false).await.unwrap_err();
        assert!(matches!(err, Error::SignatureVerificationDisabled));
    }

    #[tokio::test]
    async fn duplicate_manifest_conflicts() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        // re-adding the same bytes conflicts on matching digests
        let err = store.add_bytes(&buf, "cca", false).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInStoreDigestsMatch));

        // a mutated payload conflicts on differing digests; flipping a
        // trailing signature-like byte would change the digest, so mutate
        // the profile text instead
        let mut corim = cca_ta_corim();
        corim.profile = Some(ProfileId::Uri("http://arm.com/cca/ssd/2".to_string()));
        let mutated = corim.to_cbor().unwrap();

        let err = store.add_bytes(&mutated, "cca", false).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInStoreDigestsDiffer));

        // force re-adds, leaving exactly one manifest row for the id
        let mut forced = open_test_store().await;
        forced.config_mut().force = true;
        forced.add_bytes(&buf, "cca", false).await.unwrap();
        forced.add_bytes(&mutated, "cca", false).await.unwrap();

        let manifest = forced.get_manifest("cca-ta", "cca").await.unwrap();
        assert_eq!(
            manifest.profile,
            "http://arm.com/cca/ssd/2".to_string()
        );

        let mut conn = forced.db().acquire().await.unwrap();
        let rows = forced
            .db()
            .fetch_all(
                &mut conn,
                "SELECT id FROM manifests WHERE manifest_id = 'cca-ta'",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn require_label() {
        let mut store = open_test_store().await;
        store.config_mut().require_label = true;

        let buf = cca_ta_corim().to_cbor().unwrap();

        let err = store.add_bytes(&buf, "", false).await.unwrap_err();
        assert!(matches!(err, Error::NoLabel));

        store.add_bytes(&buf, "cca", false).await.unwrap();

        let err = store.get_manifest("cca-ta", "").await.unwrap_err();
        assert!(matches!(err, Error::NoLabel));

        let err = store
            .get_value_triples(&Environment::default(), "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoLabel));

        store.get_manifest("cca-ta", "cca").await.unwrap();
    }

    #[tokio::test]
    async fn exact_and_loose_matching() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        // the reference-value environment has class but no instance
        let class_probe = Environment {
            class: Some(Class {
                class_id: Some(ClassId::Bytes(vec![0x7f; 32])),
                vendor: Some("ACME".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let triples = store
            .get_value_triples(&class_probe, "cca", false)
            .await
            .unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].triple_type, "reference");

        let triples = store
            .get_value_triples(&class_probe, "cca", true)
            .await
            .unwrap();
        assert_eq!(triples.len(), 1);

        // an empty probe matches everything non-exactly
        let triples = store
            .get_value_triples(&Environment::default(), "cca", false)
            .await
            .unwrap();
        assert_eq!(triples.len(), 1);

        // under exact matching, the key-triple environment (with its
        // instance set) does not match the class-only probe
        let key_triples = store
            .get_key_triples(&class_probe, "cca", false)
            .await
            .unwrap();
        assert_eq!(key_triples.len(), 1);

        let err = store
            .get_key_triples(&class_probe, "cca", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch));

        // a probe with no counterpart matches nothing
        let miss_probe = Environment {
            class: Some(Class {
                vendor: Some("Umbrella".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = store
            .get_value_triples(&miss_probe, "cca", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch));
    }

    #[tokio::test]
    async fn matching_is_monotonic() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        // every id matched exactly is also matched loosely
        let probe = model::Environment {
            class_type: Some("bytes".to_string()),
            class_bytes: Some(vec![0x7f; 32]),
            vendor: Some("ACME".to_string()),
            ..Default::default()
        };

        let exact = store.find_environment_ids(&probe, true).await.unwrap();
        let loose = store.find_environment_ids(&probe, false).await.unwrap();
        assert!(exact.iter().all(|id| loose.contains(id)));

        // an all-unset probe matches every environment loosely
        let all = store
            .find_environment_ids(&model::Environment::default(), false)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        // and only all-null rows exactly (there are none here)
        let err = store
            .find_environment_ids(&model::Environment::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoEnvironmentMatch));
    }

    #[tokio::test]
    async fn delete_collects_orphan_environments() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        let mut conn = store.db().acquire().await.unwrap();
        let rows = store
            .db()
            .fetch_all(&mut conn, "SELECT id FROM environments", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        drop(conn);

        store.delete_manifest("cca-ta", "cca").await.unwrap();

        let err = store.get_manifest("cca-ta", "cca").await.unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));

        let mut conn = store.db().acquire().await.unwrap();
        for table in ["environments", "key_triples", "value_triples", "measurements"] {
            let sql = format!("SELECT id FROM {table}");
            let rows = store.db().fetch_all(&mut conn, &sql, vec![]).await.unwrap();
            assert!(rows.is_empty(), "{table} not empty after delete");
        }
    }

    #[tokio::test]
    async fn activation() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        let err = store
            .get_active_key_triples(&Environment::default(), "cca", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch));

        store
            .set_manifests_active(&["cca-ta".to_string()], true)
            .await
            .unwrap();

        let key_triples = store
            .get_active_key_triples(&Environment::default(), "cca", false)
            .await
            .unwrap();
        assert_eq!(key_triples.len(), 1);

        let value_triples = store
            .get_active_value_triples(&Environment::default(), "cca", false)
            .await
            .unwrap();
        assert_eq!(value_triples.len(), 1);

        store
            .set_manifests_active(&["cca-ta".to_string()], false)
            .await
            .unwrap();

        let err = store
            .get_active_value_triples(&Environment::default(), "cca", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch));
    }

    #[tokio::test]
    async fn activating_empty_module_tag_fails() {
        let store = open_test_store().await;

        let mut conn = store.db().acquire().await.unwrap();
        let sql = format!(
            "INSERT INTO module_tags (tag_id_type, tag_id, tag_version, manifest_id) \
             VALUES ({})",
            store.db().dialect().placeholders(1, 4)
        );
        let id = store
            .db()
            .insert_returning_id(
                &mut conn,
                &sql,
                vec![
                    BindValue::from("string"),
                    BindValue::from("empty"),
                    BindValue::from(0i64),
                    BindValue::from(0i64),
                ],
            )
            .await
            .unwrap();
        drop(conn);

        let err = store.set_module_tags_active(&[id], true).await.unwrap_err();
        assert!(err.to_string().contains("no triples associated"));
    }

    #[tokio::test]
    async fn unsupported_conditional_endorsement() {
        let store = open_test_store().await;

        let mut comid = Comid::new(TagId::from("cond"));
        comid.triples.attest_verif_keys.push(KeyTriple {
            environment: Environment {
                instance: Some(InstanceId::Ueid(vec![0x01, 0x02])),
                ..Default::default()
            },
            verif_keys: vec![CryptoKey::PkixBase64Key("MFkw".to_string())],
        });
        comid
            .triples
            .cond_endorse_series
            .push(RawValue::Array(vec![]));

        let mut corim = UnsignedCorim::new(TagId::from("cond-series"));
        corim.tags.push(TagEntry {
            number: TAG_COMID,
            content: comid.to_cbor().unwrap(),
        });

        let err = store
            .add_bytes(&corim.to_cbor().unwrap(), "", false)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "conditional endorsement series not supported"
        );

        // nothing was stored
        let err = store.get_manifest("cond-series", "").await.unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));
    }

    #[tokio::test]
    async fn digest_algorithms() {
        let mut store = open_test_store().await;
        let input = [0xde, 0xad, 0xbe, 0xef];

        store.config_mut().hash_alg = "md5".to_string();
        assert_eq!(
            store.digest(&input).unwrap(),
            vec![
                0x2f, 0x24, 0x92, 0x30, 0xa8, 0xe7, 0xc2, 0xbf, 0x60, 0x05, 0xcc, 0xd2, 0x67,
                0x92, 0x59, 0xec,
            ]
        );

        store.config_mut().hash_alg = "sha256".to_string();
        assert_eq!(
            store.digest(&input).unwrap(),
            vec![
                0x5f, 0x78, 0xc3, 0x32, 0x74, 0xe4, 0x3f, 0xa9, 0xde, 0x56, 0x59, 0x26, 0x5c,
                0x1d, 0x91, 0x7e, 0x25, 0xc0, 0x37, 0x22, 0xdc, 0xb0, 0xb8, 0xd2, 0x7d, 0xb8,
                0xd5, 0xfe, 0xaa, 0x81, 0x39, 0x53,
            ]
        );

        store.config_mut().hash_alg = "sha512".to_string();
        assert_eq!(store.digest(&input).unwrap().len(), 64);

        store.config_mut().hash_alg = "foo".to_string();
        assert!(store.digest(&input).is_err());
    }

    #[tokio::test]
    async fn config_validation() {
        let cfg = Config::new("oracle", "foo");
        let err = Store::open(cfg).await.unwrap_err();
        assert!(err.to_string().contains("invalid DBMS"));

        let mut cfg = Config::new("sqlite", "sqlite::memory:");
        cfg.hash_alg = "crc32".to_string();
        let err = Store::open(cfg).await.unwrap_err();
        assert!(err.to_string().contains("invalid hash algorithm"));
    }

    #[tokio::test]
    async fn clear() {
        let store = open_test_store().await;

        let buf = cca_ta_corim().to_cbor().unwrap();
        store.add_bytes(&buf, "cca", false).await.unwrap();

        store.clear().await.unwrap();

        let err = store.get_manifest("cca-ta", "cca").await.unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));
    }

    #[test]
    fn dialect_exprs_via_store() {
        // expression helpers are pure functions of the dialect
        let d = crate::db::Dialect::Sqlite;
        assert_eq!(d.string_aggregator_expr("foo"), "GROUP_CONCAT(foo, ', ')");
        assert_eq!(d.concat_expr(&["foo", "bar"]), "foo || bar");
        assert_eq!(d.hex_expr("foo"), "hex(foo)");
    }
}
