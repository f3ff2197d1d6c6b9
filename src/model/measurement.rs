// SPDX-License-Identifier: Apache-2.0

use sqlx::AnyConnection;
use sqlx::Row;
use uuid::Uuid;

use crate::db::{BindValue, Db};
use crate::error::Error;
use crate::model::crypto_key::{crypto_keys_from_token, crypto_keys_to_token, CryptoKey};
use crate::model::digest::{digests_from_token, digests_to_token, Digest};
use crate::model::extension::{extensions_from_token, extensions_to_token, ExtensionValue};
use crate::model::flag::{flags_from_token, flags_to_token, Flag};
use crate::model::integrity_register::{
    integrity_registers_from_token, integrity_registers_to_token, IntegrityRegister,
};
use crate::token::{self, parse_version_scheme, Mkey, Mval, SvnValue, Version};

pub const MVAL_VERSION: i64 = 0;
pub const MVAL_SVN: i64 = 1;
pub const MVAL_DIGESTS: i64 = 2;
pub const MVAL_FLAGS: i64 = 3;
pub const MVAL_RAW_VALUE: i64 = 4;
pub const MVAL_MAC_ADDR: i64 = 6;
pub const MVAL_IP_ADDR: i64 = 7;
pub const MVAL_SERIAL_NUMBER: i64 = 8;
pub const MVAL_UEID: i64 = 9;
pub const MVAL_UUID: i64 = 10;
pub const MVAL_NAME: i64 = 11;
pub const MVAL_CRYPTO_KEYS: i64 = 13;
pub const MVAL_INTEGRITY_REGISTERS: i64 = 14;

/// One scalar measurement value: the code point it came from, a
/// sub-discriminant, and exactly one populated value slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementValueEntry {
    pub id: i64,

    pub code_point: i64,
    pub value_type: String,
    pub value_bytes: Option<Vec<u8>>,
    pub value_text: Option<String>,
    pub value_int: Option<i64>,

    pub measurement_id: i64,
}

impl MeasurementValueEntry {
    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO measurement_value_entries (code_point, value_type, value_bytes, \
             value_text, value_int, measurement_id) VALUES ({})",
            d.placeholders(1, 6)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::from(self.code_point),
                    BindValue::from(self.value_type.clone()),
                    BindValue::OptBlob(self.value_bytes.clone()),
                    BindValue::OptText(self.value_text.clone()),
                    BindValue::OptInt(self.value_int),
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
            "DELETE FROM measurement_value_entries WHERE id = {}",
            db.dialect().placeholder(1)
        );
        db.execute(conn, &sql, vec![BindValue::from(self.id)]).await?;

        Ok(())
    }

    pub async fn select_for_measurement(
        db: &Db,
        conn: &mut AnyConnection,
        measurement_id: i64,
    ) -> Result<Vec<MeasurementValueEntry>, Error> {
        let sql = format!(
            "SELECT id, code_point, value_type, value_bytes, value_text, value_int, \
             measurement_id FROM measurement_value_entries WHERE measurement_id = {} \
             ORDER BY id",
            db.dialect().placeholder(1)
        );

        let rows = db
            .fetch_all(conn, &sql, vec![BindValue::from(measurement_id)])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(MeasurementValueEntry {
                    id: row.try_get("id")?,
                    code_point: row.try_get("code_point")?,
                    value_type: row.try_get("value_type")?,
                    value_bytes: row.try_get("value_bytes")?,
                    value_text: row.try_get("value_text")?,
                    value_int: row.try_get("value_int")?,
                    measurement_id: row.try_get("measurement_id")?,
                })
            })
            .collect()
    }
}

/// One measurement row with all of its satellite tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub id: i64,

    pub key_type: Option<String>,
    pub key_bytes: Option<Vec<u8>>,

    pub value_entries: Vec<MeasurementValueEntry>,
    pub digests: Vec<Digest>,
    pub flags: Vec<Flag>,
    pub integrity_registers: Vec<IntegrityRegister>,
    pub extensions: Vec<ExtensionValue>,

    /// code-point-13 measurement value keys, owner type `measurement`
    pub crypto_keys: Vec<CryptoKey>,
    /// authorizing keys, owner type `measurement_auth`
    pub authorized_by: Vec<CryptoKey>,

    pub owner_id: i64,
    pub owner_type: String,
}

impl Measurement {
    pub fn from_token(origin: &token::Measurement) -> Result<Measurement, Error> {
        let mut ret = Measurement::default();

        if let Some(key) = &origin.key {
            ret.key_type = Some(key.type_name());
            ret.key_bytes = Some(key.store_bytes());
        }

        let val = &origin.val;

        if let Some(version) = &val.version {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_VERSION,
                value_type: version.scheme_name(),
                value_text: Some(version.version.clone()),
                ..Default::default()
            });
        }

        if let Some(svn) = &val.svn {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_SVN,
                value_type: svn.type_name().to_string(),
                value_int: Some(svn.value()),
                ..Default::default()
            });
        }

        if let Some(digests) = &val.digests {
            ret.digests = digests_from_token(digests);
        }

        ret.flags = flags_from_token(val.flags.as_ref());

        if let Some(bytes) = &val.raw_value {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_RAW_VALUE,
                value_type: "bytes".to_string(),
                value_bytes: Some(bytes.clone()),
                ..Default::default()
            });
        }

        if let Some(bytes) = &val.mac_addr {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_MAC_ADDR,
                value_type: "bytes".to_string(),
                value_bytes: Some(bytes.clone()),
                ..Default::default()
            });
        }

        if let Some(bytes) = &val.ip_addr {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_IP_ADDR,
                value_type: "bytes".to_string(),
                value_bytes: Some(bytes.clone()),
                ..Default::default()
            });
        }

        if let Some(serial) = &val.serial_number {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_SERIAL_NUMBER,
                value_type: "string".to_string(),
                value_text: Some(serial.clone()),
                ..Default::default()
            });
        }

        if let Some(bytes) = &val.ueid {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_UEID,
                value_type: "bytes".to_string(),
                value_bytes: Some(bytes.clone()),
                ..Default::default()
            });
        }

        if let Some(uuid) = &val.uuid {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_UUID,
                value_type: "bytes".to_string(),
                value_bytes: Some(uuid.as_bytes().to_vec()),
                ..Default::default()
            });
        }

        if let Some(name) = &val.name {
            ret.value_entries.push(MeasurementValueEntry {
                code_point: MVAL_NAME,
                value_type: "string".to_string(),
                value_text: Some(name.clone()),
                ..Default::default()
            });
        }

        if let Some(keys) = &val.crypto_keys {
            ret.crypto_keys = crypto_keys_from_token(keys);
        }

        ret.integrity_registers =
            integrity_registers_from_token(val.integrity_registers.as_ref());

        ret.extensions = extensions_from_token(&val.extensions)?;

        if let Some(auth) = &origin.authorized_by {
            ret.authorized_by = crypto_keys_from_token(auth);
        }

        Ok(ret)
    }

    pub fn to_token(&self) -> Result<token::Measurement, Error> {
        let mut mval = Mval::default();

        let key = match (&self.key_type, &self.key_bytes) {
            (Some(key_type), Some(key_bytes)) => Some(Mkey::from_parts(key_type, key_bytes)?),
            (None, None) => None,
            _ => return Err(Error::NullMismatch("key_type and key_bytes".to_string())),
        };

        for entry in &self.value_entries {
            match entry.code_point {
                MVAL_VERSION => {
                    let version = entry.value_text.clone().ok_or_else(|| {
                        Error::Validation(format!("missing version data: {entry:?}"))
                    })?;

                    mval.version = Some(Version {
                        version,
                        scheme: parse_version_scheme(&entry.value_type)?,
                    });
                }
                MVAL_SVN => {
                    let value = entry.value_int.ok_or_else(|| {
                        Error::Validation(format!("missing SVN data: {entry:?}"))
                    })?;

                    mval.svn = Some(SvnValue::from_parts(&entry.value_type, value)?);
                }
                MVAL_RAW_VALUE => {
                    mval.raw_value = Some(entry_bytes(entry, "RawValue")?);
                }
                MVAL_MAC_ADDR => {
                    mval.mac_addr = Some(entry_bytes(entry, "MACAddr")?);
                }
                MVAL_IP_ADDR => {
                    mval.ip_addr = Some(entry_bytes(entry, "IPAddr")?);
                }
                MVAL_SERIAL_NUMBER => {
                    mval.serial_number = Some(entry_text(entry, "SerialNumber")?);
                }
                MVAL_UEID => {
                    mval.ueid = Some(entry_bytes(entry, "UEID")?);
                }
                MVAL_UUID => {
                    let bytes = entry_bytes(entry, "UUID")?;
                    mval.uuid = Some(
                        Uuid::from_slice(&bytes)
                            .map_err(|e| Error::invalid("UUID", e.to_string()))?,
                    );
                }
                MVAL_NAME => {
                    mval.name = Some(entry_text(entry, "Name")?);
                }
                MVAL_DIGESTS | MVAL_FLAGS => {
                    return Err(Error::MisplacedValue(entry.code_point));
                }
                other => {
                    return Err(Error::UnexpectedCodepoint(other));
                }
            }
        }

        if !self.digests.is_empty() {
            mval.digests = Some(digests_to_token(&self.digests));
        }

        mval.flags = flags_to_token(&self.flags);

        mval.integrity_registers = integrity_registers_to_token(&self.integrity_registers)?;

        mval.extensions = extensions_to_token(&self.extensions)?;

        if !self.crypto_keys.is_empty() {
            mval.crypto_keys = Some(crypto_keys_to_token(&self.crypto_keys)?);
        }

        let authorized_by = if self.authorized_by.is_empty() {
            None
        } else {
            Some(crypto_keys_to_token(&self.authorized_by)?)
        };

        Ok(token::Measurement {
            key,
            val: mval,
            authorized_by,
        })
    }

    pub async fn insert(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        let d = db.dialect();
        let sql = format!(
            "INSERT INTO measurements (key_type, key_bytes, owner_id, owner_type) VALUES ({})",
            d.placeholders(1, 4)
        );

        self.id = db
            .insert_returning_id(
                conn,
                &sql,
                vec![
                    BindValue::OptText(self.key_type.clone()),
                    BindValue::OptBlob(self.key_bytes.clone()),
                    BindValue::from(self.owner_id),
                    BindValue::from(self.owner_type.clone()),
                ],
            )
            .await?;

        for entry in self.value_entries.iter_mut() {
            entry.measurement_id = self.id;

            entry.insert(db, conn).await.map_err(|e| {
                Error::Validation(format!("error inserting value entry {entry:?}: {e}"))
            })?;
        }

        for (i, digest) in self.digests.iter_mut().enumerate() {
            digest.owner_id = self.id;
            digest.owner_type = "measurement".to_string();

            digest
                .insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting digest {i}: {e}")))?;
        }

        for flag in self.flags.iter_mut() {
            flag.measurement_id = self.id;

            flag.insert(db, conn).await.map_err(|e| {
                Error::Validation(format!("error inserting flag {}: {e}", flag.code_point))
            })?;
        }

        for (i, register) in self.integrity_registers.iter_mut().enumerate() {
            register.measurement_id = self.id;

            register.insert(db, conn).await.map_err(|e| {
                Error::Validation(format!(
                    "error inserting integrity register at index {i}: {e}"
                ))
            })?;
        }

        for ext in self.extensions.iter_mut() {
            ext.owner_id = self.id;
            ext.owner_type = "measurement".to_string();

            ext.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting extension: {e}")))?;
        }

        for key in self.crypto_keys.iter_mut() {
            key.owner_id = self.id;
            key.owner_type = "measurement".to_string();

            key.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting crypto key: {e}")))?;
        }

        for key in self.authorized_by.iter_mut() {
            key.owner_id = self.id;
            key.owner_type = "measurement_auth".to_string();

            key.insert(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("error inserting crypto key: {e}")))?;
        }

        Ok(())
    }

    pub async fn select(&mut self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        self.value_entries =
            MeasurementValueEntry::select_for_measurement(db, conn, self.id).await?;
        self.digests = Digest::select_owned(db, conn, self.id, "measurement").await?;
        self.flags = Flag::select_for_measurement(db, conn, self.id).await?;
        self.integrity_registers =
            IntegrityRegister::select_for_measurement(db, conn, self.id).await?;
        self.extensions = ExtensionValue::select_owned(db, conn, self.id, "measurement").await?;
        self.crypto_keys = CryptoKey::select_owned(db, conn, self.id, "measurement").await?;
        self.authorized_by =
            CryptoKey::select_owned(db, conn, self.id, "measurement_auth").await?;

        Ok(())
    }

    pub async fn delete(&self, db: &Db, conn: &mut AnyConnection) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::IdNotSet);
        }

        for (i, key) in self.authorized_by.iter().enumerate() {
            key.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("authorized-by key at index {i}: {e}")))?;
        }

        for (i, key) in self.crypto_keys.iter().enumerate() {
            key.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("crypto key at index {i}: {e}")))?;
        }

        for (i, digest) in self.digests.iter().enumerate() {
            digest
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("digest at index {i}: {e}")))?;
        }

        for (i, flag) in self.flags.iter().enumerate() {
            flag.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("flag at index {i}: {e}")))?;
        }

        for (i, register) in self.integrity_registers.iter().enumerate() {
            register
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("integrity register at index {i}: {e}")))?;
        }

        for (i, entry) in self.value_entries.iter().enumerate() {
            entry
                .delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("value entry at index {i}: {e}")))?;
        }

        for (i, ext) in self.extensions.iter().enumerate() {
            ext.delete(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("extension at index {i}: {e}")))?;
        }

        let sql = format!(
            "DELETE FROM measurements WHERE id = {}",
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
    ) -> Result<Vec<Measurement>, Error> {
        let d = db.dialect();
        let sql = format!(
            "SELECT id, key_type, key_bytes, owner_id, owner_type FROM measurements \
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

        let mut ret: Vec<Measurement> = rows
            .iter()
            .map(|row| {
                Ok(Measurement {
                    id: row.try_get("id")?,
                    key_type: row.try_get("key_type")?,
                    key_bytes: row.try_get("key_bytes")?,
                    owner_id: row.try_get("owner_id")?,
                    owner_type: row.try_get("owner_type")?,
                    ..Default::default()
                })
            })
            .collect::<Result<_, Error>>()?;

        for (i, measurement) in ret.iter_mut().enumerate() {
            measurement
                .select(db, conn)
                .await
                .map_err(|e| Error::Validation(format!("measurement at index {i}: {e}")))?;
        }

        Ok(ret)
    }
}

fn entry_bytes(entry: &MeasurementValueEntry, what: &str) -> Result<Vec<u8>, Error> {
    if entry.value_type != "bytes" {
        return Err(Error::Validation(format!(
            "unexpected {what} type: {}",
            entry.value_type
        )));
    }

    entry
        .value_bytes
        .clone()
        .ok_or_else(|| Error::Validation(format!("missing {what} data: {entry:?}")))
}

fn entry_text(entry: &MeasurementValueEntry, what: &str) -> Result<String, Error> {
    if entry.value_type != "string" {
        return Err(Error::Validation(format!(
            "unexpected {what} type: {}",
            entry.value_type
        )));
    }

    entry
        .value_text
        .clone()
        .ok_or_else(|| Error::Validation(format!("missing {what} data: {entry:?}")))
}

pub(crate) fn measurements_from_token(
    origin: &[token::Measurement],
) -> Result<Vec<Measurement>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, measurement)| {
            Measurement::from_token(measurement).map_err(|e| {
                Error::Validation(format!("could not construct measurement at index {i}: {e}"))
            })
        })
        .collect()
}

pub(crate) fn measurements_to_token(
    origin: &[Measurement],
) -> Result<Vec<token::Measurement>, Error> {
    origin
        .iter()
        .enumerate()
        .map(|(i, measurement)| {
            measurement.to_token().map_err(|e| {
                Error::Validation(format!("could not convert measurement at index {i}: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::{FlagsMap, HashEntry};

    fn sample_token_measurement() -> token::Measurement {
        let mut flags = FlagsMap::default();
        flags.is_secure = Some(true);

        token::Measurement {
            key: Some(Mkey::Uint(2)),
            val: Mval {
                version: Some(Version {
                    version: "1.2.3".to_string(),
                    scheme: 16384,
                }),
                svn: Some(SvnValue::Min(3)),
                digests: Some(vec![HashEntry::new(1, vec![0x01; 32])]),
                flags: Some(flags),
                raw_value: Some(vec![0xde, 0xad]),
                serial_number: Some("ZX-99".to_string()),
                name: Some("boot-fw".to_string()),
                ..Default::default()
            },
            authorized_by: Some(vec![token::CryptoKey::PkixBase64Key("MFkw".to_string())]),
        }
    }

    #[test]
    fn token_round_trip() {
        let origin = sample_token_measurement();

        let row = Measurement::from_token(&origin).unwrap();
        assert_eq!(row.key_type.as_deref(), Some("uint"));
        assert_eq!(row.value_entries.len(), 5);
        assert_eq!(row.digests.len(), 1);
        assert_eq!(row.flags.len(), 1);
        assert_eq!(row.authorized_by.len(), 1);

        assert_eq!(row.to_token().unwrap(), origin);
    }

    #[test]
    fn version_entry_shape() {
        let origin = sample_token_measurement();
        let row = Measurement::from_token(&origin).unwrap();

        let version = &row.value_entries[0];
        assert_eq!(version.code_point, MVAL_VERSION);
        assert_eq!(version.value_type, "semver");
        assert_eq!(version.value_text.as_deref(), Some("1.2.3"));

        let svn = &row.value_entries[1];
        assert_eq!(svn.code_point, MVAL_SVN);
        assert_eq!(svn.value_type, "min-value");
        assert_eq!(svn.value_int, Some(3));
    }

    #[test]
    fn misplaced_value_entries() {
        let row = Measurement {
            value_entries: vec![MeasurementValueEntry {
                code_point: MVAL_DIGESTS,
                value_type: "bytes".to_string(),
                value_bytes: Some(vec![0x01]),
                ..Default::default()
            }],
            ..Default::default()
        };

        let err = row.to_token().unwrap_err();
        assert!(matches!(err, Error::MisplacedValue(MVAL_DIGESTS)));
    }

    #[test]
    fn unexpected_code_point() {
        let row = Measurement {
            value_entries: vec![MeasurementValueEntry {
                code_point: 99,
                value_type: "bytes".to_string(),
                value_bytes: Some(vec![0x01]),
                ..Default::default()
            }],
            ..Default::default()
        };

        let err = row.to_token().unwrap_err();
        assert!(matches!(err, Error::UnexpectedCodepoint(99)));
    }

    #[test]
    fn mval_crypto_keys() {
        let origin = token::Measurement {
            key: None,
            val: Mval {
                crypto_keys: Some(vec![token::CryptoKey::Bytes(vec![0x0a])]),
                ..Default::default()
            },
            authorized_by: None,
        };

        let row = Measurement::from_token(&origin).unwrap();
        assert_eq!(row.crypto_keys.len(), 1);
        assert!(row.authorized_by.is_empty());

        assert_eq!(row.to_token().unwrap(), origin);
    }
}
