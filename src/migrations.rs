// SPDX-License-Identifier: Apache-2.0

//! Versioned schema migrations.
//!
//! Migrations are plain SQL, rendered per dialect, applied serially in
//! registration order and recorded in a meta table. A lock row in a
//! second meta table prevents two processes from migrating concurrently.

use chrono::Utc;

use crate::db::{BindValue, Db, Dialect};
use crate::error::Error;

const MIGRATIONS_TABLE: &str = "corim_store_migrations";
const LOCKS_TABLE: &str = "corim_store_migration_locks";

pub struct Migration {
    pub name: &'static str,
    pub up: fn(Dialect) -> Vec<String>,
    pub down: fn(Dialect) -> Vec<String>,
}

/// All registered migrations, oldest first.
pub fn migrations() -> Vec<Migration> {
    vec![Migration {
        name: "0000_initial",
        up: initial_up,
        down: initial_down,
    }]
}

pub struct Migrator<'a> {
    db: &'a Db,
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a Db) -> Migrator<'a> {
        Migrator { db }
    }

    /// Create the migration meta tables.
    pub async fn init(&self) -> Result<(), Error> {
        let d = self.db.dialect();
        let mut conn = self.db.acquire().await?;

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (\
             id {pk}, name TEXT NOT NULL, group_id BIGINT NOT NULL, \
             migrated_at BIGINT NOT NULL)",
            pk = d.pk_column()
        );
        self.db.execute(&mut conn, &sql, vec![]).await?;

        // VARCHAR rather than TEXT: MySQL cannot enforce UNIQUE on TEXT
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {LOCKS_TABLE} (\
             id {pk}, table_name VARCHAR(255) NOT NULL UNIQUE)",
            pk = d.pk_column()
        );
        self.db.execute(&mut conn, &sql, vec![]).await?;

        Ok(())
    }

    /// Take the migration lock. Fails if another process holds it.
    pub async fn lock(&self) -> Result<(), Error> {
        let d = self.db.dialect();
        let mut conn = self.db.acquire().await?;

        let sql = format!(
            "INSERT INTO {LOCKS_TABLE} (table_name) VALUES ({})",
            d.placeholder(1)
        );

        self.db
            .execute(&mut conn, &sql, vec![BindValue::from(MIGRATIONS_TABLE)])
            .await
            .map_err(|e| {
                Error::Configuration(format!("could not acquire migration lock: {e}"))
            })?;

        Ok(())
    }

    pub async fn unlock(&self) -> Result<(), Error> {
        let d = self.db.dialect();
        let mut conn = self.db.acquire().await?;

        let sql = format!(
            "DELETE FROM {LOCKS_TABLE} WHERE table_name = {}",
            d.placeholder(1)
        );

        self.db
            .execute(&mut conn, &sql, vec![BindValue::from(MIGRATIONS_TABLE)])
            .await?;

        Ok(())
    }

    /// Apply all pending migrations under the lock. Returns the number
    /// applied.
    pub async fn migrate(&self) -> Result<usize, Error> {
        self.lock().await?;
        let ret = self.migrate_locked().await;
        self.unlock().await?;
        ret
    }

    async fn migrate_locked(&self) -> Result<usize, Error> {
        let d = self.db.dialect();
        let applied = self.applied().await?;
        let group_id = self.last_group_id().await? + 1;

        let mut count = 0;

        for migration in migrations() {
            if applied.contains(&migration.name.to_string()) {
                continue;
            }

            let mut tx = self.db.begin().await?;

            for sql in (migration.up)(d) {
                self.db.execute(&mut *tx, &sql, vec![]).await?;
            }

            let sql = format!(
                "INSERT INTO {MIGRATIONS_TABLE} (name, group_id, migrated_at) \
                 VALUES ({})",
                d.placeholders(1, 3)
            );
            self.db
                .execute(
                    &mut *tx,
                    &sql,
                    vec![
                        BindValue::from(migration.name),
                        BindValue::from(group_id),
                        BindValue::from(Utc::now().timestamp()),
                    ],
                )
                .await?;

            tx.commit().await?;
            count += 1;
        }

        Ok(count)
    }

    /// Revert the most recently applied migration group. Returns the
    /// number reverted.
    pub async fn rollback(&self) -> Result<usize, Error> {
        self.lock().await?;
        let ret = self.rollback_locked().await;
        self.unlock().await?;
        ret
    }

    async fn rollback_locked(&self) -> Result<usize, Error> {
        let d = self.db.dialect();
        let group_id = self.last_group_id().await?;

        if group_id == 0 {
            return Ok(0);
        }

        let sql = format!(
            "SELECT name FROM {MIGRATIONS_TABLE} WHERE group_id = {} ORDER BY id DESC",
            d.placeholder(1)
        );
        let mut conn = self.db.acquire().await?;
        let rows = self
            .db
            .fetch_all(&mut conn, &sql, vec![BindValue::from(group_id)])
            .await?;
        drop(conn);

        let names: Vec<String> = rows
            .iter()
            .map(|row| sqlx::Row::try_get::<String, _>(row, 0))
            .collect::<Result<_, _>>()?;

        let registered = migrations();
        let mut count = 0;

        for name in names {
            let migration = registered
                .iter()
                .find(|m| m.name == name)
                .ok_or_else(|| Error::Configuration(format!("unknown migration: {name}")))?;

            let mut tx = self.db.begin().await?;

            for sql in (migration.down)(d) {
                self.db.execute(&mut *tx, &sql, vec![]).await?;
            }

            let sql = format!(
                "DELETE FROM {MIGRATIONS_TABLE} WHERE name = {}",
                d.placeholder(1)
            );
            self.db
                .execute(&mut *tx, &sql, vec![BindValue::from(name)])
                .await?;

            tx.commit().await?;
            count += 1;
        }

        Ok(count)
    }

    /// The names of applied migrations.
    pub async fn applied(&self) -> Result<Vec<String>, Error> {
        let sql = format!("SELECT name FROM {MIGRATIONS_TABLE} ORDER BY id");
        let mut conn = self.db.acquire().await?;
        let rows = self.db.fetch_all(&mut conn, &sql, vec![]).await?;

        rows.iter()
            .map(|row| sqlx::Row::try_get::<String, _>(row, 0).map_err(Error::from))
            .collect()
    }

    /// Migration status: (name, applied) per registered migration.
    pub async fn status(&self) -> Result<Vec<(String, bool)>, Error> {
        let applied = self.applied().await?;

        Ok(migrations()
            .iter()
            .map(|m| (m.name.to_string(), applied.contains(&m.name.to_string())))
            .collect())
    }

    async fn last_group_id(&self) -> Result<i64, Error> {
        let sql = format!("SELECT MAX(group_id) FROM {MIGRATIONS_TABLE}");
        let mut conn = self.db.acquire().await?;
        let row = self.db.fetch_optional(&mut conn, &sql, vec![]).await?;

        match row {
            Some(row) => Ok(sqlx::Row::try_get::<Option<i64>, _>(&row, 0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}

/// The 16 core tables, as CREATE statements for the given dialect.
pub fn initial_up(d: Dialect) -> Vec<String> {
    let pk = d.pk_column();
    let blob = d.blob_type();
    let float = d.float_type();
    let index_col = d.quote("index");

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS manifests (\
             id {pk}, \
             manifest_id_type TEXT NOT NULL, \
             manifest_id TEXT NOT NULL, \
             digest {blob}, \
             time_added BIGINT, \
             label TEXT, \
             profile_type TEXT, \
             profile TEXT, \
             not_before BIGINT, \
             not_after BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS locators (\
             id {pk}, \
             href TEXT NOT NULL, \
             manifest_id BIGINT NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS module_tags (\
             id {pk}, \
             tag_id_type TEXT NOT NULL, \
             tag_id TEXT NOT NULL, \
             tag_version BIGINT NOT NULL, \
             language TEXT, \
             manifest_id BIGINT NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS entities (\
             id {pk}, \
             name_type TEXT NOT NULL, \
             name TEXT NOT NULL, \
             uri TEXT, \
             owner_id BIGINT, \
             owner_type TEXT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS roles (\
             id {pk}, \
             role TEXT NOT NULL, \
             entity_id BIGINT NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS linked_tags (\
             id {pk}, \
             linked_tag_id_type TEXT NOT NULL, \
             linked_tag_id TEXT NOT NULL, \
             tag_relation TEXT NOT NULL, \
             module_id BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS value_triples (\
             id {pk}, \
             environment_id BIGINT, \
             type TEXT NOT NULL, \
             is_active INTEGER NOT NULL DEFAULT 0, \
             module_id BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS key_triples (\
             id {pk}, \
             environment_id BIGINT, \
             type TEXT NOT NULL, \
             is_active INTEGER NOT NULL DEFAULT 0, \
             module_id BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS cryptokeys (\
             id {pk}, \
             key_type TEXT NOT NULL, \
             key_bytes {blob} NOT NULL, \
             owner_id BIGINT, \
             owner_type TEXT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS environments (\
             id {pk}, \
             class_type TEXT, \
             class_bytes {blob}, \
             vendor TEXT, \
             model TEXT, \
             layer BIGINT, \
             {index_col} BIGINT, \
             instance_type TEXT, \
             instance_bytes {blob}, \
             group_type TEXT, \
             group_bytes {blob})"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS measurements (\
             id {pk}, \
             key_type TEXT, \
             key_bytes {blob}, \
             owner_id BIGINT, \
             owner_type TEXT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS measurement_value_entries (\
             id {pk}, \
             code_point BIGINT NOT NULL, \
             value_type TEXT NOT NULL, \
             value_bytes {blob}, \
             value_text TEXT, \
             value_int BIGINT, \
             measurement_id BIGINT NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS digests (\
             id {pk}, \
             alg_id BIGINT NOT NULL, \
             value {blob} NOT NULL, \
             owner_id BIGINT, \
             owner_type TEXT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS flags (\
             id {pk}, \
             code_point BIGINT NOT NULL, \
             value INTEGER NOT NULL, \
             measurement_id BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS integrity_registers (\
             id {pk}, \
             index_uint BIGINT, \
             index_text TEXT, \
             measurement_id BIGINT)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS extensions (\
             id {pk}, \
             field_kind TEXT NOT NULL, \
             field_name TEXT NOT NULL, \
             json_tag TEXT NOT NULL, \
             cbor_tag TEXT NOT NULL, \
             value_bytes {blob}, \
             value_text TEXT, \
             value_int BIGINT, \
             value_float {float}, \
             owner_id BIGINT, \
             owner_type TEXT)"
        ),
    ]
}

pub fn initial_down(_d: Dialect) -> Vec<String> {
    [
        "manifests",
        "locators",
        "module_tags",
        "entities",
        "roles",
        "linked_tags",
        "value_triples",
        "key_triples",
        "cryptokeys",
        "environments",
        "measurements",
        "measurement_value_entries",
        "digests",
        "flags",
        "integrity_registers",
        "extensions",
    ]
    .iter()
    .map(|table| format!("DROP TABLE IF EXISTS {table}"))
    .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_covers_core_tables() {
        for d in [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql] {
            let up = initial_up(d);
            assert_eq!(up.len(), 16);

            let down = initial_down(d);
            assert_eq!(down.len(), 16);
        }
    }

    #[test]
    fn dialect_column_types() {
        let up = initial_up(Dialect::Postgres);
        assert!(up.iter().any(|sql| sql.contains("BIGSERIAL PRIMARY KEY")));
        assert!(up.iter().any(|sql| sql.contains("BYTEA")));

        let up = initial_up(Dialect::MySql);
        assert!(up.iter().any(|sql| sql.contains("`index`")));

        let up = initial_up(Dialect::Sqlite);
        assert!(up.iter().any(|sql| sql.contains("\"index\"")));
    }

    #[tokio::test]
    async fn migrate_and_rollback() {
        let db = Db::open("sqlite", "sqlite::memory:", false).await.unwrap();
        let migrator = Migrator::new(&db);

        migrator.init().await.unwrap();

        let applied = migrator.migrate().await.unwrap();
        assert_eq!(applied, 1);

        let status = migrator.status().await.unwrap();
        assert_eq!(status, vec![("0000_initial".to_string(), true)]);

        // re-running applies nothing further
        let applied = migrator.migrate().await.unwrap();
        assert_eq!(applied, 0);

        let reverted = migrator.rollback().await.unwrap();
        assert_eq!(reverted, 1);

        let status = migrator.status().await.unwrap();
        assert_eq!(status, vec![("0000_initial".to_string(), false)]);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let db = Db::open("sqlite", "sqlite::memory:", false).await.unwrap();
        let migrator = Migrator::new(&db);

        migrator.init().await.unwrap();

        migrator.lock().await.unwrap();
        let err = migrator.lock().await.unwrap_err();
        assert!(err.to_string().contains("could not acquire migration lock"));

        migrator.unlock().await.unwrap();
        migrator.lock().await.unwrap();
        migrator.unlock().await.unwrap();
    }
}
