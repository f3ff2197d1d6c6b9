// SPDX-License-Identifier: Apache-2.0

use std::sync::Once;

use sqlx::any::{AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{AnyConnection, AnyPool, Row};

use crate::error::Error;

/// The SQL dialects the store can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Select a dialect from a configured DBMS name. Unknown names are a
    /// fatal configuration error.
    pub fn from_dbms(name: &str) -> Result<Dialect, Error> {
        match name {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "pg" | "pgx" | "pq" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(Error::Configuration(format!("invalid DBMS: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// The bind placeholder for 1-based position `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            _ => "?".to_string(),
        }
    }

    /// `count` comma-separated placeholders starting at 1-based `start`.
    pub fn placeholders(&self, start: usize, count: usize) -> String {
        (0..count)
            .map(|i| self.placeholder(start + i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// An expression aggregating a TEXT column into a comma-separated list.
    pub fn string_aggregator_expr(&self, column_name: &str) -> String {
        match self {
            Dialect::Postgres => format!("STRING_AGG({column_name}, ', ')"),
            Dialect::MySql => format!("GROUP_CONCAT({column_name} SEPARATOR ', ')"),
            Dialect::Sqlite => format!("GROUP_CONCAT({column_name}, ', ')"),
        }
    }

    /// An expression concatenating the provided SQL tokens.
    pub fn concat_expr(&self, tokens: &[&str]) -> String {
        if tokens.is_empty() {
            return "''".to_string();
        }

        match self {
            Dialect::MySql => format!("CONCAT({})", tokens.join(", ")),
            Dialect::Postgres | Dialect::Sqlite => tokens.join(" || "),
        }
    }

    /// An expression hex-encoding a BLOB column.
    pub fn hex_expr(&self, column_name: &str) -> String {
        match self {
            Dialect::MySql | Dialect::Sqlite => format!("hex({column_name})"),
            Dialect::Postgres => format!("encode({column_name}, 'hex')"),
        }
    }

    /// Quote an identifier that collides with a keyword (e.g. `index`).
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            _ => format!("\"{ident}\""),
        }
    }

    /// The column definition of an autoincrement integer primary key.
    pub fn pk_column(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        }
    }

    pub fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BYTEA",
            _ => "BLOB",
        }
    }

    pub fn float_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "REAL",
            Dialect::Postgres => "DOUBLE PRECISION",
            Dialect::MySql => "DOUBLE",
        }
    }
}

/// A positional bind value for a runtime-assembled query.
#[derive(Debug, Clone)]
pub enum BindValue {
    Int(i64),
    OptInt(Option<i64>),
    Text(String),
    OptText(Option<String>),
    Blob(Vec<u8>),
    OptBlob(Option<Vec<u8>>),
    Float(f64),
    OptFloat(Option<f64>),
}

impl From<i64> for BindValue {
    fn from(v: i64) -> BindValue {
        BindValue::Int(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> BindValue {
        BindValue::Text(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> BindValue {
        BindValue::Text(v)
    }
}

impl From<Vec<u8>> for BindValue {
    fn from(v: Vec<u8>) -> BindValue {
        BindValue::Blob(v)
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> BindValue {
        // booleans persist as 0/1 so that all three dialects agree
        BindValue::Int(v as i64)
    }
}

type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

fn push_binds(mut query: AnyQuery<'_>, binds: Vec<BindValue>) -> AnyQuery<'_> {
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::OptInt(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::OptText(v) => query.bind(v),
            BindValue::Blob(v) => query.bind(v),
            BindValue::OptBlob(v) => query.bind(v),
            BindValue::Float(v) => query.bind(v),
            BindValue::OptFloat(v) => query.bind(v),
        };
    }

    query
}

static INSTALL_DRIVERS: Once = Once::new();

/// A connection pool plus the dialect it was opened with.
#[derive(Debug, Clone)]
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
    trace_sql: bool,
}

impl Db {
    /// Open a pool for the configured DBMS and DSN. The dialect is
    /// validated here; an unknown DBMS never reaches the driver.
    pub async fn open(dbms: &str, dsn: &str, trace_sql: bool) -> Result<Db, Error> {
        let dialect = Dialect::from_dbms(dbms)?;
        let url = normalize_dsn(dialect, dsn);

        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        // every handle onto an in-memory SQLite database must share the
        // one connection, or each sees its own empty database
        let max_connections = if dialect == Dialect::Sqlite && url.contains("memory") {
            1
        } else {
            5
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        Ok(Db {
            pool,
            dialect,
            trace_sql,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Any>, Error> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Any>, Error> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    fn trace(&self, sql: &str) {
        if self.trace_sql {
            tracing::debug!(target: "corim_store::sql", "{sql}");
        }
    }

    pub async fn execute(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        binds: Vec<BindValue>,
    ) -> Result<AnyQueryResult, Error> {
        self.trace(sql);
        Ok(push_binds(sqlx::query(sql), binds).execute(conn).await?)
    }

    pub async fn fetch_all(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        binds: Vec<BindValue>,
    ) -> Result<Vec<AnyRow>, Error> {
        self.trace(sql);
        Ok(push_binds(sqlx::query(sql), binds).fetch_all(conn).await?)
    }

    pub async fn fetch_optional(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        binds: Vec<BindValue>,
    ) -> Result<Option<AnyRow>, Error> {
        self.trace(sql);
        Ok(push_binds(sqlx::query(sql), binds)
            .fetch_optional(conn)
            .await?)
    }

    /// Run an INSERT and return the new row's autoincrement id. PostgreSQL
    /// reports it through `RETURNING`; the other dialects through the
    /// driver's last-insert-id.
    pub async fn insert_returning_id(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        binds: Vec<BindValue>,
    ) -> Result<i64, Error> {
        if self.dialect == Dialect::Postgres {
            let sql = format!("{sql} RETURNING id");
            self.trace(&sql);
            let row = push_binds(sqlx::query(&sql), binds).fetch_one(conn).await?;
            Ok(row.try_get::<i64, _>(0)?)
        } else {
            self.trace(sql);
            let result = push_binds(sqlx::query(sql), binds).execute(conn).await?;
            result
                .last_insert_id()
                .ok_or_else(|| Error::Configuration("driver reported no insert id".to_string()))
        }
    }
}

fn normalize_dsn(dialect: Dialect, dsn: &str) -> String {
    for scheme in ["sqlite:", "postgres:", "postgresql:", "mysql:", "mariadb:"] {
        if dsn.starts_with(scheme) {
            return dsn.to_string();
        }
    }

    match dialect {
        Dialect::Sqlite => {
            // accept Go-style file: DSNs
            let path = dsn.strip_prefix("file:").unwrap_or(dsn);

            if path.contains(":memory:") || path.contains("mode=memory") {
                return format!("sqlite:{path}");
            }

            // mode=rwc so that a missing database file is created
            if path.contains('?') {
                format!("sqlite:{path}&mode=rwc")
            } else {
                format!("sqlite:{path}?mode=rwc")
            }
        }
        Dialect::Postgres => format!("postgres://{dsn}"),
        Dialect::MySql => format!("mysql://{dsn}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dialect_selection() {
        for name in ["sqlite", "sqlite3"] {
            assert_eq!(Dialect::from_dbms(name).unwrap(), Dialect::Sqlite);
        }
        for name in ["postgres", "pg", "pgx", "pq"] {
            assert_eq!(Dialect::from_dbms(name).unwrap(), Dialect::Postgres);
        }
        for name in ["mysql", "mariadb"] {
            assert_eq!(Dialect::from_dbms(name).unwrap(), Dialect::MySql);
        }

        let err = Dialect::from_dbms("oracle").unwrap_err();
        assert_eq!(err.to_string(), "configuration error: invalid DBMS: oracle");
    }

    #[test]
    fn string_aggregator_expr() {
        assert_eq!(
            Dialect::Sqlite.string_aggregator_expr("foo"),
            "GROUP_CONCAT(foo, ', ')"
        );
        assert_eq!(
            Dialect::MySql.string_aggregator_expr("foo"),
            "GROUP_CONCAT(foo SEPARATOR ', ')"
        );
        assert_eq!(
            Dialect::Postgres.string_aggregator_expr("foo"),
            "STRING_AGG(foo, ', ')"
        );
    }

    #[test]
    fn concat_expr() {
        assert_eq!(Dialect::Sqlite.concat_expr(&["foo", "bar"]), "foo || bar");
        assert_eq!(Dialect::Postgres.concat_expr(&["foo", "bar"]), "foo || bar");
        assert_eq!(
            Dialect::MySql.concat_expr(&["foo", "bar"]),
            "CONCAT(foo, bar)"
        );
        assert_eq!(Dialect::Sqlite.concat_expr(&[]), "''");
    }

    #[test]
    fn hex_expr() {
        assert_eq!(Dialect::Sqlite.hex_expr("foo"), "hex(foo)");
        assert_eq!(Dialect::MySql.hex_expr("foo"), "hex(foo)");
        assert_eq!(Dialect::Postgres.hex_expr("foo"), "encode(foo, 'hex')");
    }

    #[test]
    fn placeholders() {
        assert_eq!(Dialect::Sqlite.placeholders(1, 3), "?, ?, ?");
        assert_eq!(Dialect::Postgres.placeholders(2, 3), "$2, $3, $4");
    }

    #[test]
    fn dsn_normalization() {
        assert_eq!(
            normalize_dsn(Dialect::Sqlite, "file:store.db?cache=shared"),
            "sqlite:store.db?cache=shared&mode=rwc"
        );
        assert_eq!(
            normalize_dsn(Dialect::Sqlite, "sqlite::memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            normalize_dsn(Dialect::Sqlite, ":memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            normalize_dsn(Dialect::Postgres, "user:pw@localhost/corim"),
            "postgres://user:pw@localhost/corim"
        );
        assert_eq!(
            normalize_dsn(Dialect::MySql, "mysql://db/corim"),
            "mysql://db/corim"
        );
    }
}
