use super::{now_millis, Filter, Order, RecordStore, Row, Table};
use crate::error::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tributes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  author_name TEXT NOT NULL,
  message TEXT NOT NULL,
  imageUrl TEXT NOT NULL DEFAULT '',
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS comments (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  tribute_id INTEGER NOT NULL REFERENCES tributes(id),
  author_name TEXT NOT NULL,
  message TEXT NOT NULL,
  created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS comments_by_tribute ON comments(tribute_id, created_at);

CREATE TABLE IF NOT EXISTS donations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  amount INTEGER NOT NULL CHECK (amount > 0),
  donor_name TEXT NOT NULL,
  payment_status TEXT NOT NULL,
  payment_id TEXT UNIQUE NOT NULL,
  payment_method TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS image_groups (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT UNIQUE NOT NULL,
  created_at INTEGER NOT NULL
);
"#;

/// Record store on a local SQLite file.
///
/// Foreign keys are enforced and comments do not cascade, so a tribute with
/// comments cannot be deleted until its comments are gone.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: Pool<SqliteConnectionManager>,
    last_created: Arc<Mutex<i64>>,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        Self::with_pool(Pool::new(manager)?)
    }

    /// A private in-memory database. The pool holds a single connection so
    /// every call sees the same data.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        Self::with_pool(Pool::builder().max_size(1).build(manager)?)
    }

    fn with_pool(pool: Pool<SqliteConnectionManager>) -> anyhow::Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            pool,
            last_created: Arc::new(Mutex::new(0)),
        })
    }

    fn next_created(&self) -> i64 {
        let mut last = self.last_created.lock();
        *last = now_millis().max(*last + 1);
        *last
    }

    async fn run<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, GatewayError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?
    }
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}

fn where_clause(
    table: Table,
    filters: &[Filter],
    params: &mut Vec<SqlValue>,
) -> Result<String, GatewayError> {
    let mut parts = Vec::new();
    for f in filters {
        if !table.has_column(f.column) {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("unknown column {}.{}", table.name(), f.column),
            });
        }
        params.push(to_sql(&f.value));
        parts.push(format!("\"{}\" = ?{}", f.column, params.len()));
    }
    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

fn map_write_error(e: rusqlite::Error) -> GatewayError {
    if matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    ) {
        GatewayError::Rejected {
            status: 409,
            message: e.to_string(),
        }
    } else {
        e.into()
    }
}

fn read_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, GatewayError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError> {
        table.check_row(&row)?;
        let created = self.next_created();
        self.run(move |conn| {
            let mut columns: Vec<String> = Vec::new();
            let mut params: Vec<SqlValue> = Vec::new();
            for (k, v) in &row {
                columns.push(format!("\"{}\"", k));
                params.push(to_sql(v));
            }
            columns.push("created_at".into());
            params.push(SqlValue::Integer(created));
            let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name(),
                columns.join(", "),
                placeholders.join(", ")
            );
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map_err(map_write_error)?;
            let id = conn.last_insert_rowid();
            let sql = format!("SELECT * FROM {} WHERE id = ?1", table.name());
            read_rows(conn, &sql, &[SqlValue::Integer(id)])?
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::NotFound(format!("{} {}", table.name(), id)))
        })
        .await
    }

    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: &[Order],
    ) -> Result<Vec<Row>, GatewayError> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", table.name());
        sql.push_str(&where_clause(table, filters, &mut params)?);
        let mut keys = Vec::new();
        for o in order {
            if !table.has_column(o.column) {
                return Err(GatewayError::Rejected {
                    status: 400,
                    message: format!("unknown column {}.{}", table.name(), o.column),
                });
            }
            keys.push(format!(
                "\"{}\" {}",
                o.column,
                if o.ascending { "ASC" } else { "DESC" }
            ));
        }
        if !keys.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        self.run(move |conn| read_rows(conn, &sql, &params)).await
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, GatewayError> {
        if filters.is_empty() {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("unfiltered delete on {}", table.name()),
            });
        }
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {}{}",
            table.name(),
            where_clause(table, filters, &mut params)?
        );
        self.run(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map_err(map_write_error)
        })
        .await
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<usize, GatewayError> {
        table.check_row(&patch)?;
        if filters.is_empty() || patch.is_empty() {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("unfiltered or empty update on {}", table.name()),
            });
        }
        let mut params = Vec::new();
        let mut sets = Vec::new();
        for (k, v) in &patch {
            params.push(to_sql(v));
            sets.push(format!("\"{}\" = ?{}", k, params.len()));
        }
        let sql = format!(
            "UPDATE {} SET {}{}",
            table.name(),
            sets.join(", "),
            where_clause(table, filters, &mut params)?
        );
        self.run(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map_err(map_write_error)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DonationStatus, PaymentMethod};
    use crate::store::Records;

    fn records() -> Records {
        Records::new(Arc::new(SqliteRecordStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn tribute_and_comment_order() {
        let r = records();
        let t1 = r.insert_tribute("Ada", "Rest well", "").await.unwrap();
        let t2 = r.insert_tribute("Kwame", "Gone too soon", "http://x/a.png").await.unwrap();
        assert_eq!(t1.image_url, "");
        let all = r.list_tributes().await.unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t2.id, t1.id]);

        r.insert_comment(t1.id, "A", "first").await.unwrap();
        r.insert_comment(t1.id, "B", "second").await.unwrap();
        let comments = r.list_comments(t1.id).await.unwrap();
        assert_eq!(comments[0].message, "first");
        assert!(comments[0].created_at <= comments[1].created_at);
    }

    #[tokio::test]
    async fn tribute_with_comments_cannot_be_deleted_first() {
        let r = records();
        let t = r.insert_tribute("Ada", "Rest well", "").await.unwrap();
        r.insert_comment(t.id, "A", "c").await.unwrap();
        assert!(r.delete_tribute(t.id).await.is_err());
        assert_eq!(r.delete_comments_for(t.id).await.unwrap(), 1);
        assert_eq!(r.delete_tribute(t.id).await.unwrap(), 1);
        assert!(r.insert_comment(t.id, "A", "orphan").await.is_err());
    }

    #[tokio::test]
    async fn donation_status_update() {
        let r = records();
        r.insert_donation(50, "Anonymous", "MEM-ABC123", PaymentMethod::Mtn, DonationStatus::Pending)
            .await
            .unwrap();
        assert!(r
            .insert_donation(5, "x", "MEM-ABC123", PaymentMethod::Mtn, DonationStatus::Pending)
            .await
            .is_err());
        assert_eq!(
            r.set_donation_status("MEM-ABC123", DonationStatus::Completed)
                .await
                .unwrap(),
            1
        );
        let d = r.find_donation("MEM-ABC123").await.unwrap().unwrap();
        assert_eq!(d.payment_status, DonationStatus::Completed);
        assert_eq!(d.payment_method, PaymentMethod::Mtn);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("memorial.db");
        {
            let r = Records::new(Arc::new(SqliteRecordStore::open(&path).unwrap()));
            r.insert_image_group("Family").await.unwrap();
        }
        let r = Records::new(Arc::new(SqliteRecordStore::open(&path).unwrap()));
        let groups = r.list_image_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Family");
    }
}
