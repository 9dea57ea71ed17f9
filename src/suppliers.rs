//! Supplier domain: airlines, hotels, transport companies, and other
//! service providers the agency books through.

use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub service_kind: Option<String>,
    pub balance: f64,
    pub is_active: bool,
}

#[async_trait]
pub trait SupplierSource: Send + Sync {
    async fn all(&self) -> Result<Vec<Supplier>, FetchError>;

    /// Suppliers the agency still owes (or is owed by).
    async fn with_balance(&self) -> Result<Vec<Supplier>, FetchError>;
}

pub struct SqliteSupplierSource {
    db: Arc<DbState>,
}

impl SqliteSupplierSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    fn query(&self, only_with_balance: bool) -> Result<Vec<Supplier>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, service_kind, balance, is_active
             FROM suppliers
             WHERE (?1 = 0 OR balance <> 0)
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![only_with_balance as i64], |row| {
            Ok(Supplier {
                id: row.get(0)?,
                name: row.get(1)?,
                service_kind: row.get(2)?,
                balance: row.get(3)?,
                is_active: row.get::<_, i64>(4)? != 0,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[async_trait]
impl SupplierSource for SqliteSupplierSource {
    async fn all(&self) -> Result<Vec<Supplier>, FetchError> {
        self.query(false)
    }

    async fn with_balance(&self) -> Result<Vec<Supplier>, FetchError> {
        self.query(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn test_source() -> SqliteSupplierSource {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        SqliteSupplierSource::new(Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }))
    }

    #[tokio::test]
    async fn with_balance_filters_settled_accounts() {
        let source = test_source();
        {
            let conn = source.db.conn.lock().expect("db lock");
            conn.execute_batch(
                "INSERT INTO suppliers (id, name, service_kind, balance) VALUES
                    ('sup-1', 'Nile Air', 'airline', 15000.0),
                    ('sup-2', 'Cairo Grand Hotel', 'hotel', 0.0);",
            )
            .expect("seed suppliers");
        }

        let all = source.all().await.expect("all");
        assert_eq!(all.len(), 2);

        let owed = source.with_balance().await.expect("with_balance");
        assert_eq!(owed.len(), 1);
        assert_eq!(owed[0].name, "Nile Air");
    }
}
