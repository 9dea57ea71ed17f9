//! Customer domain.

use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub balance: f64,
    pub is_active: bool,
}

#[async_trait]
pub trait CustomerSource: Send + Sync {
    async fn all(&self) -> Result<Vec<Customer>, FetchError>;

    /// Customers with a non-zero outstanding balance.
    async fn with_balance(&self) -> Result<Vec<Customer>, FetchError>;
}

pub struct SqliteCustomerSource {
    db: Arc<DbState>,
}

impl SqliteCustomerSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    fn query(&self, only_with_balance: bool) -> Result<Vec<Customer>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, phone, balance, is_active
             FROM customers
             WHERE (?1 = 0 OR balance <> 0)
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![only_with_balance as i64], |row| {
            Ok(Customer {
                id: row.get(0)?,
                name: row.get(1)?,
                phone: row.get(2)?,
                balance: row.get(3)?,
                is_active: row.get::<_, i64>(4)? != 0,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[async_trait]
impl CustomerSource for SqliteCustomerSource {
    async fn all(&self) -> Result<Vec<Customer>, FetchError> {
        self.query(false)
    }

    async fn with_balance(&self) -> Result<Vec<Customer>, FetchError> {
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

    fn test_source() -> SqliteCustomerSource {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        SqliteCustomerSource::new(Arc::new(DbState {
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
                "INSERT INTO customers (id, name, balance) VALUES
                    ('cus-1', 'Adel', 0.0),
                    ('cus-2', 'Basma', 450.0),
                    ('cus-3', 'Chadi', -120.0);",
            )
            .expect("seed customers");
        }

        let all = source.all().await.expect("all");
        assert_eq!(all.len(), 3);

        let indebted = source.with_balance().await.expect("with_balance");
        assert_eq!(indebted.len(), 2, "zero-balance accounts are excluded");
    }
}
