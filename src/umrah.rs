//! Umrah package domain. Packages are priced per pilgrim; the stored
//! cost figure is per person, so total cost weights it by head count.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

/// Aggregate figures across umrah packages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UmrahStatistics {
    pub total_packages: i64,
    pub active_packages: i64,
    pub completed_packages: i64,
    pub cancelled_packages: i64,
    pub total_pilgrims: i64,
    pub total_revenue: f64,
    pub total_costs: f64,
    pub total_profit: f64,
    pub average_profit_margin: f64,
}

#[async_trait]
pub trait UmrahSource: Send + Sync {
    async fn package_statistics(&self) -> Result<UmrahStatistics, FetchError>;
}

pub struct SqliteUmrahSource {
    db: Arc<DbState>,
}

impl SqliteUmrahSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UmrahSource for SqliteUmrahSource {
    async fn package_statistics(&self) -> Result<UmrahStatistics, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_active), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'cancelled'), 0),
                    COALESCE(SUM(number_of_persons), 0),
                    COALESCE(SUM(total_revenue), 0),
                    COALESCE(SUM(cost_per_person * number_of_persons), 0),
                    COALESCE(SUM(net_profit), 0),
                    COALESCE(AVG(profit_margin), 0)
             FROM umrah_packages",
            [],
            |row| {
                Ok(UmrahStatistics {
                    total_packages: row.get(0)?,
                    active_packages: row.get(1)?,
                    completed_packages: row.get(2)?,
                    cancelled_packages: row.get(3)?,
                    total_pilgrims: row.get(4)?,
                    total_revenue: row.get(5)?,
                    total_costs: row.get(6)?,
                    total_profit: row.get(7)?,
                    average_profit_margin: row.get(8)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn test_source() -> SqliteUmrahSource {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        SqliteUmrahSource::new(Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }))
    }

    #[tokio::test]
    async fn statistics_weight_costs_by_head_count() {
        let source = test_source();
        {
            let conn = source.db.conn.lock().expect("db lock");
            conn.execute_batch(
                "INSERT INTO umrah_packages (id, name, status, is_active, number_of_persons, total_revenue, cost_per_person, net_profit, profit_margin) VALUES
                    ('umr-1', 'Ramadan package', 'in_progress', 1, 30, 900000.0, 25000.0, 150000.0, 16.7),
                    ('umr-2', 'Shaaban package', 'completed', 0, 20, 500000.0, 20000.0, 100000.0, 20.0),
                    ('umr-3', 'Rajab package', 'cancelled', 0, 0, 0.0, 0.0, 0.0, 0.0);",
            )
            .expect("seed packages");
        }

        let stats = source.package_statistics().await.expect("stats");
        assert_eq!(stats.total_packages, 3);
        assert_eq!(stats.active_packages, 1);
        assert_eq!(stats.completed_packages, 1);
        assert_eq!(stats.cancelled_packages, 1);
        assert_eq!(stats.total_pilgrims, 50);
        assert_eq!(stats.total_revenue, 1_400_000.0);
        assert_eq!(stats.total_costs, 30.0 * 25000.0 + 20.0 * 20000.0);
        assert_eq!(stats.total_profit, 250000.0);
    }

    #[tokio::test]
    async fn statistics_on_empty_table_is_all_zero() {
        let source = test_source();

        let stats = source.package_statistics().await.expect("stats");
        assert_eq!(stats.total_packages, 0);
        assert_eq!(stats.total_pilgrims, 0);
        assert_eq!(stats.total_revenue, 0.0);
        assert_eq!(stats.average_profit_margin, 0.0);
    }
}
