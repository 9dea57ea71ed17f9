//! Cash box domain: tills, bank accounts, and their income/expense
//! vouchers. The dashboard's cash balance, today's sales, and monthly
//! revenue figures all come from this module.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

/// Direction of a cash voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// A till or bank account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashBox {
    pub id: String,
    pub box_code: Option<String>,
    pub name: String,
    pub box_type: String,
    pub currency: String,
    pub current_balance: f64,
    pub is_active: bool,
}

/// One income or expense voucher recorded against a box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashTransaction {
    pub id: String,
    pub cash_box_id: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub category: String,
    pub party_name: Option<String>,
    pub transaction_date: String,
}

/// Capability contract for cash data. The dashboard pipeline and the
/// report builders consume this seam; production wires the SQLite
/// implementation, tests substitute doubles.
#[async_trait]
pub trait CashSource: Send + Sync {
    async fn all_boxes(&self) -> Result<Vec<CashBox>, FetchError>;

    /// Non-deleted vouchers of one box whose transaction day falls in
    /// `start..=end`.
    async fn transactions(
        &self,
        box_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CashTransaction>, FetchError>;
}

/// SQLite-backed implementation over the shared connection.
pub struct SqliteCashSource {
    db: Arc<DbState>,
}

impl SqliteCashSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CashSource for SqliteCashSource {
    async fn all_boxes(&self) -> Result<Vec<CashBox>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, box_code, name, box_type, currency, current_balance, is_active
             FROM cash_boxes
             WHERE is_deleted = 0
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CashBox {
                id: row.get(0)?,
                box_code: row.get(1)?,
                name: row.get(2)?,
                box_type: row.get(3)?,
                currency: row.get(4)?,
                current_balance: row.get(5)?,
                is_active: row.get::<_, i64>(6)? != 0,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn transactions(
        &self,
        box_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CashTransaction>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, cash_box_id, kind, amount, category, party_name, transaction_date
             FROM cash_transactions
             WHERE cash_box_id = ?1
               AND is_deleted = 0
               AND substr(transaction_date, 1, 10) BETWEEN ?2 AND ?3
             ORDER BY transaction_date",
        )?;
        let rows = stmt.query_map(
            params![
                box_id,
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string()
            ],
            |row| {
                let kind: String = row.get(2)?;
                Ok(CashTransaction {
                    id: row.get(0)?,
                    cash_box_id: row.get(1)?,
                    // CHECK constraint admits only these two values
                    kind: if kind == "income" {
                        TransactionKind::Income
                    } else {
                        TransactionKind::Expense
                    },
                    amount: row.get(3)?,
                    category: row.get(4)?,
                    party_name: row.get(5)?,
                    transaction_date: row.get(6)?,
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn test_source() -> SqliteCashSource {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        SqliteCashSource::new(Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }))
    }

    fn seed(source: &SqliteCashSource) {
        let conn = source.db.conn.lock().expect("db lock");
        conn.execute_batch(
            "INSERT INTO cash_boxes (id, name, current_balance, is_active) VALUES
                ('box-main', 'Main till', 5000.0, 1),
                ('box-bank', 'Bank account', 20000.0, 0);
             INSERT INTO cash_boxes (id, name, current_balance, is_deleted) VALUES
                ('box-old', 'Closed till', 0.0, 1);
             INSERT INTO cash_transactions (id, cash_box_id, kind, amount, category, transaction_date) VALUES
                ('tx-1', 'box-main', 'income', 1500.0, 'Sales', '2026-03-02 10:00:00'),
                ('tx-2', 'box-main', 'expense', 300.0, 'Rent', '2026-03-03 09:00:00'),
                ('tx-3', 'box-main', 'income', 700.0, 'Sales', '2026-04-01 12:00:00');
             INSERT INTO cash_transactions (id, cash_box_id, kind, amount, category, transaction_date, is_deleted) VALUES
                ('tx-del', 'box-main', 'income', 9999.0, 'Sales', '2026-03-02 11:00:00', 1);",
        )
        .expect("seed cash data");
    }

    #[tokio::test]
    async fn all_boxes_skips_deleted() {
        let source = test_source();
        seed(&source);

        let boxes = source.all_boxes().await.expect("boxes");
        assert_eq!(boxes.len(), 2);
        assert!(boxes.iter().all(|b| b.id != "box-old"));

        let main = boxes.iter().find(|b| b.id == "box-main").expect("main");
        assert!(main.is_active);
        assert_eq!(main.current_balance, 5000.0);
    }

    #[tokio::test]
    async fn transactions_are_period_bounded() {
        let source = test_source();
        seed(&source);

        let march = source
            .transactions(
                "box-main",
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            )
            .await
            .expect("transactions");

        assert_eq!(march.len(), 2, "deleted and out-of-period rows excluded");
        assert_eq!(march[0].kind, TransactionKind::Income);
        assert_eq!(march[1].kind, TransactionKind::Expense);
        assert_eq!(march[1].amount, 300.0);
    }

    #[tokio::test]
    async fn empty_box_yields_empty_collection() {
        let source = test_source();
        seed(&source);

        let rows = source
            .transactions(
                "box-bank",
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            )
            .await
            .expect("transactions");
        assert!(rows.is_empty());
    }
}
