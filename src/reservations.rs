//! Reservation domain: individual service bookings (flights, hotels,
//! visas, transfers), optionally tied to a group trip.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub reservation_number: Option<String>,
    pub customer_id: Option<String>,
    pub trip_id: Option<String>,
    pub service_type: String,
    pub reservation_date: String,
    pub number_of_people: i64,
    pub selling_price: f64,
    pub cost_price: f64,
    pub status: String,
}

/// Aggregate totals over an optional period, one row per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStatistics {
    pub total_reservations: i64,
    pub total_sales: f64,
    pub total_costs: f64,
    pub total_profit: f64,
    pub confirmed_count: i64,
    pub completed_count: i64,
    pub cancelled_count: i64,
    pub draft_count: i64,
}

/// Statuses that count as realized sales on the dashboard.
pub(crate) fn counts_as_sale(status: &str) -> bool {
    matches!(status, "confirmed" | "completed" | "paid")
}

#[async_trait]
pub trait ReservationSource: Send + Sync {
    async fn all(&self) -> Result<Vec<Reservation>, FetchError>;

    /// Aggregate statistics; `None` bounds mean "all time".
    async fn statistics(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ReservationStatistics, FetchError>;
}

pub struct SqliteReservationSource {
    db: Arc<DbState>,
}

impl SqliteReservationSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReservationSource for SqliteReservationSource {
    async fn all(&self) -> Result<Vec<Reservation>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, reservation_number, customer_id, trip_id, service_type,
                    reservation_date, number_of_people, selling_price, cost_price, status
             FROM reservations
             ORDER BY reservation_date DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Reservation {
                id: row.get(0)?,
                reservation_number: row.get(1)?,
                customer_id: row.get(2)?,
                trip_id: row.get(3)?,
                service_type: row.get(4)?,
                reservation_date: row.get(5)?,
                number_of_people: row.get(6)?,
                selling_price: row.get(7)?,
                cost_price: row.get(8)?,
                status: row.get(9)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn statistics(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ReservationStatistics, FetchError> {
        // Empty string disables a bound, so one prepared statement covers
        // every combination of optional period limits.
        let start = start
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let end = end
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(selling_price), 0),
                    COALESCE(SUM(cost_price), 0),
                    COALESCE(SUM(selling_price - cost_price), 0),
                    COALESCE(SUM(status = 'confirmed'), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'cancelled'), 0),
                    COALESCE(SUM(status = 'draft'), 0)
             FROM reservations
             WHERE (?1 = '' OR substr(reservation_date, 1, 10) >= ?1)
               AND (?2 = '' OR substr(reservation_date, 1, 10) <= ?2)",
            params![start, end],
            |row| {
                Ok(ReservationStatistics {
                    total_reservations: row.get(0)?,
                    total_sales: row.get(1)?,
                    total_costs: row.get(2)?,
                    total_profit: row.get(3)?,
                    confirmed_count: row.get(4)?,
                    completed_count: row.get(5)?,
                    cancelled_count: row.get(6)?,
                    draft_count: row.get(7)?,
                })
            },
        )?;
        Ok(stats)
    }
}
