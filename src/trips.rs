//! Group trip domain. Component costs (accommodation, transportation,
//! guides, optional tours, miscellaneous) are flattened into columns on
//! the trip row; the profitability report reads them straight off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbState;
use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub trip_code: Option<String>,
    pub name: String,
    pub destination: Option<String>,
    pub status: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub total_capacity: i64,
    pub booked_seats: i64,
    pub available_seats: i64,
    pub accommodation_cost: f64,
    pub transportation_cost: f64,
    pub guide_cost: f64,
    pub optional_tour_cost: f64,
    pub other_cost: f64,
    pub optional_tour_revenue: f64,
}

impl Trip {
    /// Active means sellable: confirmed or still awaiting confirmation.
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "confirmed" | "unconfirmed")
    }
}

#[async_trait]
pub trait TripSource: Send + Sync {
    async fn all(&self) -> Result<Vec<Trip>, FetchError>;
}

pub struct SqliteTripSource {
    db: Arc<DbState>,
}

impl SqliteTripSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TripSource for SqliteTripSource {
    async fn all(&self) -> Result<Vec<Trip>, FetchError> {
        let conn = self.db.conn.lock().map_err(|_| FetchError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, trip_code, name, destination, status, start_date, end_date,
                    total_capacity, booked_seats, available_seats,
                    accommodation_cost, transportation_cost, guide_cost,
                    optional_tour_cost, other_cost, optional_tour_revenue
             FROM trips
             ORDER BY start_date DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Trip {
                id: row.get(0)?,
                trip_code: row.get(1)?,
                name: row.get(2)?,
                destination: row.get(3)?,
                status: row.get(4)?,
                start_date: row.get(5)?,
                end_date: row.get(6)?,
                total_capacity: row.get(7)?,
                booked_seats: row.get(8)?,
                available_seats: row.get(9)?,
                accommodation_cost: row.get(10)?,
                transportation_cost: row.get(11)?,
                guide_cost: row.get(12)?,
                optional_tour_cost: row.get(13)?,
                other_cost: row.get(14)?,
                optional_tour_revenue: row.get(15)?,
            })
        })?;
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

    fn test_source() -> SqliteTripSource {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        SqliteTripSource::new(Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }))
    }

    #[tokio::test]
    async fn all_returns_every_trip_with_costs() {
        let source = test_source();
        {
            let conn = source.db.conn.lock().expect("db lock");
            conn.execute_batch(
                "INSERT INTO trips (id, name, status, start_date, total_capacity, booked_seats, available_seats,
                                    accommodation_cost, transportation_cost, guide_cost)
                 VALUES
                    ('trip-1', 'Luxor & Aswan', 'confirmed', '2026-05-10', 60, 45, 60, 30000.0, 12000.0, 5000.0),
                    ('trip-2', 'Sharm El Sheikh', 'completed', '2026-01-02', 40, 40, 40, 20000.0, 8000.0, 3000.0);",
            )
            .expect("seed trips");
        }

        let trips = source.all().await.expect("trips");
        assert_eq!(trips.len(), 2);

        let luxor = trips.iter().find(|t| t.id == "trip-1").expect("luxor");
        assert!(luxor.is_active());
        assert_eq!(luxor.accommodation_cost, 30000.0);

        let sharm = trips.iter().find(|t| t.id == "trip-2").expect("sharm");
        assert!(!sharm.is_active());
    }
}
