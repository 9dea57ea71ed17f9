//! Financial report formulas and builders.
//!
//! The formula layer is pure: every derived metric is a total function
//! with zero-guarded division, so a report over an empty period is all
//! zeros rather than an error. The builders aggregate straight from the
//! local database and return transient, request-scoped values.

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbState;

/// Percentage ratio with the uniform zero-denominator rule.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator * 100.0
    }
}

/// Unscaled per-unit metric with the same zero guard.
pub fn per_unit(total: f64, count: f64) -> f64 {
    if count == 0.0 {
        0.0
    } else {
        total / count
    }
}

// ---------------------------------------------------------------------------
// Income statement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSection {
    pub trip_revenue: f64,
    pub service_revenue: f64,
    pub other_revenue: f64,
}

impl RevenueSection {
    pub fn total(&self) -> f64 {
        self.trip_revenue + self.service_revenue + self.other_revenue
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectCostSection {
    pub accommodation: f64,
    pub transportation: f64,
    pub guides: f64,
    pub optional_tours: f64,
    pub other: f64,
}

impl DirectCostSection {
    pub fn total(&self) -> f64 {
        self.accommodation + self.transportation + self.guides + self.optional_tours + self.other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingExpenseSection {
    pub salaries: f64,
    pub rent: f64,
    pub utilities: f64,
    pub marketing: f64,
    pub administrative: f64,
    pub depreciation: f64,
    pub other: f64,
}

impl OperatingExpenseSection {
    pub fn total(&self) -> f64 {
        self.salaries
            + self.rent
            + self.utilities
            + self.marketing
            + self.administrative
            + self.depreciation
            + self.other
    }
}

/// Income statement for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStatement {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub revenue: RevenueSection,
    pub direct_costs: DirectCostSection,
    pub operating_expenses: OperatingExpenseSection,
}

impl IncomeStatement {
    pub fn total_revenue(&self) -> f64 {
        self.revenue.total()
    }

    pub fn total_direct_costs(&self) -> f64 {
        self.direct_costs.total()
    }

    pub fn gross_profit(&self) -> f64 {
        self.total_revenue() - self.total_direct_costs()
    }

    pub fn gross_margin(&self) -> f64 {
        ratio(self.gross_profit(), self.total_revenue())
    }

    pub fn total_operating_expenses(&self) -> f64 {
        self.operating_expenses.total()
    }

    pub fn net_profit(&self) -> f64 {
        self.gross_profit() - self.total_operating_expenses()
    }

    pub fn net_margin(&self) -> f64 {
        ratio(self.net_profit(), self.total_revenue())
    }
}

/// Two income statements side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparativeIncomeStatement {
    pub current: IncomeStatement,
    pub previous: IncomeStatement,
}

impl ComparativeIncomeStatement {
    pub fn revenue_change(&self) -> f64 {
        self.current.total_revenue() - self.previous.total_revenue()
    }

    pub fn revenue_change_percent(&self) -> f64 {
        ratio(self.revenue_change(), self.previous.total_revenue())
    }

    pub fn net_profit_change(&self) -> f64 {
        self.current.net_profit() - self.previous.net_profit()
    }

    pub fn net_profit_change_percent(&self) -> f64 {
        ratio(self.net_profit_change(), self.previous.net_profit())
    }
}

// ---------------------------------------------------------------------------
// Trip profitability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripCosts {
    pub accommodation: f64,
    pub transportation: f64,
    pub guides: f64,
    pub optional_tours: f64,
    pub other: f64,
}

impl TripCosts {
    pub fn total(&self) -> f64 {
        self.accommodation + self.transportation + self.guides + self.optional_tours + self.other
    }

    pub fn has_costs(&self) -> bool {
        self.total() > 0.0
    }
}

/// Profitability of one trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripProfitability {
    pub trip_id: String,
    pub trip_name: String,
    pub trip_code: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub revenue: f64,
    pub optional_tours_revenue: f64,
    pub costs: TripCosts,
    pub bookings_count: i64,
    pub total_participants: i64,
    pub available_seats: i64,
}

impl TripProfitability {
    pub fn total_revenue(&self) -> f64 {
        self.revenue + self.optional_tours_revenue
    }

    pub fn profit(&self) -> f64 {
        self.total_revenue() - self.costs.total()
    }

    pub fn profit_margin(&self) -> f64 {
        ratio(self.profit(), self.total_revenue())
    }

    pub fn occupancy_rate(&self) -> f64 {
        ratio(self.total_participants as f64, self.available_seats as f64)
    }

    pub fn revenue_per_participant(&self) -> f64 {
        per_unit(self.total_revenue(), self.total_participants as f64)
    }

    pub fn cost_per_participant(&self) -> f64 {
        per_unit(self.costs.total(), self.total_participants as f64)
    }

    pub fn profit_per_participant(&self) -> f64 {
        per_unit(self.profit(), self.total_participants as f64)
    }

    pub fn accommodation_percentage(&self) -> f64 {
        ratio(self.costs.accommodation, self.costs.total())
    }

    pub fn transportation_percentage(&self) -> f64 {
        ratio(self.costs.transportation, self.costs.total())
    }

    pub fn guides_percentage(&self) -> f64 {
        ratio(self.costs.guides, self.costs.total())
    }

    pub fn optional_tours_percentage(&self) -> f64 {
        ratio(self.costs.optional_tours, self.costs.total())
    }

    pub fn other_percentage(&self) -> f64 {
        ratio(self.costs.other, self.costs.total())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build the income statement for `start..=end`.
///
/// Revenue comes from realized reservations (trip-linked rows feed trip
/// revenue, the rest service revenue) plus "Other Income" cash vouchers;
/// direct costs from the component-cost columns of trips departing in
/// the period; operating expenses from categorized expense vouchers.
pub fn income_statement(
    db: &DbState,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<IncomeStatement, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let start_s = start.format("%Y-%m-%d").to_string();
    let end_s = end.format("%Y-%m-%d").to_string();

    // Revenue: realized reservations split by trip linkage
    let (trip_revenue, service_revenue) = conn
        .query_row(
            "SELECT COALESCE(SUM(CASE WHEN trip_id IS NOT NULL THEN selling_price END), 0),
                    COALESCE(SUM(CASE WHEN trip_id IS NULL THEN selling_price END), 0)
             FROM reservations
             WHERE status IN ('confirmed', 'paid', 'completed')
               AND substr(reservation_date, 1, 10) BETWEEN ?1 AND ?2",
            params![start_s, end_s],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
        )
        .map_err(|e| format!("revenue query: {e}"))?;

    let other_revenue: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount), 0)
             FROM cash_transactions
             WHERE kind = 'income'
               AND category = 'Other Income'
               AND is_deleted = 0
               AND substr(transaction_date, 1, 10) BETWEEN ?1 AND ?2",
            params![start_s, end_s],
            |row| row.get(0),
        )
        .map_err(|e| format!("other income query: {e}"))?;

    // Direct costs: component columns of trips departing in the period
    let direct_costs = conn
        .query_row(
            "SELECT COALESCE(SUM(accommodation_cost), 0),
                    COALESCE(SUM(transportation_cost), 0),
                    COALESCE(SUM(guide_cost), 0),
                    COALESCE(SUM(optional_tour_cost), 0),
                    COALESCE(SUM(other_cost), 0)
             FROM trips
             WHERE start_date IS NOT NULL
               AND substr(start_date, 1, 10) BETWEEN ?1 AND ?2",
            params![start_s, end_s],
            |row| {
                Ok(DirectCostSection {
                    accommodation: row.get(0)?,
                    transportation: row.get(1)?,
                    guides: row.get(2)?,
                    optional_tours: row.get(3)?,
                    other: row.get(4)?,
                })
            },
        )
        .map_err(|e| format!("direct cost query: {e}"))?;

    // Operating expenses: bucket expense vouchers by category
    let mut expense_stmt = conn
        .prepare(
            "SELECT category, COALESCE(SUM(amount), 0)
             FROM cash_transactions
             WHERE kind = 'expense'
               AND is_deleted = 0
               AND substr(transaction_date, 1, 10) BETWEEN ?1 AND ?2
             GROUP BY category",
        )
        .map_err(|e| format!("prepare expense query: {e}"))?;

    let expense_rows = expense_stmt
        .query_map(params![start_s, end_s], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })
        .map_err(|e| format!("query expenses: {e}"))?;

    let mut operating_expenses = OperatingExpenseSection::default();
    for row in expense_rows.flatten() {
        let (category, total) = row;
        match category.as_str() {
            "Salaries" | "Payroll" => operating_expenses.salaries += total,
            "Rent" => operating_expenses.rent += total,
            "Utilities" => operating_expenses.utilities += total,
            "Marketing" | "Advertising" => operating_expenses.marketing += total,
            "Administrative" | "Office" => operating_expenses.administrative += total,
            "Depreciation" => operating_expenses.depreciation += total,
            "Other Income" => {} // income category name; not an expense bucket
            _ => operating_expenses.other += total,
        }
    }

    Ok(IncomeStatement {
        start_date: Some(start),
        end_date: Some(end),
        revenue: RevenueSection {
            trip_revenue,
            service_revenue,
            other_revenue,
        },
        direct_costs,
        operating_expenses,
    })
}

/// Income statements for two periods side by side.
pub fn comparative_income_statement(
    db: &DbState,
    current: (NaiveDate, NaiveDate),
    previous: (NaiveDate, NaiveDate),
) -> Result<ComparativeIncomeStatement, String> {
    Ok(ComparativeIncomeStatement {
        current: income_statement(db, current.0, current.1)?,
        previous: income_statement(db, previous.0, previous.1)?,
    })
}

fn profitability_row(
    conn: &rusqlite::Connection,
    trip: (
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        i64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
    ),
) -> Result<TripProfitability, String> {
    let (
        id,
        name,
        code,
        start_date,
        end_date,
        available_seats,
        accommodation,
        transportation,
        guides,
        optional_tours,
        other,
        optional_tours_revenue,
    ) = trip;

    // Bookings of the trip that actually count as sales
    let (revenue, bookings_count, total_participants) = conn
        .query_row(
            "SELECT COALESCE(SUM(selling_price), 0),
                    COUNT(*),
                    COALESCE(SUM(number_of_people), 0)
             FROM reservations
             WHERE trip_id = ?1
               AND status IN ('confirmed', 'paid', 'completed')",
            params![id],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .map_err(|e| format!("trip bookings query: {e}"))?;

    Ok(TripProfitability {
        trip_id: id,
        trip_name: name,
        trip_code: code.unwrap_or_default(),
        start_date,
        end_date,
        revenue,
        optional_tours_revenue,
        costs: TripCosts {
            accommodation,
            transportation,
            guides,
            optional_tours,
            other,
        },
        bookings_count,
        total_participants,
        available_seats,
    })
}

#[allow(clippy::type_complexity)]
fn load_trip_rows(
    conn: &rusqlite::Connection,
    start: &str,
    end: &str,
    trip_id: &str,
) -> Result<
    Vec<(
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        i64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
    )>,
    String,
> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, trip_code, start_date, end_date, available_seats,
                    accommodation_cost, transportation_cost, guide_cost,
                    optional_tour_cost, other_cost, optional_tour_revenue
             FROM trips
             WHERE (?3 <> '' AND id = ?3)
                OR (?3 = '' AND start_date IS NOT NULL
                    AND substr(start_date, 1, 10) BETWEEN ?1 AND ?2)
             ORDER BY start_date",
        )
        .map_err(|e| format!("prepare trips query: {e}"))?;
    let rows = stmt
        .query_map(params![start, end, trip_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
            ))
        })
        .map_err(|e| format!("query trips: {e}"))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Profitability of every trip departing in `start..=end`.
pub fn trip_profitability(
    db: &DbState,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<TripProfitability>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let rows = load_trip_rows(
        &conn,
        &start.format("%Y-%m-%d").to_string(),
        &end.format("%Y-%m-%d").to_string(),
        "",
    )?;

    rows.into_iter()
        .map(|trip| profitability_row(&conn, trip))
        .collect()
}

/// Profitability of a single trip, or `None` if it does not exist.
pub fn trip_profitability_for(
    db: &DbState,
    trip_id: &str,
) -> Result<Option<TripProfitability>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let rows = load_trip_rows(&conn, "", "", trip_id)?;

    match rows.into_iter().next() {
        Some(trip) => Ok(Some(profitability_row(&conn, trip)?)),
        None => Ok(None),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
