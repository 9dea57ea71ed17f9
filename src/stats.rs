//! Dashboard snapshot model and the process-wide stats cache.
//!
//! The cache is replace-only: `put` swaps the whole entry under the
//! mutex, so a concurrent reader sees either the previous snapshot or
//! the new one, never a half-written mix. `invalidate` keeps the last
//! snapshot around as "last known" data but guarantees the next lookup
//! misses.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Default snapshot time-to-live.
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

/// One independently fetchable, independently failable unit of pipeline
/// work. The first six are the primary metric groups; the rest are the
/// chart and quick-report detail stages that follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    Cash,
    Reservations,
    Customers,
    Trips,
    Umrah,
    Suppliers,
    Charts,
    SalesReport,
    TripsReport,
    UmrahReport,
    CashReport,
    PartnersReport,
}

impl MetricGroup {
    pub fn tag(&self) -> &'static str {
        match self {
            MetricGroup::Cash => "cash",
            MetricGroup::Reservations => "reservations",
            MetricGroup::Customers => "customers",
            MetricGroup::Trips => "trips",
            MetricGroup::Umrah => "umrah",
            MetricGroup::Suppliers => "suppliers",
            MetricGroup::Charts => "charts",
            MetricGroup::SalesReport => "sales_report",
            MetricGroup::TripsReport => "trips_report",
            MetricGroup::UmrahReport => "umrah_report",
            MetricGroup::CashReport => "cash_report",
            MetricGroup::PartnersReport => "partners_report",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A section value plus its provenance: `fell_back` is set when the
/// owning group's fetch failed and the neutral default was used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResult<T> {
    pub value: T,
    pub fell_back: bool,
}

impl<T> SectionResult<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            fell_back: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            fell_back: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Section payloads
// ---------------------------------------------------------------------------

/// Headline cash figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSection {
    pub cash_balance: f64,
    pub today_sales: f64,
    pub monthly_revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSection {
    pub active_reservations: i64,
}

/// Entity counts for the secondary stat cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSection {
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySales {
    /// Month key, `YYYY-MM`.
    pub month: String,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSlice {
    pub label: String,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSection {
    /// Six-month sales trend, ascending by month.
    pub sales_trend: Vec<MonthlySales>,
    /// Last-month revenue split by service type, top five descending.
    pub revenue_split: Vec<RevenueSlice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub today_sales: f64,
    pub week_sales: f64,
    pub month_sales: f64,
    pub reservation_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripsReport {
    pub active_trips: i64,
    pub completed_trips: i64,
    pub booked_seats: i64,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UmrahReport {
    pub active_packages: i64,
    pub total_pilgrims: i64,
    pub total_revenue: f64,
    pub average_profit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashReport {
    pub current_balance: f64,
    pub today_income: f64,
    pub today_expense: f64,
    pub today_net: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnersReport {
    pub total_customers: i64,
    pub customers_with_balance: i64,
    pub total_suppliers: i64,
    pub suppliers_with_balance: i64,
}

/// The fully composed result of one aggregation run. Immutable once
/// built; the pipeline assembles it and commits it to the cache in one
/// piece.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub run_id: String,
    pub captured_at: String,
    pub cash: SectionResult<CashSection>,
    pub reservations: SectionResult<ReservationSection>,
    pub customers: SectionResult<CountSection>,
    pub trips: SectionResult<CountSection>,
    pub umrah: SectionResult<CountSection>,
    pub suppliers: SectionResult<CountSection>,
    pub charts: SectionResult<ChartSection>,
    pub sales_report: SectionResult<SalesReport>,
    pub trips_report: SectionResult<TripsReport>,
    pub umrah_report: SectionResult<UmrahReport>,
    pub cash_report: SectionResult<CashReport>,
    pub partners_report: SectionResult<PartnersReport>,
    /// Groups that fell back to defaults during the run.
    pub failed_groups: Vec<MetricGroup>,
}

// ---------------------------------------------------------------------------
// Stats cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: DashboardSnapshot,
    captured_at: DateTime<Utc>,
    stale: bool,
}

/// TTL cache holding the most recent composite snapshot.
pub struct StatsCache {
    ttl: ChronoDuration,
    entry: Mutex<Option<CacheEntry>>,
}

impl StatsCache {
    pub fn new(ttl: ChronoDuration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(ChronoDuration::seconds(DEFAULT_TTL_SECS))
    }

    /// Returns the last committed snapshot (if any) and whether it is
    /// still fresh. A stale or expired entry is handed back as
    /// last-known data with `hit = false`.
    pub fn get(&self) -> (Option<DashboardSnapshot>, bool) {
        self.get_at(Utc::now())
    }

    fn get_at(&self, now: DateTime<Utc>) -> (Option<DashboardSnapshot>, bool) {
        let guard = match self.entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(entry) => {
                let fresh = !entry.stale && now.signed_duration_since(entry.captured_at) < self.ttl;
                (Some(entry.snapshot.clone()), fresh)
            }
            None => (None, false),
        }
    }

    /// Atomically replace the entry with a fresh one.
    pub fn put(&self, snapshot: DashboardSnapshot) {
        self.put_at(snapshot, Utc::now());
    }

    fn put_at(&self, snapshot: DashboardSnapshot, now: DateTime<Utc>) {
        let mut guard = match self.entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(CacheEntry {
            snapshot,
            captured_at: now,
            stale: false,
        });
    }

    /// Mark the current entry stale regardless of age; the next `get`
    /// is a guaranteed miss.
    pub fn invalidate(&self) {
        let mut guard = match self.entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = guard.take().map(|entry| CacheEntry {
            stale: true,
            ..entry
        });
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(run_id: &str) -> DashboardSnapshot {
        DashboardSnapshot {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn get_on_empty_cache_is_a_miss() {
        let cache = StatsCache::with_default_ttl();
        let (entry, hit) = cache.get();
        assert!(entry.is_none());
        assert!(!hit);
    }

    #[test]
    fn put_then_get_within_ttl_is_a_hit() {
        let cache = StatsCache::with_default_ttl();
        cache.put(snapshot("run-1"));

        let (entry, hit) = cache.get();
        assert!(hit);
        assert_eq!(entry.expect("entry").run_id, "run-1");
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache = StatsCache::new(ChronoDuration::minutes(5));
        let committed = Utc::now();
        cache.put_at(snapshot("run-1"), committed);

        let just_before = committed + ChronoDuration::seconds(299);
        let (_, hit) = cache.get_at(just_before);
        assert!(hit);

        let just_after = committed + ChronoDuration::seconds(301);
        let (entry, hit) = cache.get_at(just_after);
        assert!(!hit, "expired entry must miss without invalidate");
        assert_eq!(
            entry.expect("last-known snapshot survives expiry").run_id,
            "run-1"
        );
    }

    #[test]
    fn invalidate_forces_a_miss_regardless_of_age() {
        let cache = StatsCache::with_default_ttl();
        cache.put(snapshot("run-1"));
        cache.invalidate();

        let (entry, hit) = cache.get();
        assert!(!hit);
        assert_eq!(entry.expect("entry").run_id, "run-1");
    }

    #[test]
    fn put_replaces_the_whole_entry_and_clears_staleness() {
        let cache = StatsCache::with_default_ttl();
        cache.put(snapshot("run-1"));
        cache.invalidate();

        cache.put(snapshot("run-2"));
        let (entry, hit) = cache.get();
        assert!(hit);
        assert_eq!(entry.expect("entry").run_id, "run-2");
    }

    #[test]
    fn invalidate_on_empty_cache_is_a_no_op() {
        let cache = StatsCache::with_default_ttl();
        cache.invalidate();
        let (entry, hit) = cache.get();
        assert!(entry.is_none());
        assert!(!hit);
    }
}
