//! Dashboard aggregation pipeline and service.
//!
//! The storage engine supports exactly one logical operation in flight,
//! so the pipeline issues its group fetches strictly sequentially —
//! headline cash and reservation figures first, secondary counts next,
//! then chart data and the quick-report cards. Each group fetch is
//! isolated: a failure is logged with the group's tag and contributes a
//! neutral default, and the run continues. A run always completes and
//! commits one whole snapshot to the cache; the only exception is host
//! teardown, which abandons the run without committing anything.
//!
//! Progress is published as a stream of per-group events terminated by
//! a `Completed` event, so the host shell can fill its cards
//! incrementally instead of blocking on the full run.

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cashbox::{CashSource, SqliteCashSource, TransactionKind};
use crate::customers::{CustomerSource, SqliteCustomerSource};
use crate::db::{self, DbState};
use crate::error::FetchError;
use crate::reports::{per_unit, ratio};
use crate::reservations::{counts_as_sale, ReservationSource, SqliteReservationSource};
use crate::stats::{
    CashReport, CashSection, ChartSection, CountSection, DashboardSnapshot, MetricGroup,
    MonthlySales, PartnersReport, ReservationSection, RevenueSlice, SalesReport, SectionResult,
    StatsCache, TripsReport, UmrahReport, DEFAULT_TTL_SECS,
};
use crate::suppliers::{SqliteSupplierSource, SupplierSource};
use crate::trips::{SqliteTripSource, TripSource};
use crate::umrah::{SqliteUmrahSource, UmrahSource};

/// Per-group fetch timeout.
const FETCH_TIMEOUT_SECS: u64 = 10;
/// Event channel capacity; a full buffer lags slow subscribers rather
/// than blocking the run.
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Slices shown in the revenue-split chart.
const REVENUE_SPLIT_LIMIT: usize = 5;

/// The six domain collaborators the pipeline reads from.
#[derive(Clone)]
pub struct Sources {
    pub cash: Arc<dyn CashSource>,
    pub reservations: Arc<dyn ReservationSource>,
    pub customers: Arc<dyn CustomerSource>,
    pub suppliers: Arc<dyn SupplierSource>,
    pub trips: Arc<dyn TripSource>,
    pub umrah: Arc<dyn UmrahSource>,
}

impl Sources {
    /// All six sources over the shared SQLite connection.
    pub fn sqlite(db: Arc<DbState>) -> Self {
        Self {
            cash: Arc::new(SqliteCashSource::new(db.clone())),
            reservations: Arc::new(SqliteReservationSource::new(db.clone())),
            customers: Arc::new(SqliteCustomerSource::new(db.clone())),
            suppliers: Arc::new(SqliteSupplierSource::new(db.clone())),
            trips: Arc::new(SqliteTripSource::new(db.clone())),
            umrah: Arc::new(SqliteUmrahSource::new(db)),
        }
    }
}

/// Payload of one per-group event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SectionData {
    Cash(CashSection),
    Reservations(ReservationSection),
    Counts(CountSection),
    Charts(ChartSection),
    SalesReport(SalesReport),
    TripsReport(TripsReport),
    UmrahReport(UmrahReport),
    CashReport(CashReport),
    PartnersReport(PartnersReport),
}

impl From<CashSection> for SectionData {
    fn from(v: CashSection) -> Self {
        SectionData::Cash(v)
    }
}
impl From<ReservationSection> for SectionData {
    fn from(v: ReservationSection) -> Self {
        SectionData::Reservations(v)
    }
}
impl From<CountSection> for SectionData {
    fn from(v: CountSection) -> Self {
        SectionData::Counts(v)
    }
}
impl From<ChartSection> for SectionData {
    fn from(v: ChartSection) -> Self {
        SectionData::Charts(v)
    }
}
impl From<SalesReport> for SectionData {
    fn from(v: SalesReport) -> Self {
        SectionData::SalesReport(v)
    }
}
impl From<TripsReport> for SectionData {
    fn from(v: TripsReport) -> Self {
        SectionData::TripsReport(v)
    }
}
impl From<UmrahReport> for SectionData {
    fn from(v: UmrahReport) -> Self {
        SectionData::UmrahReport(v)
    }
}
impl From<CashReport> for SectionData {
    fn from(v: CashReport) -> Self {
        SectionData::CashReport(v)
    }
}
impl From<PartnersReport> for SectionData {
    fn from(v: PartnersReport) -> Self {
        SectionData::PartnersReport(v)
    }
}

/// One entry in the finite event stream of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DashboardEvent {
    Section {
        group: MetricGroup,
        fell_back: bool,
        data: SectionData,
    },
    Completed {
        snapshot: DashboardSnapshot,
    },
}

/// What a refresh trigger accomplished.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The pipeline ran to completion and committed this snapshot.
    Completed(DashboardSnapshot),
    /// Another run already owns the storage resource; the trigger was
    /// dropped, not queued.
    AlreadyRunning,
    /// Host teardown abandoned the run; nothing was committed.
    Cancelled,
}

/// Owns the aggregation pipeline, the stats cache, and the event
/// channel the host shell subscribes to.
pub struct DashboardService {
    sources: Sources,
    cache: Arc<StatsCache>,
    refreshing: AtomicBool,
    events: broadcast::Sender<DashboardEvent>,
    cancel: CancellationToken,
}

impl DashboardService {
    pub fn new(sources: Sources, cache: Arc<StatsCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sources,
            cache,
            refreshing: AtomicBool::new(false),
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the SQLite sources over the shared connection. The cache
    /// TTL can be overridden through local_settings
    /// (category `dashboard`, key `cache_ttl_secs`).
    pub fn with_sqlite(db: Arc<DbState>) -> Self {
        let ttl_secs = db
            .conn
            .lock()
            .ok()
            .and_then(|conn| db::get_setting(&conn, "dashboard", "cache_ttl_secs"))
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TTL_SECS);
        Self::new(
            Sources::sqlite(db),
            Arc::new(StatsCache::new(ChronoDuration::seconds(ttl_secs))),
        )
    }

    /// Synchronous cache entry points for the host shell.
    pub fn cache(&self) -> Arc<StatsCache> {
        self.cache.clone()
    }

    /// Subscribe to the event stream. Safe to call at any time; a
    /// receiver that falls behind lags, it never blocks a run.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Abandon any in-flight run. Called on host teardown; an abandoned
    /// run never commits a snapshot.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Cached snapshot if fresh, otherwise run the pipeline. While a
    /// concurrent run owns the resource this serves the last committed
    /// entry instead of queueing.
    pub async fn snapshot(&self) -> Option<DashboardSnapshot> {
        let (cached, hit) = self.cache.get();
        if hit {
            return cached;
        }
        match self.refresh().await {
            RefreshOutcome::Completed(snapshot) => Some(snapshot),
            RefreshOutcome::AlreadyRunning | RefreshOutcome::Cancelled => self.cache.get().0,
        }
    }

    /// Trigger an aggregation run. A trigger that arrives while a run
    /// is active is dropped — at most one run ever touches the storage
    /// resource.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Dashboard refresh requested while a run is active; dropping trigger");
            return RefreshOutcome::AlreadyRunning;
        }

        let outcome = self.run_pipeline().await;
        self.refreshing.store(false, Ordering::SeqCst);
        outcome
    }

    /// Manual refresh: guaranteed cache miss, then a fresh run.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.cache.invalidate();
        self.refresh().await
    }

    /// One fixed-order sequential pass over every metric group.
    async fn run_pipeline(&self) -> RefreshOutcome {
        let run_id = Uuid::new_v4().to_string();
        let today = Local::now().date_naive();
        info!(run_id = %run_id, "Dashboard aggregation run started");

        let mut failed: Vec<MetricGroup> = Vec::new();
        let sources = &self.sources;

        let Some(cash) = self
            .run_stage(MetricGroup::Cash, &mut failed, fetch_cash(sources, today))
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(reservations) = self
            .run_stage(
                MetricGroup::Reservations,
                &mut failed,
                fetch_reservations(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(customers) = self
            .run_stage(
                MetricGroup::Customers,
                &mut failed,
                fetch_customer_counts(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(trips) = self
            .run_stage(MetricGroup::Trips, &mut failed, fetch_trip_counts(sources))
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(umrah) = self
            .run_stage(MetricGroup::Umrah, &mut failed, fetch_umrah_counts(sources))
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(suppliers) = self
            .run_stage(
                MetricGroup::Suppliers,
                &mut failed,
                fetch_supplier_counts(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(charts) = self
            .run_stage(MetricGroup::Charts, &mut failed, fetch_charts(sources, today))
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(sales_report) = self
            .run_stage(
                MetricGroup::SalesReport,
                &mut failed,
                fetch_sales_report(sources, today),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(trips_report) = self
            .run_stage(
                MetricGroup::TripsReport,
                &mut failed,
                fetch_trips_report(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(umrah_report) = self
            .run_stage(
                MetricGroup::UmrahReport,
                &mut failed,
                fetch_umrah_report(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(cash_report) = self
            .run_stage(
                MetricGroup::CashReport,
                &mut failed,
                fetch_cash_report(sources, today),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };
        let Some(partners_report) = self
            .run_stage(
                MetricGroup::PartnersReport,
                &mut failed,
                fetch_partners_report(sources),
            )
            .await
        else {
            return self.abandoned(&run_id);
        };

        let snapshot = DashboardSnapshot {
            run_id: run_id.clone(),
            captured_at: Utc::now().to_rfc3339(),
            cash,
            reservations,
            customers,
            trips,
            umrah,
            suppliers,
            charts,
            sales_report,
            trips_report,
            umrah_report,
            cash_report,
            partners_report,
            failed_groups: failed.clone(),
        };

        self.cache.put(snapshot.clone());
        let _ = self.events.send(DashboardEvent::Completed {
            snapshot: snapshot.clone(),
        });

        if failed.is_empty() {
            info!(run_id = %run_id, "Dashboard aggregation run complete");
        } else {
            warn!(
                run_id = %run_id,
                defaulted = failed.len(),
                "Dashboard aggregation run complete with defaulted groups"
            );
        }
        RefreshOutcome::Completed(snapshot)
    }

    /// One pipeline stage: fetch with a timeout, fall back to the
    /// neutral default on failure, publish the section event. Returns
    /// `None` only when the run was cancelled.
    async fn run_stage<T>(
        &self,
        group: MetricGroup,
        failed: &mut Vec<MetricGroup>,
        fetch: impl Future<Output = Result<T, FetchError>>,
    ) -> Option<SectionResult<T>>
    where
        T: Clone + Default + Into<SectionData>,
    {
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = tokio::time::timeout(Duration::from_secs(FETCH_TIMEOUT_SECS), fetch) => {
                match result {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::Timeout(FETCH_TIMEOUT_SECS)),
                }
            }
        };

        let section = match fetched {
            Ok(value) => SectionResult::fresh(value),
            Err(error) => {
                warn!(
                    group = %group,
                    error = %error,
                    "Metric group fetch failed; falling back to neutral default"
                );
                failed.push(group);
                SectionResult::fallback(T::default())
            }
        };

        let _ = self.events.send(DashboardEvent::Section {
            group,
            fell_back: section.fell_back,
            data: section.value.clone().into(),
        });
        Some(section)
    }

    fn abandoned(&self, run_id: &str) -> RefreshOutcome {
        info!(run_id = %run_id, "Dashboard aggregation run cancelled; snapshot not committed");
        RefreshOutcome::Cancelled
    }
}

// ---------------------------------------------------------------------------
// Group fetchers
// ---------------------------------------------------------------------------

fn day_of(raw: &str) -> &str {
    raw.get(..10).unwrap_or(raw)
}

fn month_of(raw: &str) -> &str {
    raw.get(..7).unwrap_or(raw)
}

/// First day of the month `months` before `date`'s month.
fn months_back(date: NaiveDate, months: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 - months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

async fn fetch_cash(sources: &Sources, today: NaiveDate) -> Result<CashSection, FetchError> {
    let boxes = sources.cash.all_boxes().await?;
    let month_start = today.with_day(1).unwrap_or(today);
    let today_key = today.format("%Y-%m-%d").to_string();

    let mut section = CashSection::default();
    for cash_box in boxes.iter().filter(|b| b.is_active) {
        section.cash_balance += cash_box.current_balance;

        let transactions = sources
            .cash
            .transactions(&cash_box.id, month_start, today)
            .await?;
        for tx in &transactions {
            if tx.kind != TransactionKind::Income {
                continue;
            }
            section.monthly_revenue += tx.amount;
            if day_of(&tx.transaction_date) == today_key {
                section.today_sales += tx.amount;
            }
        }
    }
    Ok(section)
}

async fn fetch_reservations(sources: &Sources) -> Result<ReservationSection, FetchError> {
    let stats = sources.reservations.statistics(None, None).await?;
    Ok(ReservationSection {
        active_reservations: stats.confirmed_count,
    })
}

async fn fetch_customer_counts(sources: &Sources) -> Result<CountSection, FetchError> {
    let customers = sources.customers.all().await?;
    Ok(CountSection {
        total: customers.len() as i64,
        active: customers.iter().filter(|c| c.is_active).count() as i64,
    })
}

async fn fetch_trip_counts(sources: &Sources) -> Result<CountSection, FetchError> {
    let trips = sources.trips.all().await?;
    Ok(CountSection {
        total: trips.len() as i64,
        active: trips.iter().filter(|t| t.is_active()).count() as i64,
    })
}

async fn fetch_umrah_counts(sources: &Sources) -> Result<CountSection, FetchError> {
    let stats = sources.umrah.package_statistics().await?;
    Ok(CountSection {
        total: stats.total_packages,
        active: stats.active_packages,
    })
}

async fn fetch_supplier_counts(sources: &Sources) -> Result<CountSection, FetchError> {
    let suppliers = sources.suppliers.all().await?;
    Ok(CountSection {
        total: suppliers.len() as i64,
        active: suppliers.iter().filter(|s| s.is_active).count() as i64,
    })
}

async fn fetch_charts(sources: &Sources, today: NaiveDate) -> Result<ChartSection, FetchError> {
    let reservations = sources.reservations.all().await?;

    // Sales trend: six months of realized sales, grouped by month
    let trend_cutoff = months_back(today, 6).format("%Y-%m-%d").to_string();
    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();
    for r in reservations
        .iter()
        .filter(|r| counts_as_sale(&r.status) && day_of(&r.reservation_date) >= trend_cutoff.as_str())
    {
        *by_month
            .entry(month_of(&r.reservation_date).to_string())
            .or_insert(0.0) += r.selling_price;
    }
    let sales_trend = by_month
        .into_iter()
        .map(|(month, total)| MonthlySales { month, total })
        .collect();

    // Revenue split: last month's sales by service type, top slices only
    let split_cutoff = months_back(today, 1).format("%Y-%m-%d").to_string();
    let mut by_service: HashMap<String, f64> = HashMap::new();
    for r in reservations
        .iter()
        .filter(|r| counts_as_sale(&r.status) && day_of(&r.reservation_date) >= split_cutoff.as_str())
    {
        let label = if r.service_type.is_empty() {
            "Unspecified".to_string()
        } else {
            r.service_type.clone()
        };
        *by_service.entry(label).or_insert(0.0) += r.selling_price;
    }
    let mut revenue_split: Vec<RevenueSlice> = by_service
        .into_iter()
        .map(|(label, total)| RevenueSlice { label, total })
        .collect();
    revenue_split.sort_by(|a, b| b.total.total_cmp(&a.total));
    revenue_split.truncate(REVENUE_SPLIT_LIMIT);

    Ok(ChartSection {
        sales_trend,
        revenue_split,
    })
}

async fn fetch_sales_report(
    sources: &Sources,
    today: NaiveDate,
) -> Result<SalesReport, FetchError> {
    let reservations = sources.reservations.all().await?;

    let today_key = today.format("%Y-%m-%d").to_string();
    let week_start = today - ChronoDuration::days(today.weekday().num_days_from_sunday() as i64);
    let week_key = week_start.format("%Y-%m-%d").to_string();
    let month_key = today
        .with_day(1)
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string();

    let mut report = SalesReport {
        reservation_count: reservations.len() as i64,
        ..Default::default()
    };
    for r in reservations.iter().filter(|r| counts_as_sale(&r.status)) {
        let day = day_of(&r.reservation_date);
        if day == today_key {
            report.today_sales += r.selling_price;
        }
        if day >= week_key.as_str() {
            report.week_sales += r.selling_price;
        }
        if day >= month_key.as_str() {
            report.month_sales += r.selling_price;
        }
    }
    Ok(report)
}

async fn fetch_trips_report(sources: &Sources) -> Result<TripsReport, FetchError> {
    let trips = sources.trips.all().await?;

    let mut report = TripsReport::default();
    let mut confirmed_capacity = 0_i64;
    for trip in &trips {
        match trip.status.as_str() {
            "completed" => report.completed_trips += 1,
            "confirmed" => {
                report.active_trips += 1;
                report.booked_seats += trip.booked_seats;
                confirmed_capacity += trip.total_capacity;
            }
            "unconfirmed" => report.active_trips += 1,
            _ => {}
        }
    }
    report.occupancy_rate = ratio(report.booked_seats as f64, confirmed_capacity as f64);
    Ok(report)
}

async fn fetch_umrah_report(sources: &Sources) -> Result<UmrahReport, FetchError> {
    let stats = sources.umrah.package_statistics().await?;
    Ok(UmrahReport {
        active_packages: stats.active_packages,
        total_pilgrims: stats.total_pilgrims,
        total_revenue: stats.total_revenue,
        average_profit: per_unit(stats.total_profit, stats.total_packages as f64),
    })
}

async fn fetch_cash_report(sources: &Sources, today: NaiveDate) -> Result<CashReport, FetchError> {
    let boxes = sources.cash.all_boxes().await?;

    let mut report = CashReport::default();
    for cash_box in boxes.iter().filter(|b| b.is_active) {
        report.current_balance += cash_box.current_balance;

        // One unreadable box must not blank the whole card
        let transactions = match sources.cash.transactions(&cash_box.id, today, today).await {
            Ok(rows) => rows,
            Err(error) => {
                debug!(box_id = %cash_box.id, error = %error, "Skipping box in today's cash report");
                continue;
            }
        };
        for tx in &transactions {
            match tx.kind {
                TransactionKind::Income => report.today_income += tx.amount,
                TransactionKind::Expense => report.today_expense += tx.amount,
            }
        }
    }
    report.today_net = report.today_income - report.today_expense;
    Ok(report)
}

async fn fetch_partners_report(sources: &Sources) -> Result<PartnersReport, FetchError> {
    let customers = sources.customers.all().await?;
    let customers_with_balance = sources.customers.with_balance().await?;
    let suppliers = sources.suppliers.all().await?;
    let suppliers_with_balance = sources.suppliers.with_balance().await?;

    Ok(PartnersReport {
        total_customers: customers.len() as i64,
        customers_with_balance: customers_with_balance.len() as i64,
        total_suppliers: suppliers.len() as i64,
        suppliers_with_balance: suppliers_with_balance.len() as i64,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
