//! TravelBooks - dashboard statistics and reporting core.
//!
//! This crate owns the numbers on the home dashboard of the desktop
//! accounting app: the local SQLite layer, the six business-domain data
//! sources, the strictly sequential aggregation pipeline that composes
//! the dashboard snapshot, the TTL cache holding the latest snapshot,
//! the pure financial report formulas, and the compact currency
//! formatting the stat cards display. The host shell subscribes to
//! [`DashboardEvent`]s to fill its cards incrementally and reads or
//! invalidates the cache through [`StatsCache`].

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod cashbox;
pub mod customers;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod format;
pub mod reports;
pub mod reservations;
pub mod stats;
pub mod suppliers;
pub mod trips;
pub mod umrah;

pub use dashboard::{DashboardEvent, DashboardService, RefreshOutcome, SectionData, Sources};
pub use error::FetchError;
pub use stats::{DashboardSnapshot, MetricGroup, StatsCache};

/// Initialize structured console logging. Log file rotation is the host
/// application's concern; it installs its own writer around this crate.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,travel_books_lib=debug"));

    let console_layer = fmt::layer().with_target(true);
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .is_ok()
    {
        info!("Starting TravelBooks core v{}", env!("CARGO_PKG_VERSION"));
    }
}
