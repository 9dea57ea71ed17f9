//! Local SQLite database layer for TravelBooks.
//!
//! Uses rusqlite with WAL mode. The connection is held behind a single
//! mutex: the storage engine supports exactly one logical operation in
//! flight, so every caller takes the lock for the duration of one query
//! and releases it before doing anything else. Provides schema
//! migrations and the `local_settings` helpers used for dashboard
//! configuration.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/travelbooks.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("travelbooks.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings plus the cash and partner tables.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- cash_boxes (tills and bank accounts)
        CREATE TABLE IF NOT EXISTS cash_boxes (
            id TEXT PRIMARY KEY,
            box_code TEXT,
            name TEXT NOT NULL,
            box_type TEXT NOT NULL DEFAULT 'cash' CHECK (box_type IN ('cash', 'bank')),
            currency TEXT NOT NULL DEFAULT 'EGP',
            opening_balance REAL NOT NULL DEFAULT 0,
            current_balance REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- cash_transactions (income/expense vouchers per box)
        CREATE TABLE IF NOT EXISTS cash_transactions (
            id TEXT PRIMARY KEY,
            voucher_number TEXT,
            cash_box_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
            amount REAL NOT NULL,
            category TEXT NOT NULL DEFAULT '',
            description TEXT,
            party_name TEXT,
            payment_method TEXT NOT NULL DEFAULT 'cash',
            transaction_date TEXT NOT NULL,
            reference_number TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(cash_box_id) REFERENCES cash_boxes(id) ON DELETE CASCADE
        );

        -- customers
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            balance REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- suppliers
        CREATE TABLE IF NOT EXISTS suppliers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            service_kind TEXT,
            balance REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);
        CREATE INDEX IF NOT EXISTS idx_cash_transactions_box ON cash_transactions(cash_box_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: booking tables (reservations, trips, umrah packages).
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- trips (group trips with flattened component costs)
        CREATE TABLE IF NOT EXISTS trips (
            id TEXT PRIMARY KEY,
            trip_code TEXT,
            name TEXT NOT NULL,
            destination TEXT,
            status TEXT NOT NULL DEFAULT 'unconfirmed' CHECK (status IN ('unconfirmed', 'confirmed', 'completed', 'cancelled')),
            start_date TEXT,
            end_date TEXT,
            total_capacity INTEGER NOT NULL DEFAULT 0,
            booked_seats INTEGER NOT NULL DEFAULT 0,
            available_seats INTEGER NOT NULL DEFAULT 0,
            accommodation_cost REAL NOT NULL DEFAULT 0,
            transportation_cost REAL NOT NULL DEFAULT 0,
            guide_cost REAL NOT NULL DEFAULT 0,
            optional_tour_cost REAL NOT NULL DEFAULT 0,
            other_cost REAL NOT NULL DEFAULT 0,
            optional_tour_revenue REAL NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- reservations (individual service bookings, optionally tied to a trip)
        CREATE TABLE IF NOT EXISTS reservations (
            id TEXT PRIMARY KEY,
            reservation_number TEXT,
            customer_id TEXT,
            trip_id TEXT,
            service_type TEXT NOT NULL DEFAULT '',
            reservation_date TEXT NOT NULL,
            travel_date TEXT,
            number_of_people INTEGER NOT NULL DEFAULT 1,
            selling_price REAL NOT NULL DEFAULT 0,
            cost_price REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'confirmed', 'paid', 'completed', 'cancelled')),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE SET NULL,
            FOREIGN KEY(trip_id) REFERENCES trips(id) ON DELETE SET NULL
        );

        -- umrah_packages (cost figures are per pilgrim)
        CREATE TABLE IF NOT EXISTS umrah_packages (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'in_progress', 'completed', 'cancelled')),
            is_active INTEGER NOT NULL DEFAULT 1,
            departure_date TEXT,
            number_of_persons INTEGER NOT NULL DEFAULT 0,
            total_revenue REAL NOT NULL DEFAULT 0,
            cost_per_person REAL NOT NULL DEFAULT 0,
            net_profit REAL NOT NULL DEFAULT 0,
            profit_margin REAL NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (booking tables)");
    Ok(())
}

/// Migration v3: indexes for the dashboard aggregate queries.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_cash_transactions_date ON cash_transactions(transaction_date);
        CREATE INDEX IF NOT EXISTS idx_cash_transactions_kind ON cash_transactions(kind);
        CREATE INDEX IF NOT EXISTS idx_reservations_status ON reservations(status);
        CREATE INDEX IF NOT EXISTS idx_reservations_date ON reservations(reservation_date);
        CREATE INDEX IF NOT EXISTS idx_reservations_trip ON reservations(trip_id);
        CREATE INDEX IF NOT EXISTS idx_trips_status ON trips(status);
        CREATE INDEX IF NOT EXISTS idx_trips_start_date ON trips(start_date);
        CREATE INDEX IF NOT EXISTS idx_umrah_packages_active ON umrah_packages(is_active);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (dashboard indexes)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("enable foreign keys");
        conn
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn cash_transaction_kind_is_checked() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO cash_boxes (id, name) VALUES ('box-1', 'Main till')",
            [],
        )
        .expect("insert box");

        let bad = conn.execute(
            "INSERT INTO cash_transactions (id, cash_box_id, kind, amount, transaction_date)
             VALUES ('tx-bad', 'box-1', 'transfer', 10.0, datetime('now'))",
            [],
        );
        assert!(bad.is_err(), "invalid kind should be rejected");

        conn.execute(
            "INSERT INTO cash_transactions (id, cash_box_id, kind, amount, transaction_date)
             VALUES ('tx-1', 'box-1', 'income', 10.0, datetime('now'))",
            [],
        )
        .expect("valid kind should insert");
    }

    #[test]
    fn deleting_a_box_cascades_to_its_transactions() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO cash_boxes (id, name) VALUES ('box-2', 'Bank')",
            [],
        )
        .expect("insert box");
        conn.execute(
            "INSERT INTO cash_transactions (id, cash_box_id, kind, amount, transaction_date)
             VALUES ('tx-2', 'box-2', 'expense', 25.0, datetime('now'))",
            [],
        )
        .expect("insert transaction");

        conn.execute("DELETE FROM cash_boxes WHERE id = 'box-2'", [])
            .expect("delete box");

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM cash_transactions WHERE cash_box_id = 'box-2'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(count, 0, "transactions should cascade-delete with the box");
    }

    #[test]
    fn reservation_status_is_checked() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let bad = conn.execute(
            "INSERT INTO reservations (id, reservation_date, status)
             VALUES ('res-bad', datetime('now'), 'waitlisted')",
            [],
        );
        assert!(bad.is_err(), "invalid status should be rejected");
    }

    #[test]
    fn settings_roundtrip() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        set_setting(&conn, "dashboard", "cache_ttl_secs", "120").expect("set");
        assert_eq!(
            get_setting(&conn, "dashboard", "cache_ttl_secs"),
            Some("120".to_string())
        );

        set_setting(&conn, "dashboard", "cache_ttl_secs", "600").expect("update");
        assert_eq!(
            get_setting(&conn, "dashboard", "cache_ttl_secs"),
            Some("600".to_string())
        );

        assert!(get_setting(&conn, "dashboard", "missing").is_none());
    }
}
