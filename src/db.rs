//! Local SQLite database layer for Tableside POS.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! [`DbState`] handed to every record module. Also owns the change feed so
//! that every mutation can publish the affected collection.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{PosError, PosResult};
use crate::feed::ChangeFeed;

/// Shared handle to the database connection and the change feed.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
    pub feed: ChangeFeed,
}

impl DbState {
    pub fn lock(&self) -> PosResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            error!("db lock poisoned: {e}");
            PosError::from(e)
        })
    }

    /// Open a fresh in-memory database with every migration applied.
    pub fn open_in_memory(feed_capacity: usize) -> PosResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
            feed: ChangeFeed::new(feed_capacity),
        })
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `db_path`.
///
/// Creates the parent directory if needed, opens the connection, sets
/// pragmas, and runs any pending migrations. On open failure, deletes the
/// file and retries once.
pub fn init(db_path: &Path, feed_capacity: usize) -> PosResult<DbState> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: db_path.to_path_buf(),
        feed: ChangeFeed::new(feed_capacity),
    })
}

fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    // Fail fast on a file that is not a database.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(conn)
}

pub(crate) fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            error!("reading schema version failed: {e}");
            PosError::from(e)
        })?;

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

    Ok(())
}

/// Migration v1: owner, tables, catalog, order lines, expenses.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS restaurants (
            id TEXT PRIMARY KEY,
            display_name TEXT,
            email TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dining_tables (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            category_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS order_lines (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            table_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            cost REAL NOT NULL DEFAULT 0,
            spent_at TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("migration v1 failed: {e}");
        PosError::from(e)
    })?;
    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: product images and owner-scoped indexes.
fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE products ADD COLUMN image_url TEXT;

        CREATE INDEX IF NOT EXISTS idx_dining_tables_owner ON dining_tables(owner_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_categories_owner ON categories(owner_id, name);
        CREATE INDEX IF NOT EXISTS idx_products_owner ON products(owner_id, name);
        CREATE INDEX IF NOT EXISTS idx_order_lines_owner_table
            ON order_lines(owner_id, table_id, completed);
        CREATE INDEX IF NOT EXISTS idx_expenses_owner ON expenses(owner_id, spent_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("migration v2 failed: {e}");
        PosError::from(e)
    })?;
    info!("Applied migration v2");
    Ok(())
}

/// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
pub(crate) fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> PosResult<T>,
) -> PosResult<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                error!("rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that text
/// ordering matches time ordering.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Number of rows in `table` owned by `owner_id`.
pub(crate) fn count_owned(conn: &Connection, table: &str, owner_id: &str) -> PosResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE owner_id = ?1");
    Ok(conn.query_row(&sql, params![owner_id], |row| row.get(0))?)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_to_latest() {
        let db = DbState::open_in_memory(4).unwrap();
        let conn = db.lock().unwrap();
        let tables = table_names(&conn);
        for expected in [
            "categories",
            "dining_tables",
            "expenses",
            "order_lines",
            "products",
            "restaurants",
            "schema_version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // v2 column
        conn.prepare("SELECT image_url FROM products")
            .expect("image_url column exists");
    }

    #[test]
    fn test_migrations_idempotent() {
        let db = DbState::open_in_memory(4).unwrap();
        let conn = db.lock().unwrap();
        run_migrations(&conn).expect("second run is a no-op");
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, i64::from(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_unreadable_schema_version_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_version (applied_at TEXT);")
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, PosError::Storage(_)));
        assert!(!table_names(&conn).contains(&"products".to_string()));
    }

    #[test]
    fn test_quantity_check_constraint() {
        let db = DbState::open_in_memory(4).unwrap();
        let conn = db.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO order_lines (id, owner_id, table_id, product_id, name, price, quantity, created_at)
             VALUES ('l1', 'u1', 't1', 'p1', 'Taco', 15, -1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = DbState::open_in_memory(4).unwrap();
        let conn = db.lock().unwrap();
        let result: PosResult<()> = with_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO categories (id, owner_id, name, created_at)
                 VALUES ('c1', 'u1', 'Tacos', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(PosError::not_found("anything"))
        });
        assert!(result.is_err());
        assert_eq!(count_owned(&conn, "categories", "u1").unwrap(), 0);
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let ts = DateTime::parse_from_rfc3339("2026-03-04T05:06:07.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = ts_to_sql(&ts);
        assert_eq!(text, "2026-03-04T05:06:07.123456Z");
        assert_eq!(parse_ts(0, &text).unwrap(), ts);
        assert!(parse_ts(0, "yesterday").is_err());
    }

    #[test]
    fn test_init_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pos.db");
        {
            let db = init(&path, 4).unwrap();
            assert_eq!(db.db_path, path);
        }
        let db = init(&path, 4).unwrap();
        let conn = db.lock().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_init_recovers_from_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.db");
        fs::write(&path, vec![b'x'; 4096]).unwrap();
        let db = init(&path, 4).unwrap();
        let conn = db.lock().unwrap();
        assert_eq!(count_owned(&conn, "expenses", "u1").unwrap(), 0);
    }
}
