//! Database schema and migrations.
//!
//! The rule tables keep the column layout external tooling already writes
//! (`blocked_urls`, `redirect_urls`, `tls_excluded_hosts`, `blocked_files`,
//! `blocked_mimetypes`, `category_policy`), so a database prepared by hand
//! opens without conversion.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        if current_version < 2 {
            migrate_v2(conn)?;
        }

        if current_version < 3 {
            migrate_v3(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: rule tables.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: rule tables");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS blocked_urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            value TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_blocked_urls_type ON blocked_urls (type, value);

        CREATE TABLE IF NOT EXISTS redirect_urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            value TEXT NOT NULL UNIQUE,
            proxy TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_redirect_urls_type ON redirect_urls (type, value);

        CREATE TABLE IF NOT EXISTS tls_excluded_hosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hostname TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS blocked_files (
            file_hash TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS blocked_mimetypes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            value TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS category_policy (
            category_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            action TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Migration to version 2: lookup cache.
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("Applying migration v2: lookup cache");

    // timestamp is unix seconds of the fetch
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache (
            key TEXT PRIMARY KEY,
            response TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Migration to version 3: decision log.
fn migrate_v3(conn: &Connection) -> Result<()> {
    info!("Applying migration v3: decision log");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS decision_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            check_kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            source TEXT NOT NULL,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            client TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decision_log_created_at ON decision_log (created_at)",
        [],
    )?;

    Ok(())
}
