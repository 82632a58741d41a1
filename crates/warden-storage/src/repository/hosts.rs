//! TLS exclusion repository.

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Repository for the `tls_excluded_hosts` table.
pub struct TlsExclusionRepo;

impl TlsExclusionRepo {
    /// Add a host. Stored lowercase.
    pub fn insert(conn: &Connection, hostname: &str) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tls_excluded_hosts (hostname) VALUES (?1)",
            [hostname.to_ascii_lowercase()],
        )?;
        Ok(inserted > 0)
    }

    /// Whether the host is excluded from interception.
    pub fn contains(conn: &Connection, hostname: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM tls_excluded_hosts WHERE hostname = ?1 COLLATE NOCASE LIMIT 1",
                [hostname],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
