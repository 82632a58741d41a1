//! File hash and MIME type rule repositories.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Repository for the `blocked_files` table.
pub struct BlockedFilesRepo;

impl BlockedFilesRepo {
    /// Insert or replace a blocked hash.
    pub fn upsert(conn: &Connection, file_hash: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO blocked_files (file_hash, value) VALUES (?1, ?2)
             ON CONFLICT(file_hash) DO UPDATE SET value = excluded.value",
            params![file_hash.to_ascii_lowercase(), value],
        )?;
        Ok(())
    }

    /// Descriptor for a blocked hash. A row with a NULL value yields an
    /// empty descriptor.
    pub fn find(conn: &Connection, file_hash: &str) -> Result<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM blocked_files WHERE file_hash = ?1 COLLATE NOCASE LIMIT 1",
                [file_hash],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.map(Option::unwrap_or_default))
    }
}

/// Repository for the `blocked_mimetypes` table.
pub struct BlockedMimeRepo;

impl BlockedMimeRepo {
    /// Add a MIME type. Stored lowercase.
    pub fn insert(conn: &Connection, mime: &str) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO blocked_mimetypes (value) VALUES (?1)",
            [mime.to_ascii_lowercase()],
        )?;
        Ok(inserted > 0)
    }

    /// Whether the MIME type is blocked.
    pub fn contains(conn: &Connection, mime: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM blocked_mimetypes WHERE value = ?1 COLLATE NOCASE LIMIT 1",
                [mime],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    const EICAR: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn hash_lookup_ignores_case() {
        let conn = setup_db();
        BlockedFilesRepo::upsert(&conn, &EICAR.to_uppercase(), "eicar test file").unwrap();

        assert_eq!(
            BlockedFilesRepo::find(&conn, EICAR).unwrap().as_deref(),
            Some("eicar test file")
        );
        let stored: String = conn
            .query_row("SELECT file_hash FROM blocked_files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, EICAR);
    }

    #[test]
    fn null_descriptor_is_empty() {
        let conn = setup_db();
        conn.execute("INSERT INTO blocked_files (file_hash) VALUES (?1)", [EICAR])
            .unwrap();

        assert_eq!(BlockedFilesRepo::find(&conn, EICAR).unwrap(), Some(String::new()));
        assert_eq!(BlockedFilesRepo::find(&conn, "00").unwrap(), None);
    }

    #[test]
    fn mime_rules() {
        let conn = setup_db();
        assert!(BlockedMimeRepo::insert(&conn, "Application/X-Dosexec").unwrap());
        assert!(!BlockedMimeRepo::insert(&conn, "application/x-dosexec").unwrap());

        assert!(BlockedMimeRepo::contains(&conn, "application/x-dosexec").unwrap());
        assert!(!BlockedMimeRepo::contains(&conn, "text/html").unwrap());
    }
}
