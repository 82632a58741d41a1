//! Lookup cache repository.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use warden_core::CacheEntry;

use crate::error::Result;

/// Repository for the `cache` table.
pub struct CacheRepo;

impl CacheRepo {
    /// Get one entry regardless of age.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<CacheEntry>> {
        let row = conn
            .query_row(
                "SELECT key, response, timestamp FROM cache WHERE key = ?1",
                [key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((key, response, fetched_at)) => Ok(Some(CacheEntry {
                key,
                value: serde_json::from_str::<Value>(&response)?,
                fetched_at,
            })),
            None => Ok(None),
        }
    }

    /// Insert or replace an entry.
    pub fn put(conn: &Connection, entry: &CacheEntry) -> Result<()> {
        let response = serde_json::to_string(&entry.value)?;
        conn.execute(
            "INSERT INTO cache (key, response, timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET response = excluded.response, timestamp = excluded.timestamp",
            params![entry.key, response, entry.fetched_at],
        )?;
        Ok(())
    }

    /// Every entry, expired ones included, ordered by key.
    ///
    /// Rows whose response is not valid JSON are kept as strings.
    pub fn all(conn: &Connection) -> Result<Vec<CacheEntry>> {
        let mut stmt = conn.prepare("SELECT key, response, timestamp FROM cache ORDER BY key")?;
        let entries = stmt
            .query_map([], |row| {
                let response: String = row.get(1)?;
                Ok(CacheEntry {
                    key: row.get(0)?,
                    value: serde_json::from_str(&response).unwrap_or(Value::String(response)),
                    fetched_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Delete entries fetched before the cutoff. Returns how many went.
    pub fn purge_older_than(conn: &Connection, cutoff: i64) -> Result<usize> {
        let deleted = conn.execute("DELETE FROM cache WHERE timestamp < ?1", [cutoff])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::schema::run_migrations;
    use serde_json::json;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn entry(key: &str, value: Value, fetched_at: i64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value,
            fetched_at,
        }
    }

    #[test]
    fn put_then_get() {
        let conn = setup_db();
        let e = entry("https://otx/a", json!({"pulse_info": {"count": 0}}), 1_700_000_000);
        CacheRepo::put(&conn, &e).unwrap();

        assert_eq!(CacheRepo::get(&conn, "https://otx/a").unwrap(), Some(e));
        assert_eq!(CacheRepo::get(&conn, "https://otx/b").unwrap(), None);
    }

    #[test]
    fn put_replaces_value_and_timestamp() {
        let conn = setup_db();
        CacheRepo::put(&conn, &entry("k", json!(1), 10)).unwrap();
        CacheRepo::put(&conn, &entry("k", json!(2), 20)).unwrap();

        let all = CacheRepo::all(&conn).unwrap();
        assert_eq!(all, vec![entry("k", json!(2), 20)]);
    }

    #[test]
    fn corrupt_row_fails_get_but_not_listing() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO cache (key, response, timestamp) VALUES ('bad', 'not json', 5)",
            [],
        )
        .unwrap();

        assert!(matches!(CacheRepo::get(&conn, "bad"), Err(StorageError::Json(_))));
        assert_eq!(CacheRepo::all(&conn).unwrap()[0].value, json!("not json"));
    }

    #[test]
    fn purge_drops_old_rows() {
        let conn = setup_db();
        CacheRepo::put(&conn, &entry("old", json!(null), 100)).unwrap();
        CacheRepo::put(&conn, &entry("new", json!(null), 200)).unwrap();

        assert_eq!(CacheRepo::purge_older_than(&conn, 150).unwrap(), 1);
        assert_eq!(CacheRepo::all(&conn).unwrap().len(), 1);
    }
}
