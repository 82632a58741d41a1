//! Decision log repository.

use rusqlite::types::Type;
use rusqlite::{params, Connection};
use warden_core::AuditRecord;

use crate::error::Result;
use crate::models::{check_kind_from_str, parse_datetime, DecisionLogEntry};

/// Repository for the `decision_log` table.
pub struct DecisionLogRepo;

impl DecisionLogRepo {
    /// Append a record.
    pub fn insert(conn: &Connection, record: &AuditRecord) -> Result<i64> {
        conn.execute(
            "INSERT INTO decision_log (check_kind, subject, status, message, source, latency_ms, client)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.check.as_str(),
                record.subject,
                record.status,
                record.message,
                record.source,
                record.latency_ms as i64,
                record.client,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent entries first.
    pub fn recent(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<DecisionLogEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, check_kind, subject, status, message, source, latency_ms, client, created_at
             FROM decision_log ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let entries = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                let kind: String = row.get(1)?;
                let check = check_kind_from_str(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        Type::Text,
                        format!("unknown check kind: {kind}").into(),
                    )
                })?;

                Ok(DecisionLogEntry {
                    id: row.get(0)?,
                    check,
                    subject: row.get(2)?,
                    status: row.get(3)?,
                    message: row.get(4)?,
                    source: row.get(5)?,
                    latency_ms: row.get(6)?,
                    client: row.get(7)?,
                    created_at: parse_datetime(&row.get::<_, String>(8)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Total number of entries.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM decision_log", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete entries older than the given number of days.
    pub fn prune(conn: &Connection, retention_days: u32) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM decision_log WHERE created_at < datetime('now', ?1)",
            [format!("-{retention_days} days")],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use std::time::Duration;
    use warden_core::{CheckKind, Decision, Verdict, VerdictSource};

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn blocked(subject: &str) -> AuditRecord {
        let verdict = Verdict::new(Decision::block("Blocked by IOC"), VerdictSource::Reputation);
        AuditRecord::new(CheckKind::Url, subject, &verdict, Duration::from_millis(12))
    }

    #[test]
    fn insert_and_read_back() {
        let conn = setup_db();
        DecisionLogRepo::insert(&conn, &blocked("https://bad.example/").with_client("10.0.0.5"))
            .unwrap();

        let entries = DecisionLogRepo::recent(&conn, 10, 0).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.check, CheckKind::Url);
        assert_eq!(entry.subject, "https://bad.example/");
        assert_eq!(entry.status, "blocked");
        assert_eq!(entry.message, "Blocked by IOC");
        assert_eq!(entry.source, "reputation");
        assert_eq!(entry.latency_ms, 12);
        assert_eq!(entry.client.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn recent_pages_newest_first() {
        let conn = setup_db();
        for i in 0..5 {
            DecisionLogRepo::insert(&conn, &blocked(&format!("https://site{i}.example/"))).unwrap();
        }

        let page = DecisionLogRepo::recent(&conn, 2, 1).unwrap();
        let subjects: Vec<&str> = page.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["https://site3.example/", "https://site2.example/"]);
        assert_eq!(DecisionLogRepo::count(&conn).unwrap(), 5);
    }

    #[test]
    fn prune_keeps_fresh_entries() {
        let conn = setup_db();
        DecisionLogRepo::insert(&conn, &blocked("https://a.example/")).unwrap();
        conn.execute(
            "INSERT INTO decision_log (check_kind, subject, status, message, source, created_at)
             VALUES ('host', 'old.example', 'allowed', 'Access granted', 'default', '2000-01-01 00:00:00')",
            [],
        )
        .unwrap();

        assert_eq!(DecisionLogRepo::prune(&conn, 30).unwrap(), 1);
        assert_eq!(DecisionLogRepo::count(&conn).unwrap(), 1);
    }
}
