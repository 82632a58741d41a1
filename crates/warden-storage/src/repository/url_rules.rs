//! Block and redirect rule repositories.

use rusqlite::{params, Connection, OptionalExtension, Row};
use warden_core::RuleScope;

use crate::error::{Result, StorageError};
use crate::models::{RedirectRule, UrlRule};

/// Prefix rules match when the stored value is a literal prefix of the
/// subject. `LIKE` would treat `%` and `_` in stored URLs as wildcards.
const PREFIX_MATCH: &str = "substr(?2, 1, length(value)) = value";

fn parse_scope(table: &'static str, value: String) -> Result<RuleScope> {
    value
        .parse()
        .map_err(|_| StorageError::InvalidValue { table, value })
}

fn where_clause(scope: RuleScope) -> String {
    match scope {
        RuleScope::UrlPrefix => format!("type = ?1 AND {PREFIX_MATCH}"),
        RuleScope::Hostname | RuleScope::Domain => "type = ?1 AND value = ?2".to_string(),
    }
}

/// Host and domain subjects arrive lower-cased, so those values are stored
/// lower-cased too. Prefix values are kept literal.
fn stored_value(scope: RuleScope, value: &str) -> String {
    match scope {
        RuleScope::UrlPrefix => value.to_string(),
        RuleScope::Hostname | RuleScope::Domain => value.to_ascii_lowercase(),
    }
}

/// Repository for the `blocked_urls` table.
pub struct BlockedUrlsRepo;

impl BlockedUrlsRepo {
    /// Insert a rule. Returns false if the value already exists.
    pub fn insert(conn: &Connection, scope: RuleScope, value: &str) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO blocked_urls (type, value) VALUES (?1, ?2)",
            params![scope.as_str(), stored_value(scope, value)],
        )?;
        Ok(inserted > 0)
    }

    /// List every rule.
    pub fn list(conn: &Connection) -> Result<Vec<UrlRule>> {
        let mut stmt = conn.prepare("SELECT id, type, value FROM blocked_urls ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, scope, value)| {
                Ok(UrlRule {
                    id,
                    scope: parse_scope("blocked_urls", scope)?,
                    value,
                })
            })
            .collect()
    }

    /// Whether any rule of the given scope matches the subject.
    pub fn matches(conn: &Connection, scope: RuleScope, subject: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM blocked_urls WHERE {} LIMIT 1", where_clause(scope));
        let found = conn
            .query_row(&sql, params![scope.as_str(), subject], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

/// Repository for the `redirect_urls` table.
pub struct RedirectUrlsRepo;

impl RedirectUrlsRepo {
    /// Insert or replace a redirect rule.
    pub fn upsert(conn: &Connection, scope: RuleScope, value: &str, proxy: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO redirect_urls (type, value, proxy) VALUES (?1, ?2, ?3)
             ON CONFLICT(value) DO UPDATE SET type = excluded.type, proxy = excluded.proxy",
            params![scope.as_str(), stored_value(scope, value), proxy],
        )?;
        Ok(())
    }

    /// List every rule.
    pub fn list(conn: &Connection) -> Result<Vec<RedirectRule>> {
        let mut stmt =
            conn.prepare("SELECT id, type, value, proxy FROM redirect_urls ORDER BY id")?;
        let rows = stmt
            .query_map([], |row: &Row<'_>| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, scope, value, proxy)| {
                Ok(RedirectRule {
                    id,
                    scope: parse_scope("redirect_urls", scope)?,
                    value,
                    proxy,
                })
            })
            .collect()
    }

    /// Proxy of the first rule of the given scope matching the subject.
    pub fn find(conn: &Connection, scope: RuleScope, subject: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT proxy FROM redirect_urls WHERE {} ORDER BY id LIMIT 1",
            where_clause(scope)
        );
        let proxy = conn
            .query_row(&sql, params![scope.as_str(), subject], |row| row.get(0))
            .optional()?;
        Ok(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn blocked_domain_matches_exactly() {
        let conn = setup_db();
        BlockedUrlsRepo::insert(&conn, RuleScope::Domain, "blocked.com").unwrap();

        assert!(BlockedUrlsRepo::matches(&conn, RuleScope::Domain, "blocked.com").unwrap());
        assert!(!BlockedUrlsRepo::matches(&conn, RuleScope::Domain, "notblocked.com").unwrap());
        // Scope is part of the match.
        assert!(!BlockedUrlsRepo::matches(&conn, RuleScope::Hostname, "blocked.com").unwrap());
    }

    #[test]
    fn prefix_rules_match_literally() {
        let conn = setup_db();
        BlockedUrlsRepo::insert(&conn, RuleScope::UrlPrefix, "https://example.com/a_b%").unwrap();

        assert!(BlockedUrlsRepo::matches(
            &conn,
            RuleScope::UrlPrefix,
            "https://example.com/a_b%/file"
        )
        .unwrap());
        assert!(!BlockedUrlsRepo::matches(
            &conn,
            RuleScope::UrlPrefix,
            "https://example.com/aXbY/file"
        )
        .unwrap());
        assert!(!BlockedUrlsRepo::matches(&conn, RuleScope::UrlPrefix, "https://example.com/").unwrap());
    }

    #[test]
    fn duplicate_values_are_ignored() {
        let conn = setup_db();
        assert!(BlockedUrlsRepo::insert(&conn, RuleScope::Domain, "blocked.com").unwrap());
        assert!(!BlockedUrlsRepo::insert(&conn, RuleScope::Domain, "blocked.com").unwrap());
        assert_eq!(BlockedUrlsRepo::list(&conn).unwrap().len(), 1);
    }

    #[test]
    fn host_and_domain_values_are_stored_lowercase() {
        let conn = setup_db();
        BlockedUrlsRepo::insert(&conn, RuleScope::Hostname, "WWW.Example.com").unwrap();
        BlockedUrlsRepo::insert(&conn, RuleScope::Domain, "Blocked.COM").unwrap();
        BlockedUrlsRepo::insert(&conn, RuleScope::UrlPrefix, "https://example.com/AbC").unwrap();
        RedirectUrlsRepo::upsert(&conn, RuleScope::Domain, "WhatIsMyIP.com", "http://localhost:8081")
            .unwrap();

        assert!(BlockedUrlsRepo::matches(&conn, RuleScope::Hostname, "www.example.com").unwrap());
        assert!(BlockedUrlsRepo::matches(&conn, RuleScope::Domain, "blocked.com").unwrap());
        assert!(BlockedUrlsRepo::matches(&conn, RuleScope::UrlPrefix, "https://example.com/AbC/x").unwrap());
        assert!(!BlockedUrlsRepo::matches(&conn, RuleScope::UrlPrefix, "https://example.com/abc/x").unwrap());
        assert_eq!(
            RedirectUrlsRepo::find(&conn, RuleScope::Domain, "whatismyip.com").unwrap(),
            Some("http://localhost:8081".to_string())
        );
    }

    #[test]
    fn unknown_scope_is_reported() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO blocked_urls (type, value) VALUES ('regex', '.*')",
            [],
        )
        .unwrap();

        let err = BlockedUrlsRepo::list(&conn).unwrap_err();
        assert!(matches!(err, StorageError::InvalidValue { table: "blocked_urls", .. }));
    }

    #[test]
    fn redirect_returns_proxy_and_upserts() {
        let conn = setup_db();
        RedirectUrlsRepo::upsert(&conn, RuleScope::Hostname, "internal.corp", "10.0.0.1:3128")
            .unwrap();

        assert_eq!(
            RedirectUrlsRepo::find(&conn, RuleScope::Hostname, "internal.corp").unwrap(),
            Some("10.0.0.1:3128".to_string())
        );

        RedirectUrlsRepo::upsert(&conn, RuleScope::Hostname, "internal.corp", "10.0.0.2:3128")
            .unwrap();
        let rules = RedirectUrlsRepo::list(&conn).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].proxy, "10.0.0.2:3128");

        assert_eq!(
            RedirectUrlsRepo::find(&conn, RuleScope::Domain, "internal.corp").unwrap(),
            None
        );
    }

    #[test]
    fn redirect_prefix_match() {
        let conn = setup_db();
        RedirectUrlsRepo::upsert(&conn, RuleScope::UrlPrefix, "https://intranet.example/", "proxy:8080")
            .unwrap();

        assert_eq!(
            RedirectUrlsRepo::find(&conn, RuleScope::UrlPrefix, "https://intranet.example/wiki")
                .unwrap()
                .as_deref(),
            Some("proxy:8080")
        );
    }
}
