//! Category policy repository.

use rusqlite::{params, Connection, OptionalExtension};
use warden_core::{CategoryAction, CategoryPolicy};

use crate::error::{Result, StorageError};

/// Categories blocked out of the box.
pub const DEFAULT_BLOCKED_CATEGORIES: &[u32] = &[
    72, 58, 2, 4, 5, 7, 8, 10, 67, 11, 13, 16, 60, 63, 20, 57, 73, 170, 28, 77,
];

/// Known categories and their display names.
pub const DEFAULT_CATEGORIES: &[(u32, &str)] = &[
    (72, "Academic Fraud"),
    (58, "Adult Themes"),
    (53, "Advertising"),
    (2, "Alcohol"),
    (76, "Anime/Manga/Webcomic"),
    (3, "Auctions"),
    (70, "Automotive"),
    (4, "Blogs"),
    (56, "Business Services"),
    (5, "Chat"),
    (6, "Classifieds"),
    (7, "Dating"),
    (8, "Drugs"),
    (9, "Ecommerce/Shopping"),
    (52, "Educational Institutions"),
    (10, "File Storage"),
    (55, "Financial Institutions"),
    (67, "Forums/Message boards"),
    (11, "Gambling"),
    (12, "Games"),
    (49, "Government"),
    (13, "Hate/Discrimination"),
    (14, "Health and Fitness"),
    (15, "Humor"),
    (16, "Instant Messaging"),
    (17, "Jobs/Employment"),
    (60, "Lingerie/Bikini"),
    (19, "Movies"),
    (50, "Music"),
    (33, "News/Media"),
    (69, "Non-Profits"),
    (63, "Nudity"),
    (20, "P2P/File sharing"),
    (57, "Parked Domains"),
    (48, "Photo Sharing"),
    (71, "Podcasts"),
    (66, "Politics"),
    (64, "Pornography"),
    (21, "Portals"),
    (61, "Proxy/Anonymizer"),
    (22, "Radio"),
    (65, "Religious"),
    (54, "Research/Reference"),
    (23, "Search Engines"),
    (62, "Sexuality"),
    (24, "Social Networking"),
    (47, "Software/Technology"),
    (51, "Sports"),
    (59, "Tasteless"),
    (34, "Television"),
    (73, "Tobacco"),
    (68, "Travel"),
    (170, "URL Shorteners"),
    (26, "Video Sharing"),
    (27, "Visual Search Engines"),
    (28, "Weapons"),
    (77, "Web Spam"),
    (29, "Webmail"),
];

fn default_action(id: u32) -> CategoryAction {
    if DEFAULT_BLOCKED_CATEGORIES.contains(&id) {
        CategoryAction::Blocked
    } else {
        CategoryAction::Allowed
    }
}

fn policy_from_row(id: String, name: String, action: String) -> Result<CategoryPolicy> {
    let id = id.trim().parse::<u32>().map_err(|_| StorageError::InvalidValue {
        table: "category_policy",
        value: id.clone(),
    })?;
    let action = action.parse::<CategoryAction>().map_err(|_| StorageError::InvalidValue {
        table: "category_policy",
        value: action.clone(),
    })?;
    Ok(CategoryPolicy { id, name, action })
}

/// Repository for the `category_policy` table.
///
/// `category_id` is a TEXT column; ids are written in decimal.
pub struct CategoryRepo;

impl CategoryRepo {
    /// Insert or replace a category policy.
    pub fn upsert(conn: &Connection, policy: &CategoryPolicy) -> Result<()> {
        conn.execute(
            "INSERT INTO category_policy (category_id, name, action) VALUES (?1, ?2, ?3)
             ON CONFLICT(category_id) DO UPDATE SET name = excluded.name, action = excluded.action",
            params![policy.id.to_string(), policy.name, policy.action.as_str()],
        )?;
        Ok(())
    }

    /// Get the policy for a category.
    pub fn get(conn: &Connection, id: u32) -> Result<Option<CategoryPolicy>> {
        let row = conn
            .query_row(
                "SELECT category_id, name, action FROM category_policy WHERE category_id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, action)| policy_from_row(id, name, action))
            .transpose()
    }

    /// Insert the default category table, leaving existing rows alone.
    /// Returns how many rows were added.
    pub fn seed_defaults(conn: &Connection) -> Result<usize> {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO category_policy (category_id, name, action) VALUES (?1, ?2, ?3)",
        )?;

        let mut added = 0;
        for (id, name) in DEFAULT_CATEGORIES {
            added += stmt.execute(params![id.to_string(), name, default_action(*id).as_str()])?;
        }
        Ok(added)
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
    fn blocked_defaults_have_names() {
        for id in DEFAULT_BLOCKED_CATEGORIES {
            assert!(
                DEFAULT_CATEGORIES.iter().any(|(known, _)| known == id),
                "category {id} has no name"
            );
        }
    }

    #[test]
    fn seeding_is_idempotent() {
        let conn = setup_db();

        assert_eq!(CategoryRepo::seed_defaults(&conn).unwrap(), DEFAULT_CATEGORIES.len());
        assert_eq!(CategoryRepo::seed_defaults(&conn).unwrap(), 0);

        let gambling = CategoryRepo::get(&conn, 11).unwrap().unwrap();
        assert_eq!(gambling.name, "Gambling");
        assert_eq!(gambling.action, CategoryAction::Blocked);

        let news = CategoryRepo::get(&conn, 33).unwrap().unwrap();
        assert_eq!(news.action, CategoryAction::Allowed);
    }

    #[test]
    fn seeding_keeps_operator_changes() {
        let conn = setup_db();
        CategoryRepo::upsert(
            &conn,
            &CategoryPolicy {
                id: 11,
                name: "Gambling".to_string(),
                action: CategoryAction::Allowed,
            },
        )
        .unwrap();

        CategoryRepo::seed_defaults(&conn).unwrap();

        assert_eq!(
            CategoryRepo::get(&conn, 11).unwrap().unwrap().action,
            CategoryAction::Allowed
        );
    }

    #[test]
    fn unknown_category_is_none() {
        let conn = setup_db();
        assert_eq!(CategoryRepo::get(&conn, 999).unwrap(), None);
    }

    #[test]
    fn bad_action_is_reported() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO category_policy (category_id, name, action) VALUES ('5', 'Chat', 'maybe')",
            [],
        )
        .unwrap();

        assert!(matches!(
            CategoryRepo::get(&conn, 5),
            Err(StorageError::InvalidValue { .. })
        ));
    }
}
