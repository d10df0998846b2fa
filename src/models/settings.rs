use rusqlite::params;

use crate::db::DbPool;

/// Runtime tunables stored in the `settings` table (seeded by `db::seed_defaults`,
/// edited directly in the database).
pub struct Setting;

impl Setting {
    pub fn get(pool: &DbPool, key: &str) -> Option<String> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn get_bool(pool: &DbPool, key: &str) -> bool {
        Self::get(pool, key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }

    /// Parsed integer, or `default` when the key is missing or malformed.
    pub fn get_i64_or(pool: &DbPool, key: &str, default: i64) -> i64 {
        Self::get(pool, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}
