use rusqlite::params;
use serde::Serialize;

use crate::db::DbPool;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

impl User {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            // Rows created before the hash column existed have no usable credential
            password_hash: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            created_at: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        })
    }

    const SELECT_COLS: &'static str = "id, username, password_hash, created_at";

    pub fn get_by_id(pool: &DbPool, id: i64) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    /// Usernames are matched exactly; "Bob" and "bob" are different accounts.
    pub fn get_by_username(pool: &DbPool, username: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", Self::SELECT_COLS),
            params![username],
            Self::from_row,
        )
        .ok()
    }

    pub fn username_taken(pool: &DbPool, username: &str) -> bool {
        Self::get_by_username(pool, username).is_some()
    }

    pub fn count(pool: &DbPool) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap_or(0)
    }

    pub fn create(pool: &DbPool, username: &str, password_hash: &str) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, password_hash],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                "Username already in use.".to_string()
            }
            other => other.to_string(),
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_password(pool: &DbPool, id: i64, password_hash: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("User not found".to_string());
        }
        Ok(())
    }
}
