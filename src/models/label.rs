use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// A user-owned category that notes may point at.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Label {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelForm {
    pub name: String,
}

impl Label {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Label {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            created_at: row.get::<_, Option<String>>("created_at")?.unwrap_or_default(),
        })
    }

    pub fn find_for_user(pool: &DbPool, id: i64, user_id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM labels WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list_for_user(pool: &DbPool, user_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let mut stmt = match conn
            .prepare("SELECT * FROM labels WHERE user_id = ?1 ORDER BY name COLLATE NOCASE")
        {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        stmt.query_map(params![user_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Whether `user_id` already has a label called `name`, ignoring `except_id` (the label being renamed).
    pub fn name_taken(pool: &DbPool, user_id: i64, name: &str, except_id: Option<i64>) -> bool {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return false,
        };
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM labels WHERE user_id = ?1 AND name = ?2 AND id != ?3",
                params![user_id, name, except_id.unwrap_or(0)],
                |row| row.get(0),
            )
            .unwrap_or(0);
        count > 0
    }

    pub fn count_notes(pool: &DbPool, id: i64, user_id: i64) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE label_id = ?1 AND user_id = ?2",
            params![id, user_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    pub fn count_for_user(pool: &DbPool, user_id: i64) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM labels WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    pub fn create(pool: &DbPool, user_id: i64, form: &LabelForm) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO labels (user_id, name) VALUES (?1, ?2)",
            params![user_id, form.name.trim()],
        )
        .map_err(map_unique_violation)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(pool: &DbPool, id: i64, user_id: i64, form: &LabelForm) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE labels SET name = ?1 WHERE id = ?2 AND user_id = ?3",
                params![form.name.trim(), id, user_id],
            )
            .map_err(map_unique_violation)?;
        if changed == 0 {
            return Err("Label not found".to_string());
        }
        Ok(())
    }

    /// Deletes the label; notes that used it become unlabeled via `ON DELETE SET NULL`.
    pub fn delete(pool: &DbPool, id: i64, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "DELETE FROM labels WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Label not found".to_string());
        }
        Ok(())
    }
}

fn map_unique_violation(e: rusqlite::Error) -> String {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            "You already have a label with that name.".to_string()
        }
        other => other.to_string(),
    }
}
