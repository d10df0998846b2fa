use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Note {
    pub id: i64,
    pub user_id: i64,
    pub label_id: Option<i64>,
    pub label_name: Option<String>,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteForm {
    pub title: String,
    pub content: String,
    pub label_id: Option<i64>,
}

/// Which labels a notes listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelFilter {
    #[default]
    Any,
    Unlabeled,
    Label(i64),
}

impl LabelFilter {
    /// Parses the `label` query parameter: empty = any, `none` = unlabeled, otherwise a label id.
    /// Anything unparseable falls back to `Any`.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            None | Some("") => LabelFilter::Any,
            Some("none") => LabelFilter::Unlabeled,
            Some(raw) => raw.parse().map(LabelFilter::Label).unwrap_or_default(),
        }
    }

    pub fn as_param(&self) -> String {
        match self {
            LabelFilter::Any => String::new(),
            LabelFilter::Unlabeled => "none".to_string(),
            LabelFilter::Label(id) => id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    pub label: LabelFilter,
}

impl NoteFilter {
    /// WHERE clause fragment (after `n.user_id = ?1`) and its parameters, numbered from `?2`.
    fn clause(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut sql = String::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(q) = self.title.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            values.push(Box::new(format!("%{}%", escape_like(q))));
            sql.push_str(&format!(" AND n.title LIKE ?{} ESCAPE '\\'", values.len() + 1));
        }

        match self.label {
            LabelFilter::Any => {}
            LabelFilter::Unlabeled => sql.push_str(" AND n.label_id IS NULL"),
            LabelFilter::Label(id) => {
                values.push(Box::new(id));
                sql.push_str(&format!(" AND n.label_id = ?{}", values.len() + 1));
            }
        }

        (sql, values)
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

const SELECT_SQL: &str = "SELECT n.id, n.user_id, n.label_id, l.name AS label_name, n.title, n.content,
            n.created_at, n.updated_at
     FROM notes n
     LEFT JOIN labels l ON l.id = n.label_id AND l.user_id = n.user_id";

impl Note {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Note {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            label_id: row.get("label_id")?,
            label_name: row.get("label_name")?,
            title: row.get("title")?,
            content: row.get("content")?,
            created_at: row.get::<_, Option<String>>("created_at")?.unwrap_or_default(),
            updated_at: row.get::<_, Option<String>>("updated_at")?.unwrap_or_default(),
        })
    }

    pub fn find_for_user(pool: &DbPool, id: i64, user_id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("{} WHERE n.id = ?1 AND n.user_id = ?2", SELECT_SQL),
            params![id, user_id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list_for_user(
        pool: &DbPool,
        user_id: i64,
        filter: &NoteFilter,
        limit: i64,
        offset: i64,
    ) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        let (where_extra, extra) = filter.clause();
        let limit_idx = extra.len() + 2;
        let sql = format!(
            "{} WHERE n.user_id = ?1{} ORDER BY n.updated_at DESC, n.id DESC LIMIT ?{} OFFSET ?{}",
            SELECT_SQL,
            where_extra,
            limit_idx,
            limit_idx + 1
        );

        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id)];
        params_vec.extend(extra);
        params_vec.push(Box::new(limit));
        params_vec.push(Box::new(offset));

        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Note listing query failed to prepare: {}", e);
                return vec![];
            }
        };
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        stmt.query_map(params_refs.as_slice(), Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn count_for_user(pool: &DbPool, user_id: i64, filter: &NoteFilter) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };

        let (where_extra, extra) = filter.clause();
        let sql = format!(
            "SELECT COUNT(*) FROM notes n WHERE n.user_id = ?1{}",
            where_extra
        );
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id)];
        params_vec.extend(extra);
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, params_refs.as_slice(), |row| row.get(0))
            .unwrap_or(0)
    }

    pub fn create(pool: &DbPool, user_id: i64, form: &NoteForm) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        check_label_owner(&conn, user_id, form.label_id)?;
        conn.execute(
            "INSERT INTO notes (user_id, label_id, title, content) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, form.label_id, form.title.trim(), form.content.trim()],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(pool: &DbPool, id: i64, user_id: i64, form: &NoteForm) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        check_label_owner(&conn, user_id, form.label_id)?;
        let changed = conn
            .execute(
                "UPDATE notes SET title = ?1, content = ?2, label_id = ?3,
                 updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?4 AND user_id = ?5",
                params![form.title.trim(), form.content.trim(), form.label_id, id, user_id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Note not found".to_string());
        }
        Ok(())
    }

    pub fn delete(pool: &DbPool, id: i64, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Note not found".to_string());
        }
        Ok(())
    }
}

/// A note may only point at a label owned by the same user.
fn check_label_owner(
    conn: &rusqlite::Connection,
    user_id: i64,
    label_id: Option<i64>,
) -> Result<(), String> {
    let Some(label_id) = label_id else {
        return Ok(());
    };
    let owned: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM labels WHERE id = ?1 AND user_id = ?2",
            params![label_id, user_id],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    if owned == 0 {
        return Err("Not a valid choice.".to_string());
    }
    Ok(())
}
