use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

pub type DbPool = Pool<SqliteConnectionManager>;

const DEFAULT_DB_PATH: &str = "data/uzrasine.db";

/// One step of the linear schema history.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// Schema history, oldest first. Never edit an entry that has shipped; append a new one.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create users table",
        up: "
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
        ",
        down: "DROP TABLE users;",
    },
    Migration {
        version: 2,
        description: "add password_hash col to user",
        up: "
            ALTER TABLE users ADD COLUMN password_hash TEXT;
            ALTER TABLE users DROP COLUMN password;
        ",
        down: "
            ALTER TABLE users ADD COLUMN password TEXT;
            ALTER TABLE users DROP COLUMN password_hash;
        ",
    },
    Migration {
        version: 3,
        description: "create labels and notes",
        up: "
            CREATE TABLE labels (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE notes (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                label_id INTEGER,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (label_id) REFERENCES labels(id) ON DELETE SET NULL
            );

            CREATE INDEX idx_labels_user ON labels(user_id);
            CREATE INDEX idx_notes_user ON notes(user_id, updated_at);
            CREATE INDEX idx_notes_label ON notes(label_id);
        ",
        down: "
            DROP TABLE notes;
            DROP TABLE labels;
        ",
    },
    Migration {
        version: 4,
        description: "create sessions and settings",
        up: "
            CREATE TABLE sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                expires_at DATETIME NOT NULL,
                remember INTEGER NOT NULL DEFAULT 0,
                ip_hash TEXT,
                user_agent TEXT,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);
            CREATE INDEX idx_sessions_expiry ON sessions(expires_at);

            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT
            );
        ",
        down: "
            DROP TABLE settings;
            DROP TABLE sessions;
        ",
    },
    Migration {
        version: 5,
        description: "add csrf_token to sessions",
        up: "
            ALTER TABLE sessions ADD COLUMN csrf_token TEXT NOT NULL DEFAULT '';
            UPDATE sessions SET csrf_token = lower(hex(randomblob(16)));
        ",
        down: "ALTER TABLE sessions DROP COLUMN csrf_token;",
    },
];

pub fn db_path() -> String {
    std::env::var("UZRASINE_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

pub fn init_pool() -> Result<DbPool, Box<dyn std::error::Error>> {
    let path = db_path();
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // foreign_keys is per-connection, so every pooled connection gets it
    let manager = SqliteConnectionManager::file(&path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    log::info!("Database opened at {}", path);
    Ok(pool)
}

fn ensure_migrations_table(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );",
    )
}

/// Highest applied migration version, 0 for an empty database.
pub fn current_version(pool: &DbPool) -> Result<i64, Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    ensure_migrations_table(&conn)?;
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply every pending migration in order, each inside its own transaction.
/// Returns how many were applied.
pub fn run_migrations(pool: &DbPool) -> Result<usize, Box<dyn std::error::Error>> {
    let current = current_version(pool)?;
    let mut conn = pool.get()?;
    let mut applied = 0;

    for m in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(m.up)
            .map_err(|e| format!("migration {} ({}) failed: {}", m.version, m.description, e))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![m.version, m.description],
        )?;
        tx.commit()?;
        log::info!("Applied migration {}: {}", m.version, m.description);
        applied += 1;
    }

    Ok(applied)
}

/// Undo migrations newest-first until `target` is the highest applied version.
pub fn rollback_to(pool: &DbPool, target: i64) -> Result<usize, Box<dyn std::error::Error>> {
    let current = current_version(pool)?;
    let mut conn = pool.get()?;
    let mut reverted = 0;

    for m in MIGRATIONS
        .iter()
        .rev()
        .filter(|m| m.version > target && m.version <= current)
    {
        let tx = conn.transaction()?;
        tx.execute_batch(m.down)
            .map_err(|e| format!("rollback of {} ({}) failed: {}", m.version, m.description, e))?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            params![m.version],
        )?;
        tx.commit()?;
        log::info!("Reverted migration {}: {}", m.version, m.description);
        reverted += 1;
    }

    Ok(reverted)
}

pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let defaults = [
        // Sessions
        ("session_expiry_hours", "24"),
        ("remember_me_days", "30"),
        ("task_session_cleanup_interval", "30"),
        // Security
        ("login_rate_limit", "5"),
        ("password_hash_cost", "12"),
        ("registration_open", "true"),
        // Notes
        ("notes_per_page", "20"),
    ];

    for (key, value) in defaults {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    Ok(())
}
