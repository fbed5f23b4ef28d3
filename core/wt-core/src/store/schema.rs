use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const REVISION_KEY: &str = "revision";
const TABLES: [&str; 3] = ["store_meta", "work_items", "sessions"];
const LATE_SESSION_COLUMNS: [&str; 2] = ["resume_id", "seq"];

/// Creates or upgrades the schema inside one immediate transaction, so racing
/// first writers cannot both run the column migrations.
pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = create_tables(conn).and_then(|_| ensure_sessions_columns(conn));
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(err)
        }
    }
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
         );
         INSERT OR IGNORE INTO store_meta (key, value) VALUES ('revision', 0);
         CREATE TABLE IF NOT EXISTS work_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo TEXT NOT NULL,
            branch TEXT NOT NULL,
            name TEXT,
            prompt TEXT,
            worktree_path TEXT,
            status TEXT NOT NULL DEFAULT 'todo',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_work_items_repo ON work_items(repo);
         CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
         CREATE UNIQUE INDEX IF NOT EXISTS idx_work_items_active_branch
            ON work_items(repo, branch) WHERE status != 'done';
         CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            work_item_id INTEGER REFERENCES work_items(id),
            repo TEXT NOT NULL,
            branch TEXT NOT NULL,
            mux_session TEXT NOT NULL,
            mux_pane TEXT NOT NULL,
            pid INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'working',
            prompt TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_sessions_work_item ON sessions(work_item_id);
         CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
         CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_location
            ON sessions(mux_session, mux_pane) WHERE state != 'done';",
    )?;
    Ok(())
}

/// True when every table and late column already exists. Takes no lock
/// beyond a plain read.
pub(super) fn is_current(conn: &Connection) -> Result<bool> {
    let mut present = 0;
    for table in TABLES {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        if found.is_some() {
            present += 1;
        }
    }
    if present < TABLES.len() {
        return Ok(false);
    }

    let columns = session_columns(conn)?;
    Ok(LATE_SESSION_COLUMNS
        .iter()
        .all(|late| columns.iter().any(|name| name == late)))
}

fn session_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(sessions)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Columns added after the first release of the sessions table.
fn ensure_sessions_columns(conn: &Connection) -> Result<()> {
    let columns = session_columns(conn)?;

    if !columns.iter().any(|name| name == "resume_id") {
        conn.execute("ALTER TABLE sessions ADD COLUMN resume_id TEXT", [])?;
    }

    if !columns.iter().any(|name| name == "seq") {
        conn.execute(
            "ALTER TABLE sessions ADD COLUMN seq INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    Ok(())
}

pub(super) fn bump_revision(conn: &Connection) -> Result<i64> {
    conn.execute(
        "UPDATE store_meta SET value = value + 1 WHERE key = ?1",
        params![REVISION_KEY],
    )?;
    current_revision(conn)
}

pub(super) fn current_revision(conn: &Connection) -> Result<i64> {
    let value = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![REVISION_KEY],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_creates_tables() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .expect("prepare");
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("rows");

        for table in ["store_meta", "work_items", "sessions"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn adds_late_columns_to_old_sessions_table() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_item_id INTEGER,
                repo TEXT NOT NULL,
                branch TEXT NOT NULL,
                mux_session TEXT NOT NULL,
                mux_pane TEXT NOT NULL,
                pid INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'working',
                prompt TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );",
        )
        .expect("legacy table");

        init_schema(&conn).expect("init");

        let mut stmt = conn.prepare("PRAGMA table_info(sessions)").expect("prepare");
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("rows");
        assert!(columns.contains(&"resume_id".to_string()));
        assert!(columns.contains(&"seq".to_string()));
    }

    #[test]
    fn is_current_tracks_tables_and_late_columns() {
        let conn = Connection::open_in_memory().expect("open");
        assert!(!is_current(&conn).expect("empty"));

        conn.execute_batch(
            "CREATE TABLE store_meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL);
             CREATE TABLE work_items (id INTEGER PRIMARY KEY);
             CREATE TABLE sessions (id INTEGER PRIMARY KEY, resume_id TEXT);",
        )
        .expect("partial schema");
        assert!(!is_current(&conn).expect("missing seq"));

        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(is_current(&conn).expect("current"));
    }

    #[test]
    fn revision_counts_bumps() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert_eq!(current_revision(&conn).expect("revision"), 0);
        assert_eq!(bump_revision(&conn).expect("bump"), 1);
        assert_eq!(bump_revision(&conn).expect("bump"), 2);
    }
}
