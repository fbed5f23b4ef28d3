//! SQLite-backed entity store for work items and sessions.
//!
//! Many independent processes write here (every hook invocation is its own
//! process), so the store holds no connection between operations:
//!
//! - every operation opens a connection, does its work, and drops it
//! - writes run in one `BEGIN IMMEDIATE` transaction and bump the store
//!   revision exactly once
//! - reads are plain WAL readers and never block writers
//! - `SQLITE_BUSY`/`SQLITE_LOCKED` are retried with [`RetryPolicy`]
//!
//! A missing database file is empty state. Reads never create it; the first
//! write does.

mod schema;
pub(crate) mod sessions;
pub(crate) mod work_items;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::error::{Result, StoreError};
use crate::types::{Entity, EntityId, Target};

const BUSY_TIMEOUT_MS: u64 = 25;

pub struct Store {
    path: PathBuf,
    retry: RetryPolicy,
    schema_ready: OnceCell<()>,
}

impl Store {
    /// Creates a handle for the database at `path`. Nothing touches the disk
    /// until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retry(path, RetryPolicy::default())
    }

    pub fn with_retry(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            retry,
            schema_ready: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Store-wide write counter. Zero for a store that was never written.
    pub fn revision(&self) -> Result<i64> {
        self.read("revision", |conn| schema::current_revision(conn))
    }

    /// Moves an entity to `target` under its state machine.
    pub fn transition(&self, id: EntityId, target: Target) -> Result<Entity> {
        match (id, target) {
            (EntityId::WorkItem(id), Target::WorkItem(status)) => {
                self.transition_work_item(id, status).map(Entity::WorkItem)
            }
            (EntityId::Session(id), Target::Session(state)) => {
                self.transition_session(id, state).map(Entity::Session)
            }
            (EntityId::WorkItem(_), Target::Session(state)) => Err(StoreError::InvalidState {
                entity: "work item",
                from: "work item status".to_string(),
                to: format!("session state '{}'", state),
            }),
            (EntityId::Session(_), Target::WorkItem(status)) => Err(StoreError::InvalidState {
                entity: "session",
                from: "session state".to_string(),
                to: format!("work item status '{}'", status),
            }),
        }
    }

    /// Runs a read. Missing database → `T::default()`.
    pub(crate) fn read<T: Default>(
        &self,
        label: &str,
        op: impl Fn(&Connection) -> Result<T>,
    ) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        self.retry.run(label, || {
            let conn = self.connect()?;
            self.ensure_readable(&conn)?;
            op(&conn)
        })
    }

    /// Runs `op` inside one immediate transaction. `op` receives the new store
    /// revision, which it stamps on every session row it touches.
    pub(crate) fn write<T>(
        &self,
        label: &str,
        op: impl Fn(&Transaction<'_>, i64) -> Result<T>,
    ) -> Result<T> {
        self.retry.run(label, || {
            let mut conn = self.connect()?;
            self.ensure_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let revision = schema::bump_revision(&tx)?;
            let value = op(&tx, revision)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Reads only fall back to schema init (and its write lock) when the
    /// store predates the current schema.
    fn ensure_readable(&self, conn: &Connection) -> Result<()> {
        if self.schema_ready.get().is_some() {
            return Ok(());
        }
        if schema::is_current(conn)? {
            let _ = self.schema_ready.set(());
            return Ok(());
        }
        self.ensure_schema(conn)
    }

    fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| schema::init_schema(conn))
            .map(|_| ())
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| StoreError::unavailable("create data dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags).map_err(|err| {
            if crate::error::is_busy(&err) {
                StoreError::Contention { attempts: 1 }
            } else {
                StoreError::unavailable(format!("open {}", self.path.display()), err)
            }
        })?;

        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(conn)
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn format_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
}

pub(crate) fn invalid_text(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown {}: {}", what, value),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocationKey, NewWorkItem, SessionFields, SessionState, WorkItemStatus};

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(temp_dir.path().join("nested").join("womtrees.db"));
        (temp_dir, store)
    }

    #[test]
    fn reads_on_missing_store_are_empty_and_do_not_create_it() {
        let (_temp_dir, store) = temp_store();

        assert_eq!(store.revision().expect("revision"), 0);
        assert!(store.list_work_items(&Default::default()).expect("list").is_empty());
        assert!(store.list_active_sessions().expect("list").is_empty());
        assert!(store.get_work_item(1).expect("get").is_none());
        assert!(!store.exists());
    }

    #[test]
    fn first_write_creates_store_and_bumps_revision() {
        let (_temp_dir, store) = temp_store();

        store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");

        assert!(store.exists());
        assert_eq!(store.revision().expect("revision"), 1);
    }

    #[test]
    fn failed_write_leaves_revision_untouched() {
        let (_temp_dir, store) = temp_store();
        let item = store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");

        let err = store
            .transition_work_item(item.id, WorkItemStatus::Done)
            .expect_err("todo cannot jump to done");
        assert!(matches!(err, StoreError::InvalidState { .. }));
        assert_eq!(store.revision().expect("revision"), 1);
    }

    #[test]
    fn fresh_handle_reads_while_another_writer_holds_the_lock() {
        let (_temp_dir, store) = temp_store();
        store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");

        let blocker = Connection::open(store.path()).expect("open");
        blocker.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");

        let reader = Store::with_retry(store.path(), RetryPolicy::no_retry());
        assert_eq!(reader.list_work_items(&Default::default()).expect("list").len(), 1);
        assert_eq!(reader.revision().expect("revision"), 1);

        blocker.execute_batch("ROLLBACK").expect("release");
    }

    #[test]
    fn transition_dispatches_by_entity_kind() {
        let (_temp_dir, store) = temp_store();
        let item = store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");
        let session = store
            .upsert_session(
                &LocationKey::new("myrepo/feat-auth", "%1"),
                &SessionFields {
                    state: SessionState::Working,
                    pid: 0,
                    repo: "myrepo".to_string(),
                    branch: "feat/auth".to_string(),
                    work_item_id: None,
                    prompt: None,
                    resume_id: None,
                },
            )
            .expect("upsert");

        let moved = store
            .transition(EntityId::WorkItem(item.id), Target::WorkItem(WorkItemStatus::Working))
            .expect("start item");
        assert!(matches!(moved, Entity::WorkItem(ref w) if w.status == WorkItemStatus::Working));

        let moved = store
            .transition(EntityId::Session(session.id), Target::Session(SessionState::Done))
            .expect("finish session");
        assert!(matches!(moved, Entity::Session(ref s) if s.state == SessionState::Done));

        let err = store
            .transition(EntityId::Session(session.id), Target::WorkItem(WorkItemStatus::Review))
            .expect_err("kind mismatch");
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }
}
