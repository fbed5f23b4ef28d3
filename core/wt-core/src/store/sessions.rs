//! Session rows: location-keyed upsert, state transitions, bulk completion.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

use super::{format_ts, invalid_text, now, parse_ts, Store};
use crate::error::{is_unique_violation, Result, StoreError};
use crate::types::{LocationKey, Session, SessionFields, SessionFilter, SessionId, SessionState};

const ENTITY: &str = "session";
const COLUMNS: &str = "id, work_item_id, repo, branch, mux_session, mux_pane, pid, state, \
                       prompt, resume_id, seq, created_at, updated_at";
/// Ids bound per statement; older SQLite builds cap host parameters at 999.
const MAX_BOUND_IDS: usize = 500;

impl Store {
    /// Finds the non-done session at `location` and merges `fields` into it,
    /// or creates one. Racing callers end up sharing a single row.
    ///
    /// Only a `working` update opens a new row at a location whose last
    /// session finished; late `waiting` or `done` updates return that
    /// finished row unchanged.
    pub fn upsert_session(&self, location: &LocationKey, fields: &SessionFields) -> Result<Session> {
        self.write("upsert_session", |tx, revision| upsert(tx, revision, location, fields))
    }

    pub fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.read("get_session", |conn| load(conn, id))
    }

    /// The non-done session at `location`, if any.
    pub fn find_active_session(&self, location: &LocationKey) -> Result<Option<Session>> {
        self.read("find_active_session", |conn| find_active(conn, location))
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        self.read("list_sessions", |conn| list(conn, filter))
    }

    pub fn list_active_sessions(&self) -> Result<Vec<Session>> {
        self.read("list_active_sessions", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sessions WHERE state != 'done' ORDER BY id",
                COLUMNS
            ))?;
            let sessions = stmt
                .query_map([], from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
    }

    pub fn transition_session(&self, id: SessionId, target: SessionState) -> Result<Session> {
        self.write("transition_session", |tx, revision| {
            let session = load(tx, id)?.ok_or(StoreError::NotFound { entity: ENTITY, id })?;
            if !session.state.can_transition_to(target) {
                return Err(StoreError::InvalidState {
                    entity: ENTITY,
                    from: session.state.to_string(),
                    to: target.to_string(),
                });
            }
            if session.state == target {
                return Ok(session);
            }
            tx.execute(
                "UPDATE sessions SET state = ?1, seq = ?2, updated_at = ?3 WHERE id = ?4",
                params![target.as_str(), revision, format_ts(&now()), id],
            )?;
            load(tx, id)?.ok_or(StoreError::NotFound { entity: ENTITY, id })
        })
    }

    /// Marks the given sessions done in one transaction. Already-done and
    /// unknown ids are skipped; returns how many rows changed.
    pub fn mark_sessions_done(&self, ids: &[SessionId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.write("mark_sessions_done", |tx, revision| {
            let done = SessionState::Done.as_str();
            let stamp = format_ts(&now());
            let mut changed = 0;
            for chunk in ids.chunks(MAX_BOUND_IDS) {
                let placeholders = (0..chunk.len())
                    .map(|i| format!("?{}", i + 4))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "UPDATE sessions SET state = ?1, seq = ?2, updated_at = ?3 \
                     WHERE state != 'done' AND id IN ({})",
                    placeholders
                );

                let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 3);
                values.push(&done);
                values.push(&revision);
                values.push(&stamp);
                values.extend(chunk.iter().map(|id| id as &dyn ToSql));

                changed += tx.execute(&sql, params_from_iter(values))?;
            }
            Ok(changed)
        })
    }
}

/// Merge-or-insert inside an open write transaction.
pub(crate) fn upsert(
    conn: &Connection,
    revision: i64,
    location: &LocationKey,
    fields: &SessionFields,
) -> Result<Session> {
    let stamp = format_ts(&now());

    if let Some(existing) = find_active(conn, location)? {
        if !existing.state.can_transition_to(fields.state) {
            return Err(StoreError::InvalidState {
                entity: ENTITY,
                from: existing.state.to_string(),
                to: fields.state.to_string(),
            });
        }
        conn.execute(
            "UPDATE sessions SET \
                state = ?1, \
                pid = CASE WHEN ?2 = 0 THEN pid ELSE ?2 END, \
                work_item_id = COALESCE(work_item_id, ?3), \
                prompt = COALESCE(?4, prompt), \
                resume_id = COALESCE(?5, resume_id), \
                seq = ?6, \
                updated_at = ?7 \
             WHERE id = ?8",
            params![
                fields.state.as_str(),
                fields.pid,
                fields.work_item_id,
                fields.prompt,
                fields.resume_id,
                revision,
                stamp,
                existing.id
            ],
        )?;
        return load(conn, existing.id)?.ok_or(StoreError::NotFound {
            entity: ENTITY,
            id: existing.id,
        });
    }

    if fields.state != SessionState::Working {
        if let Some(finished) = find_latest(conn, location)? {
            return Ok(finished);
        }
    }

    let inserted = conn.execute(
        "INSERT INTO sessions \
            (work_item_id, repo, branch, mux_session, mux_pane, pid, state, prompt, resume_id, \
             seq, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            fields.work_item_id,
            fields.repo,
            fields.branch,
            location.mux_session,
            location.pane,
            fields.pid,
            fields.state.as_str(),
            fields.prompt,
            fields.resume_id,
            revision,
            stamp
        ],
    );
    match inserted {
        Ok(_) => {}
        // Another writer claimed the key; the retry will take the update path.
        Err(err) if is_unique_violation(&err) => return Err(StoreError::Contention { attempts: 1 }),
        Err(err) => return Err(err.into()),
    }

    let id = conn.last_insert_rowid();
    load(conn, id)?.ok_or(StoreError::NotFound { entity: ENTITY, id })
}

pub(crate) fn list(conn: &Connection, filter: &SessionFilter) -> Result<Vec<Session>> {
    let mut query = format!("SELECT {} FROM sessions WHERE 1=1", COLUMNS);
    let mut values: Vec<&dyn ToSql> = Vec::new();
    let state = filter.state.map(|state| state.as_str());

    if let Some(repo) = filter.repo.as_ref() {
        query.push_str(&format!(" AND repo = ?{}", values.len() + 1));
        values.push(repo);
    }
    if let Some(work_item_id) = filter.work_item_id.as_ref() {
        query.push_str(&format!(" AND work_item_id = ?{}", values.len() + 1));
        values.push(work_item_id);
    }
    if let Some(state) = state.as_ref() {
        query.push_str(&format!(" AND state = ?{}", values.len() + 1));
        values.push(state);
    }
    query.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&query)?;
    let sessions = stmt
        .query_map(values.as_slice(), from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

pub(crate) fn load(conn: &Connection, id: SessionId) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(session)
}

fn find_active(conn: &Connection, location: &LocationKey) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!(
                "SELECT {} FROM sessions \
                 WHERE mux_session = ?1 AND mux_pane = ?2 AND state != 'done'",
                COLUMNS
            ),
            params![location.mux_session, location.pane],
            from_row,
        )
        .optional()?;
    Ok(session)
}

/// Newest row at `location`, whatever its state.
fn find_latest(conn: &Connection, location: &LocationKey) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!(
                "SELECT {} FROM sessions \
                 WHERE mux_session = ?1 AND mux_pane = ?2 \
                 ORDER BY id DESC LIMIT 1",
                COLUMNS
            ),
            params![location.mux_session, location.pane],
            from_row,
        )
        .optional()?;
    Ok(session)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let state_raw: String = row.get(7)?;
    let state = SessionState::parse(&state_raw)
        .ok_or_else(|| invalid_text(7, "session state", &state_raw))?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Session {
        id: row.get(0)?,
        work_item_id: row.get(1)?,
        repo: row.get(2)?,
        branch: row.get(3)?,
        location: LocationKey {
            mux_session: row.get(4)?,
            pane: row.get(5)?,
        },
        pid: row.get(6)?,
        state,
        prompt: row.get(8)?,
        resume_id: row.get(9)?,
        seq: row.get(10)?,
        created_at: parse_ts(11, &created_at)?,
        updated_at: parse_ts(12, &updated_at)?,
    })
}
