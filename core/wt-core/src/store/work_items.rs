//! Work item rows: creation, validated status transitions, edits, deletion.

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use super::{format_ts, invalid_text, now, parse_ts, Store};
use crate::error::{is_unique_violation, Result, StoreError};
use crate::types::{NewWorkItem, WorkItem, WorkItemEdit, WorkItemFilter, WorkItemId, WorkItemStatus};

const ENTITY: &str = "work item";
const COLUMNS: &str =
    "id, repo, branch, name, prompt, worktree_path, status, created_at, updated_at";

impl Store {
    /// Creates a work item in `todo`. Fails with `DuplicateBranch` when the
    /// branch is already held by a non-done item of the same repository.
    pub fn create_work_item(&self, new: &NewWorkItem) -> Result<WorkItem> {
        self.write("create_work_item", |tx, _revision| {
            if let Some(existing) = find_active_branch(tx, &new.repo, &new.branch, None)? {
                return Err(StoreError::DuplicateBranch {
                    branch: new.branch.clone(),
                    existing,
                });
            }

            let stamp = format_ts(&now());
            let inserted = tx.execute(
                "INSERT INTO work_items \
                    (repo, branch, name, prompt, worktree_path, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    new.repo,
                    new.branch,
                    new.name,
                    new.prompt,
                    new.worktree_path,
                    WorkItemStatus::Todo.as_str(),
                    stamp
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    let existing =
                        find_active_branch(tx, &new.repo, &new.branch, None)?.unwrap_or_default();
                    return Err(StoreError::DuplicateBranch {
                        branch: new.branch.clone(),
                        existing,
                    });
                }
                Err(err) => return Err(err.into()),
            }

            require(tx, tx.last_insert_rowid())
        })
    }

    pub fn get_work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        self.read("get_work_item", |conn| load(conn, id))
    }

    /// Like [`Store::get_work_item`] but absence is `NotFound`.
    pub fn require_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        self.get_work_item(id)?
            .ok_or(StoreError::NotFound { entity: ENTITY, id })
    }

    pub fn list_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        self.read("list_work_items", |conn| list(conn, filter))
    }

    /// Moves a work item to `target`; unreachable targets are `InvalidState`.
    pub fn transition_work_item(
        &self,
        id: WorkItemId,
        target: WorkItemStatus,
    ) -> Result<WorkItem> {
        self.write("transition_work_item", |tx, _revision| {
            let item = require(tx, id)?;
            if !item.status.can_transition_to(target) {
                return Err(StoreError::InvalidState {
                    entity: ENTITY,
                    from: item.status.to_string(),
                    to: target.to_string(),
                });
            }
            set_status(tx, id, target)?;
            require(tx, id)
        })
    }

    /// Renames a work item, moves it to another branch, and records its
    /// worktree, all in one write. A branch change is mirrored onto the
    /// item's sessions.
    pub fn edit_work_item(&self, id: WorkItemId, edit: &WorkItemEdit) -> Result<WorkItem> {
        self.write("edit_work_item", |tx, revision| {
            let item = require(tx, id)?;
            let stamp = format_ts(&now());

            if let Some(branch) = edit.branch.as_ref().filter(|b| **b != item.branch) {
                if item.status == WorkItemStatus::Done {
                    return Err(StoreError::InvalidState {
                        entity: ENTITY,
                        from: item.status.to_string(),
                        to: format!("branch '{}'", branch),
                    });
                }
                if let Some(existing) = find_active_branch(tx, &item.repo, branch, Some(id))? {
                    return Err(StoreError::DuplicateBranch {
                        branch: branch.clone(),
                        existing,
                    });
                }
                tx.execute(
                    "UPDATE work_items SET branch = ?1, updated_at = ?2 WHERE id = ?3",
                    params![branch, stamp, id],
                )?;
                tx.execute(
                    "UPDATE sessions SET branch = ?1, seq = ?2, updated_at = ?3 \
                     WHERE work_item_id = ?4",
                    params![branch, revision, stamp, id],
                )?;
            }

            if let Some(name) = edit.name.as_ref().filter(|n| Some(*n) != item.name.as_ref()) {
                tx.execute(
                    "UPDATE work_items SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name, stamp, id],
                )?;
            }

            if let Some(path) = edit
                .worktree_path
                .as_ref()
                .filter(|p| Some(*p) != item.worktree_path.as_ref())
            {
                tx.execute(
                    "UPDATE work_items SET worktree_path = ?1, updated_at = ?2 WHERE id = ?3",
                    params![path, stamp, id],
                )?;
            }

            require(tx, id)
        })
    }

    /// Records (or clears) the worktree created for this item.
    pub fn set_worktree(&self, id: WorkItemId, path: Option<&str>) -> Result<WorkItem> {
        self.write("set_worktree", |tx, _revision| {
            require(tx, id)?;
            tx.execute(
                "UPDATE work_items SET worktree_path = ?1, updated_at = ?2 WHERE id = ?3",
                params![path, format_ts(&now()), id],
            )?;
            require(tx, id)
        })
    }

    /// Deletes a work item together with the sessions that reference it.
    pub fn delete_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        self.write("delete_work_item", |tx, _revision| {
            let item = require(tx, id)?;
            tx.execute("DELETE FROM sessions WHERE work_item_id = ?1", params![id])?;
            tx.execute("DELETE FROM work_items WHERE id = ?1", params![id])?;
            Ok(item)
        })
    }

    /// Distinct repositories that have work items.
    pub fn list_repos(&self) -> Result<Vec<String>> {
        self.read("list_repos", |conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT repo FROM work_items ORDER BY repo")?;
            let repos = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(repos)
        })
    }
}

/// Forward-only move used by signal ingestion.
///
/// Returns the `(from, to)` pair when the status changed. Items not yet
/// started (`todo`) or already `done` are left alone, as is anything that
/// would move backwards.
pub(crate) fn advance(
    conn: &Connection,
    id: WorkItemId,
    target: WorkItemStatus,
) -> Result<Option<(WorkItemStatus, WorkItemStatus)>> {
    let item = match load(conn, id)? {
        Some(item) => item,
        None => return Ok(None),
    };

    let current = item.status;
    if matches!(current, WorkItemStatus::Todo | WorkItemStatus::Done) || current == target {
        return Ok(None);
    }
    if target.rank() < current.rank() || !current.can_transition_to(target) {
        return Ok(None);
    }

    set_status(conn, id, target)?;
    Ok(Some((current, target)))
}

pub(crate) fn list(conn: &Connection, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
    let mut query = format!("SELECT {} FROM work_items WHERE 1=1", COLUMNS);
    let mut values: Vec<&dyn ToSql> = Vec::new();
    let status = filter.status.map(|status| status.as_str());

    if let Some(repo) = filter.repo.as_ref() {
        query.push_str(&format!(" AND repo = ?{}", values.len() + 1));
        values.push(repo);
    }
    if let Some(status) = status.as_ref() {
        query.push_str(&format!(" AND status = ?{}", values.len() + 1));
        values.push(status);
    }
    query.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&query)?;
    let items = stmt
        .query_map(values.as_slice(), from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub(crate) fn load(conn: &Connection, id: WorkItemId) -> Result<Option<WorkItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM work_items WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(item)
}

fn require(conn: &Connection, id: WorkItemId) -> Result<WorkItem> {
    load(conn, id)?.ok_or(StoreError::NotFound { entity: ENTITY, id })
}

fn set_status(conn: &Connection, id: WorkItemId, status: WorkItemStatus) -> Result<()> {
    conn.execute(
        "UPDATE work_items SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), format_ts(&now()), id],
    )?;
    Ok(())
}

fn find_active_branch(
    conn: &Connection,
    repo: &str,
    branch: &str,
    exclude: Option<WorkItemId>,
) -> Result<Option<WorkItemId>> {
    let id = conn
        .query_row(
            "SELECT id FROM work_items \
             WHERE repo = ?1 AND branch = ?2 AND status != 'done' AND id != ?3 \
             ORDER BY id LIMIT 1",
            params![repo, branch, exclude.unwrap_or(-1)],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let status_raw: String = row.get(6)?;
    let status =
        WorkItemStatus::parse(&status_raw).ok_or_else(|| invalid_text(6, "work item status", &status_raw))?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(WorkItem {
        id: row.get(0)?,
        repo: row.get(1)?,
        branch: row.get(2)?,
        name: row.get(3)?,
        prompt: row.get(4)?,
        worktree_path: row.get(5)?,
        status,
        created_at: parse_ts(7, &created_at)?,
        updated_at: parse_ts(8, &updated_at)?,
    })
}
