//! Read path used by every consumer: reap first, then read.

use serde::Serialize;

use crate::error::Result;
use crate::process::ProcessProbe;
use crate::reaper::Reaper;
use crate::store::{sessions, work_items, Store};
use crate::types::{Session, SessionFilter, WorkItem, WorkItemFilter};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub work_items: Vec<WorkItem>,
    pub sessions: Vec<Session>,
}

impl Snapshot {
    pub fn sessions_for(&self, work_item_id: i64) -> impl Iterator<Item = &Session> {
        self.sessions
            .iter()
            .filter(move |session| session.work_item_id == Some(work_item_id))
    }
}

/// Reaps dead sessions, then reads work items and sessions in one read
/// transaction so both lists describe the same store revision.
///
/// A reap failure does not fail the query. The dead sessions are then swept
/// in memory, so they still come back `done`; the next query persists them.
pub fn snapshot<P: ProcessProbe>(
    store: &Store,
    reaper: &Reaper<P>,
    repo: Option<&str>,
) -> Result<Snapshot> {
    let reaped = match reaper.reap(store) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "Reap before query failed; sweeping in memory");
            false
        }
    };

    let item_filter = WorkItemFilter {
        repo: repo.map(str::to_string),
        status: None,
    };
    let session_filter = SessionFilter {
        repo: repo.map(str::to_string),
        ..Default::default()
    };

    let mut snapshot = store.read("snapshot", |conn| {
        let tx = conn.unchecked_transaction()?;
        let snapshot = Snapshot {
            work_items: work_items::list(&tx, &item_filter)?,
            sessions: sessions::list(&tx, &session_filter)?,
        };
        tx.finish()?;
        Ok(snapshot)
    })?;

    if !reaped {
        reaper.sweep(&mut snapshot.sessions);
    }
    Ok(snapshot)
}
