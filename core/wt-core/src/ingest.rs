//! Turns hook signals into store writes.
//!
//! Each signal is one write transaction:
//!
//! 1. validate the work item hint (an unknown id is dropped, not an error)
//! 2. upsert the session at the signal's location key
//! 3. nudge the linked work item forward, if the signal implies progress
//!
//! Work item cascade (linked sessions only):
//!
//! | Signal         | Session | Work item |
//! |----------------|---------|-----------|
//! | `heartbeat`    | working | working   |
//! | `input-needed` | waiting | input     |
//! | `stop`         | waiting | review    |
//! | `mark-done`    | done    | review    |
//!
//! Items still in `todo` or already `done` are never touched, and nothing
//! moves an item backwards. Only `heartbeat` opens a new session at a
//! location whose last session finished; a repeated `mark-done` or a late
//! `stop` lands on the finished row.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{sessions, work_items, Store};
use crate::types::{
    LocationKey, Session, SessionFields, SessionState, WorkItemId, WorkItemStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Heartbeat,
    Stop,
    MarkDone,
    InputNeeded,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Heartbeat => "heartbeat",
            SignalKind::Stop => "stop",
            SignalKind::MarkDone => "mark-done",
            SignalKind::InputNeeded => "input-needed",
        }
    }

    pub fn session_state(&self) -> SessionState {
        match self {
            SignalKind::Heartbeat => SessionState::Working,
            SignalKind::Stop | SignalKind::InputNeeded => SessionState::Waiting,
            SignalKind::MarkDone => SessionState::Done,
        }
    }

    pub fn work_item_status(&self) -> WorkItemStatus {
        match self {
            SignalKind::Heartbeat => WorkItemStatus::Working,
            SignalKind::InputNeeded => WorkItemStatus::Input,
            SignalKind::Stop | SignalKind::MarkDone => WorkItemStatus::Review,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub location: LocationKey,
    pub pid: u32,
    pub kind: SignalKind,
    pub work_item_hint: Option<WorkItemId>,
    pub repo: String,
    pub branch: String,
    pub resume_id: Option<String>,
    pub prompt: Option<String>,
}

/// What one ingested signal changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub session: Session,
    /// `(id, from, to)` when the linked work item moved.
    pub work_item_moved: Option<(WorkItemId, WorkItemStatus, WorkItemStatus)>,
    /// The hint named a work item that does not exist.
    pub hint_dropped: bool,
}

/// Applies `signal` in one transaction.
pub fn ingest(store: &Store, signal: &Signal) -> Result<Ingested> {
    let ingested = store.write("ingest", |tx, revision| {
        let mut hint_dropped = false;
        let work_item_id = match signal.work_item_hint {
            Some(id) if work_items::load(tx, id)?.is_some() => Some(id),
            Some(_) => {
                hint_dropped = true;
                None
            }
            None => None,
        };

        let fields = SessionFields {
            state: signal.kind.session_state(),
            pid: signal.pid,
            repo: signal.repo.clone(),
            branch: signal.branch.clone(),
            work_item_id,
            prompt: signal.prompt.clone(),
            resume_id: signal.resume_id.clone(),
        };
        let session = sessions::upsert(tx, revision, &signal.location, &fields)?;

        let work_item_moved = match session.work_item_id {
            Some(id) => work_items::advance(tx, id, signal.kind.work_item_status())?
                .map(|(from, to)| (id, from, to)),
            None => None,
        };

        Ok(Ingested {
            session,
            work_item_moved,
            hint_dropped,
        })
    })?;

    if ingested.hint_dropped {
        warn!(
            signal = %signal.kind,
            location = %signal.location,
            hint = ?signal.work_item_hint,
            "Work item hint does not exist; session recorded as unmanaged"
        );
    }
    if let Some((id, from, to)) = ingested.work_item_moved {
        debug!(work_item_id = id, %from, %to, "Signal advanced work item");
    }
    debug!(
        signal = %signal.kind,
        location = %signal.location,
        session_id = ingested.session.id,
        state = %ingested.session.state,
        seq = ingested.session.seq,
        "Signal ingested"
    );

    Ok(ingested)
}

/// Hook entry point: failures are logged and swallowed so a broken store can
/// never interrupt the assistant.
pub fn ingest_quietly(store: &Store, signal: &Signal) -> Option<Ingested> {
    match ingest(store, signal) {
        Ok(ingested) => Some(ingested),
        Err(err) => {
            warn!(
                signal = %signal.kind,
                location = %signal.location,
                error = %err,
                "Failed to ingest signal"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewWorkItem;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(temp_dir.path().join("womtrees.db"));
        (temp_dir, store)
    }

    fn signal(kind: SignalKind, hint: Option<WorkItemId>) -> Signal {
        Signal {
            location: LocationKey::new("myrepo/feat-auth", "%1"),
            pid: 4242,
            kind,
            work_item_hint: hint,
            repo: "myrepo".to_string(),
            branch: "feat/auth".to_string(),
            resume_id: None,
            prompt: None,
        }
    }

    fn started_item(store: &Store) -> WorkItemId {
        let item = store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");
        store
            .transition_work_item(item.id, WorkItemStatus::Working)
            .expect("start");
        item.id
    }

    #[test]
    fn heartbeat_then_stop_reuses_the_row() {
        let (_temp_dir, store) = temp_store();

        let first = ingest(&store, &signal(SignalKind::Heartbeat, None)).expect("heartbeat");
        assert_eq!(first.session.state, SessionState::Working);
        assert!(first.session.is_unmanaged());
        assert!(first.work_item_moved.is_none());

        let second = ingest(&store, &signal(SignalKind::Stop, None)).expect("stop");
        assert_eq!(second.session.id, first.session.id);
        assert_eq!(second.session.state, SessionState::Waiting);
    }

    #[test]
    fn repeated_signal_is_idempotent() {
        let (_temp_dir, store) = temp_store();
        for _ in 0..3 {
            ingest(&store, &signal(SignalKind::Heartbeat, None)).expect("heartbeat");
        }
        let sessions = store.list_sessions(&Default::default()).expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Working);
    }

    #[test]
    fn linked_signals_cascade_forward_only() {
        let (_temp_dir, store) = temp_store();
        let id = started_item(&store);

        let result = ingest(&store, &signal(SignalKind::InputNeeded, Some(id))).expect("input");
        assert_eq!(
            result.work_item_moved,
            Some((id, WorkItemStatus::Working, WorkItemStatus::Input))
        );

        let result = ingest(&store, &signal(SignalKind::Heartbeat, None)).expect("heartbeat");
        assert_eq!(result.session.work_item_id, Some(id));
        assert_eq!(
            result.work_item_moved,
            Some((id, WorkItemStatus::Input, WorkItemStatus::Working))
        );

        ingest(&store, &signal(SignalKind::Stop, None)).expect("stop");
        let item = store.require_work_item(id).expect("item");
        assert_eq!(item.status, WorkItemStatus::Review);

        // A late heartbeat must not pull the item back out of review.
        let result = ingest(&store, &signal(SignalKind::Heartbeat, None)).expect("heartbeat");
        assert!(result.work_item_moved.is_none());
        let item = store.require_work_item(id).expect("item");
        assert_eq!(item.status, WorkItemStatus::Review);
    }

    #[test]
    fn todo_items_are_not_started_by_signals() {
        let (_temp_dir, store) = temp_store();
        let item = store
            .create_work_item(&NewWorkItem {
                repo: "myrepo".to_string(),
                branch: "feat/auth".to_string(),
                ..Default::default()
            })
            .expect("create");

        let result =
            ingest(&store, &signal(SignalKind::Heartbeat, Some(item.id))).expect("heartbeat");
        assert_eq!(result.session.work_item_id, Some(item.id));
        assert!(result.work_item_moved.is_none());
        assert_eq!(
            store.require_work_item(item.id).expect("item").status,
            WorkItemStatus::Todo
        );
    }

    #[test]
    fn mark_done_finishes_session_and_moves_item_to_review() {
        let (_temp_dir, store) = temp_store();
        let id = started_item(&store);

        ingest(&store, &signal(SignalKind::Heartbeat, Some(id))).expect("heartbeat");
        let result = ingest(&store, &signal(SignalKind::MarkDone, None)).expect("done");
        assert_eq!(result.session.state, SessionState::Done);
        assert_eq!(
            store.require_work_item(id).expect("item").status,
            WorkItemStatus::Review
        );
        assert!(store
            .find_active_session(&LocationKey::new("myrepo/feat-auth", "%1"))
            .expect("find")
            .is_none());
    }

    #[test]
    fn repeated_mark_done_keeps_one_row() {
        let (_temp_dir, store) = temp_store();
        ingest(&store, &signal(SignalKind::Heartbeat, None)).expect("heartbeat");
        let first = ingest(&store, &signal(SignalKind::MarkDone, None)).expect("done");
        let second = ingest(&store, &signal(SignalKind::MarkDone, None)).expect("done again");
        assert_eq!(second.session.id, first.session.id);

        // A stop that arrives after the session finished does not revive it.
        let late = ingest(&store, &signal(SignalKind::Stop, None)).expect("late stop");
        assert_eq!(late.session.id, first.session.id);
        assert_eq!(late.session.state, SessionState::Done);

        let sessions = store.list_sessions(&Default::default()).expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Done);
    }

    #[test]
    fn unknown_hint_is_dropped() {
        let (_temp_dir, store) = temp_store();
        let result = ingest(&store, &signal(SignalKind::Heartbeat, Some(77))).expect("heartbeat");
        assert!(result.hint_dropped);
        assert!(result.session.is_unmanaged());
    }

    #[test]
    fn resume_id_and_prompt_are_recorded() {
        let (_temp_dir, store) = temp_store();
        let mut first = signal(SignalKind::Heartbeat, None);
        first.resume_id = Some("c0ffee".to_string());
        first.prompt = Some("Add login".to_string());
        ingest(&store, &first).expect("heartbeat");

        let result = ingest(&store, &signal(SignalKind::Stop, None)).expect("stop");
        assert_eq!(result.session.resume_id.as_deref(), Some("c0ffee"));
        assert_eq!(result.session.prompt.as_deref(), Some("Add login"));
    }

    #[test]
    fn quiet_ingest_swallows_store_failures() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        // A directory where the database file should be cannot be opened.
        let path = temp_dir.path().join("womtrees.db");
        fs_err::create_dir_all(&path).expect("dir");
        let store = Store::with_retry(path, crate::backoff::RetryPolicy::no_retry());

        assert!(ingest_quietly(&store, &signal(SignalKind::Heartbeat, None)).is_none());
    }
}
