//! Entity types shared by the store, the ingestion path and the board.
//!
//! ```text
//! WorkItem status order:   todo < working = input < review < done
//! Session state machine:   working <-> waiting, {working, waiting} -> done
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type WorkItemId = i64;
pub type SessionId = i64;

// -----------------------------------------------------------------------------
// Location key
// -----------------------------------------------------------------------------

/// The (multiplexer session, pane) pair that identifies where a session runs.
///
/// At most one non-done session row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    pub mux_session: String,
    pub pane: String,
}

impl LocationKey {
    pub fn new(mux_session: impl Into<String>, pane: impl Into<String>) -> Self {
        Self {
            mux_session: mux_session.into(),
            pane: pane.into(),
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mux_session, self.pane)
    }
}

// -----------------------------------------------------------------------------
// Work items
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    Todo,
    Working,
    Input,
    Review,
    Done,
}

impl WorkItemStatus {
    pub const ALL: [WorkItemStatus; 5] = [
        WorkItemStatus::Todo,
        WorkItemStatus::Working,
        WorkItemStatus::Input,
        WorkItemStatus::Review,
        WorkItemStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Todo => "todo",
            WorkItemStatus::Working => "working",
            WorkItemStatus::Input => "input",
            WorkItemStatus::Review => "review",
            WorkItemStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(WorkItemStatus::Todo),
            "working" => Some(WorkItemStatus::Working),
            "input" => Some(WorkItemStatus::Input),
            "review" => Some(WorkItemStatus::Review),
            "done" => Some(WorkItemStatus::Done),
            _ => None,
        }
    }

    /// Position in the progress order. `working` and `input` share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            WorkItemStatus::Todo => 0,
            WorkItemStatus::Working | WorkItemStatus::Input => 1,
            WorkItemStatus::Review => 2,
            WorkItemStatus::Done => 3,
        }
    }

    pub fn can_transition_to(&self, target: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, target),
            (Todo, Working)
                | (Working, Input)
                | (Input, Working)
                | (Working, Review)
                | (Input, Review)
                | (Review, Done)
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub repo: String,
    pub branch: String,
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub worktree_path: Option<String>,
    pub status: WorkItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Name shown on cards; falls back to the branch.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.branch)
    }
}

/// Fields for a new work item. New items always start in `todo`.
#[derive(Debug, Clone, Default)]
pub struct NewWorkItem {
    pub repo: String,
    pub branch: String,
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub worktree_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkItemEdit {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkItemFilter {
    pub repo: Option<String>,
    pub status: Option<WorkItemStatus>,
}

// -----------------------------------------------------------------------------
// Sessions
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Working,
    Waiting,
    Done,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Working => "working",
            SessionState::Waiting => "waiting",
            SessionState::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "working" => Some(SessionState::Working),
            "waiting" => Some(SessionState::Waiting),
            "done" => Some(SessionState::Done),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        *self == SessionState::Done
    }

    /// Same-state moves are accepted; nothing leaves `done`.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        match self {
            SessionState::Done => target == SessionState::Done,
            SessionState::Working | SessionState::Waiting => true,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub work_item_id: Option<WorkItemId>,
    pub repo: String,
    pub branch: String,
    pub location: LocationKey,
    /// Owning process id; `0` means unknown and is never reaped.
    pub pid: u32,
    pub state: SessionState,
    pub prompt: Option<String>,
    /// The assistant's own session id, used to resume a conversation.
    pub resume_id: Option<String>,
    /// Store revision of the last write that touched this row.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_unmanaged(&self) -> bool {
        self.work_item_id.is_none()
    }
}

/// Values merged into a session row by an upsert.
///
/// `None` keeps whatever the row already holds (or the column default for a
/// new row). `repo` and `branch` are only used when a row is created.
#[derive(Debug, Clone)]
pub struct SessionFields {
    pub state: SessionState,
    pub pid: u32,
    pub repo: String,
    pub branch: String,
    pub work_item_id: Option<WorkItemId>,
    pub prompt: Option<String>,
    pub resume_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub repo: Option<String>,
    pub work_item_id: Option<WorkItemId>,
    pub state: Option<SessionState>,
}

// -----------------------------------------------------------------------------
// Generic entity addressing (transition entry point)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId {
    WorkItem(WorkItemId),
    Session(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    WorkItem(WorkItemStatus),
    Session(SessionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    WorkItem(WorkItem),
    Session(Session),
}
