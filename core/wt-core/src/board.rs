//! Live board model: status columns of cards, kept in sync with the store by
//! reconciliation rather than rebuilt on every refresh.
//!
//! ## Card placement
//!
//! - work items sit in their status column and carry their sessions
//! - unmanaged sessions sit by state: working → working, waiting → input,
//!   done → review; only the newest row (highest `seq`) per location is shown
//!
//! ## Failure handling
//!
//! A failed refresh never touches the rendered cards. After two failures in
//! a row the board raises its "state unavailable" flag; the next successful
//! refresh clears it.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::process::ProcessProbe;
use crate::query::{self, Snapshot};
use crate::reaper::Reaper;
use crate::reconcile::{reconcile, Column, Delta, Placement, ViewKey};
use crate::store::Store;
use crate::types::{LocationKey, Session, WorkItem};

const UNAVAILABLE_AFTER_FAILURES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Card {
    Item {
        item: WorkItem,
        sessions: Vec<Session>,
    },
    Unmanaged(Session),
}

impl Card {
    pub fn key(&self) -> ViewKey {
        match self {
            Card::Item { item, .. } => ViewKey::Item(item.id),
            Card::Unmanaged(session) => ViewKey::Session(session.location.clone()),
        }
    }

    pub fn column(&self) -> Column {
        match self {
            Card::Item { item, .. } => Column::for_status(item.status),
            Card::Unmanaged(session) => Column::for_unmanaged(session.state),
        }
    }

    pub fn placement(&self) -> Placement {
        Placement::new(self.column(), self.key())
    }

    pub fn title(&self) -> String {
        match self {
            Card::Item { item, .. } => item.display_name().to_string(),
            Card::Unmanaged(session) => format!("{} ({})", session.branch, session.location),
        }
    }
}

pub type BoardDelta = Delta<Placement, Card>;

/// Lays out a snapshot as cards keyed by placement.
pub fn layout(snapshot: &Snapshot) -> BTreeMap<Placement, Card> {
    let mut cards = BTreeMap::new();

    for item in &snapshot.work_items {
        let card = Card::Item {
            item: item.clone(),
            sessions: snapshot.sessions_for(item.id).cloned().collect(),
        };
        cards.insert(card.placement(), card);
    }

    let mut newest: BTreeMap<&LocationKey, &Session> = BTreeMap::new();
    for session in snapshot.sessions.iter().filter(|s| s.is_unmanaged()) {
        let slot = newest.entry(&session.location).or_insert(session);
        if session.seq > slot.seq {
            *slot = session;
        }
    }
    for session in newest.into_values() {
        let card = Card::Unmanaged(session.clone());
        cards.insert(card.placement(), card);
    }

    cards
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardCounts {
    pub per_column: BTreeMap<Column, usize>,
    pub unmanaged: usize,
}

impl BoardCounts {
    pub fn get(&self, column: Column) -> usize {
        self.per_column.get(&column).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct Board {
    cards: BTreeMap<Placement, Card>,
    focus: Option<ViewKey>,
    consecutive_failures: u32,
    unavailable: bool,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the board against a fresh snapshot and returns the delta
    /// that was applied.
    pub fn apply(&mut self, snapshot: &Snapshot) -> BoardDelta {
        let fresh = layout(snapshot);
        let focused_column = self.focused_placement().map(|p| p.column);

        let delta = reconcile(&self.cards, &fresh);
        delta.clone().apply_to(&mut self.cards);

        self.consecutive_failures = 0;
        self.unavailable = false;
        self.repair_focus(focused_column);
        delta
    }

    /// Records a failed refresh. Cards stay as they were.
    pub fn record_failure(&mut self, err: &StoreError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= UNAVAILABLE_AFTER_FAILURES && !self.unavailable {
            warn!(
                failures = self.consecutive_failures,
                error = %err,
                "Board state unavailable"
            );
            self.unavailable = true;
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn cards_in(&self, column: Column) -> impl Iterator<Item = &Card> {
        self.cards
            .iter()
            .filter(move |(placement, _)| placement.column == column)
            .map(|(_, card)| card)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn counts(&self) -> BoardCounts {
        let mut counts = BoardCounts::default();
        for column in Column::ALL {
            counts.per_column.insert(column, 0);
        }
        for (placement, card) in &self.cards {
            *counts.per_column.entry(placement.column).or_insert(0) += 1;
            if matches!(card, Card::Unmanaged(_)) {
                counts.unmanaged += 1;
            }
        }
        counts
    }

    pub fn focus(&self) -> Option<&ViewKey> {
        self.focus.as_ref()
    }

    pub fn focused_card(&self) -> Option<&Card> {
        let placement = self.focused_placement()?;
        self.cards.get(&placement)
    }

    /// Focuses `key` if it is on the board.
    pub fn set_focus(&mut self, key: ViewKey) -> bool {
        if self.placement_of(&key).is_some() {
            self.focus = Some(key);
            true
        } else {
            false
        }
    }

    /// Moves focus one card forward (or back) in board order, wrapping.
    pub fn focus_step(&mut self, forward: bool) {
        let keys: Vec<&ViewKey> = self.cards.keys().map(|p| &p.key).collect();
        if keys.is_empty() {
            self.focus = None;
            return;
        }
        let current = self
            .focus
            .as_ref()
            .and_then(|focus| keys.iter().position(|key| *key == focus));
        let next = match (current, forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % keys.len(),
            (Some(i), false) => (i + keys.len() - 1) % keys.len(),
        };
        self.focus = Some(keys[next].clone());
    }

    fn placement_of(&self, key: &ViewKey) -> Option<Placement> {
        self.cards.keys().find(|p| &p.key == key).cloned()
    }

    fn focused_placement(&self) -> Option<Placement> {
        self.focus.as_ref().and_then(|key| self.placement_of(key))
    }

    /// Only repairs a focus that was lost; an unfocused board stays
    /// unfocused until [`Board::set_focus`] or [`Board::focus_step`].
    fn repair_focus(&mut self, previous_column: Option<Column>) {
        if self.focus.is_none() || self.focused_placement().is_some() {
            return;
        }
        let fallback = previous_column
            .and_then(|column| self.cards.keys().find(|p| p.column == column))
            .or_else(|| self.cards.keys().next())
            .map(|p| p.key.clone());
        debug!(from = ?self.focus, to = ?fallback, "Focused card left the board");
        self.focus = fallback;
    }
}

/// Board plus what it needs to refresh itself.
pub struct Dashboard<P: ProcessProbe> {
    store: Store,
    reaper: Reaper<P>,
    repo: Option<String>,
    board: Board,
}

impl<P: ProcessProbe> Dashboard<P> {
    pub fn new(store: Store, reaper: Reaper<P>, repo: Option<String>) -> Self {
        Self {
            store,
            reaper,
            repo,
            board: Board::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    /// Queries the store and reconciles. `None` means the query failed and
    /// the board kept its previous cards.
    pub fn refresh(&mut self) -> Option<BoardDelta> {
        match query::snapshot(&self.store, &self.reaper, self.repo.as_deref()) {
            Ok(snapshot) => {
                let delta = self.board.apply(&snapshot);
                debug!(
                    removes = delta.removes(),
                    updates = delta.updates(),
                    creates = delta.creates(),
                    "Board refreshed"
                );
                Some(delta)
            }
            Err(err) => {
                debug!(error = %err, "Board refresh failed");
                self.board.record_failure(&err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionState, WorkItemStatus};
    use chrono::Utc;

    fn item(id: i64, status: WorkItemStatus) -> WorkItem {
        let now = Utc::now();
        WorkItem {
            id,
            repo: "myrepo".to_string(),
            branch: format!("feat/{id}"),
            name: None,
            prompt: None,
            worktree_path: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn session(id: i64, pane: &str, state: SessionState, seq: i64, item: Option<i64>) -> Session {
        let now = Utc::now();
        Session {
            id,
            work_item_id: item,
            repo: "myrepo".to_string(),
            branch: "main".to_string(),
            location: LocationKey::new("myrepo/main", pane),
            pid: 0,
            state,
            prompt: None,
            resume_id: None,
            seq,
            created_at: now,
            updated_at: now,
        }
    }

    fn snapshot(work_items: Vec<WorkItem>, sessions: Vec<Session>) -> Snapshot {
        Snapshot {
            work_items,
            sessions,
        }
    }

    #[test]
    fn layout_places_items_and_unmanaged_sessions() {
        let cards = layout(&snapshot(
            vec![item(1, WorkItemStatus::Todo), item(2, WorkItemStatus::Working)],
            vec![
                session(10, "%1", SessionState::Working, 3, Some(2)),
                session(11, "%2", SessionState::Waiting, 4, None),
            ],
        ));

        let placements: Vec<_> = cards.keys().cloned().collect();
        assert_eq!(
            placements,
            vec![
                Placement::new(Column::Todo, ViewKey::Item(1)),
                Placement::new(Column::Working, ViewKey::Item(2)),
                Placement::new(
                    Column::Input,
                    ViewKey::Session(LocationKey::new("myrepo/main", "%2"))
                ),
            ]
        );

        match cards.get(&Placement::new(Column::Working, ViewKey::Item(2))) {
            Some(Card::Item { sessions, .. }) => assert_eq!(sessions.len(), 1),
            other => panic!("unexpected card {other:?}"),
        }
    }

    #[test]
    fn newest_row_wins_per_location() {
        let cards = layout(&snapshot(
            vec![],
            vec![
                session(1, "%1", SessionState::Done, 5, None),
                session(2, "%1", SessionState::Working, 9, None),
            ],
        ));
        assert_eq!(cards.len(), 1);
        let card = cards.values().next().expect("card");
        assert_eq!(card.column(), Column::Working);
    }

    #[test]
    fn focus_follows_card_across_columns() {
        let mut board = Board::new();
        board.apply(&snapshot(vec![item(1, WorkItemStatus::Working)], vec![]));
        assert!(board.set_focus(ViewKey::Item(1)));

        let delta = board.apply(&snapshot(vec![item(1, WorkItemStatus::Review)], vec![]));
        assert_eq!(delta.removes(), 1);
        assert_eq!(delta.creates(), 1);
        assert_eq!(board.focus(), Some(&ViewKey::Item(1)));
        assert_eq!(board.focused_card().map(Card::column), Some(Column::Review));
    }

    #[test]
    fn focus_falls_back_to_first_card_of_previous_column() {
        let mut board = Board::new();
        board.apply(&snapshot(
            vec![
                item(1, WorkItemStatus::Todo),
                item(2, WorkItemStatus::Working),
                item(3, WorkItemStatus::Working),
            ],
            vec![],
        ));
        board.set_focus(ViewKey::Item(3));

        board.apply(&snapshot(
            vec![item(1, WorkItemStatus::Todo), item(2, WorkItemStatus::Working)],
            vec![],
        ));
        assert_eq!(board.focus(), Some(&ViewKey::Item(2)));

        board.apply(&snapshot(vec![item(1, WorkItemStatus::Todo)], vec![]));
        assert_eq!(board.focus(), Some(&ViewKey::Item(1)));

        board.apply(&snapshot(vec![], vec![]));
        assert_eq!(board.focus(), None);
    }

    #[test]
    fn counts_cover_every_column() {
        let mut board = Board::new();
        board.apply(&snapshot(
            vec![item(1, WorkItemStatus::Todo), item(2, WorkItemStatus::Todo)],
            vec![session(5, "%9", SessionState::Done, 1, None)],
        ));
        let counts = board.counts();
        assert_eq!(counts.get(Column::Todo), 2);
        assert_eq!(counts.get(Column::Review), 1);
        assert_eq!(counts.get(Column::Done), 0);
        assert_eq!(counts.per_column.len(), Column::ALL.len());
        assert_eq!(counts.unmanaged, 1);
    }

    #[test]
    fn unavailable_after_two_failures_and_cleared_on_success() {
        let mut board = Board::new();
        board.apply(&snapshot(vec![item(1, WorkItemStatus::Todo)], vec![]));
        let err = StoreError::Unavailable {
            context: "open".to_string(),
            message: "disk I/O error".to_string(),
        };

        board.record_failure(&err);
        assert!(!board.is_unavailable());
        board.record_failure(&err);
        assert!(board.is_unavailable());
        assert_eq!(board.len(), 1, "failures keep rendered cards");

        board.apply(&snapshot(vec![item(1, WorkItemStatus::Todo)], vec![]));
        assert!(!board.is_unavailable());
    }

    #[test]
    fn focus_step_wraps() {
        let mut board = Board::new();
        board.apply(&snapshot(
            vec![item(1, WorkItemStatus::Todo), item(2, WorkItemStatus::Review)],
            vec![],
        ));
        assert_eq!(board.focus(), None, "applying does not pick a focus");
        board.focus_step(true);
        assert_eq!(board.focus(), Some(&ViewKey::Item(1)));
        board.focus_step(true);
        assert_eq!(board.focus(), Some(&ViewKey::Item(2)));
        board.focus_step(true);
        assert_eq!(board.focus(), Some(&ViewKey::Item(1)));
        board.focus_step(false);
        assert_eq!(board.focus(), Some(&ViewKey::Item(2)));
    }

    #[test]
    fn dashboard_refresh_reports_failures() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("womtrees.db");
        fs_err::create_dir_all(&path).expect("dir in the way");
        let store = Store::with_retry(path, crate::backoff::RetryPolicy::no_retry());
        let mut dashboard = Dashboard::new(
            store,
            Reaper::new(crate::reaper::tests::FakeProbe::alive(&[])),
            None,
        );

        assert!(dashboard.refresh().is_none());
        assert!(dashboard.refresh().is_none());
        assert!(dashboard.board().is_unavailable());
    }
}
