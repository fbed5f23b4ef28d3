//! Minimal create/update/remove deltas between two rendered sets.
//!
//! Views key their cards by [`Placement`]: the column a card sits in plus a
//! [`ViewKey`] that stays the same for the lifetime of the entity. Because the
//! column is part of the placement, a card that changes column shows up as a
//! REMOVE of the old placement and a CREATE of the new one, while a card that
//! stays put is an UPDATE and keeps its widget (and any focus or scroll
//! state attached to it).

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{LocationKey, SessionState, WorkItemId, WorkItemStatus};

/// Stable identity of a card across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewKey {
    Item(WorkItemId),
    Session(LocationKey),
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKey::Item(id) => write!(f, "item:{}", id),
            ViewKey::Session(location) => {
                write!(f, "session:{}:{}", location.mux_session, location.pane)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Todo,
    Working,
    Input,
    Review,
    Done,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Todo,
        Column::Working,
        Column::Input,
        Column::Review,
        Column::Done,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Column::Todo => "todo",
            Column::Working => "working",
            Column::Input => "input",
            Column::Review => "review",
            Column::Done => "done",
        }
    }

    pub fn for_status(status: WorkItemStatus) -> Self {
        match status {
            WorkItemStatus::Todo => Column::Todo,
            WorkItemStatus::Working => Column::Working,
            WorkItemStatus::Input => Column::Input,
            WorkItemStatus::Review => Column::Review,
            WorkItemStatus::Done => Column::Done,
        }
    }

    /// Column for a session with no work item.
    pub fn for_unmanaged(state: SessionState) -> Self {
        match state {
            SessionState::Working => Column::Working,
            SessionState::Waiting => Column::Input,
            SessionState::Done => Column::Review,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placement {
    pub column: Column,
    pub key: ViewKey,
}

impl Placement {
    pub fn new(column: Column, key: ViewKey) -> Self {
        Self { column, key }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op<K, V> {
    Remove(K),
    Update(K, V),
    Create(K, V),
}

impl<K, V> Op<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Op::Remove(key) | Op::Update(key, _) | Op::Create(key, _) => key,
        }
    }
}

/// Ordered ops: every remove, then every update, then every create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<K, V> {
    pub ops: Vec<Op<K, V>>,
}

impl<K, V> Default for Delta<K, V> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<K, V> Delta<K, V> {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn removes(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Remove(_))).count()
    }

    pub fn updates(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Update(..))).count()
    }

    pub fn creates(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Create(..))).count()
    }

    /// Replays the delta onto `rendered`, leaving it equal to the fresh set.
    pub fn apply_to(self, rendered: &mut BTreeMap<K, V>)
    where
        K: Ord,
    {
        for op in self.ops {
            match op {
                Op::Remove(key) => {
                    rendered.remove(&key);
                }
                Op::Update(key, value) | Op::Create(key, value) => {
                    rendered.insert(key, value);
                }
            }
        }
    }
}

/// Diffs the rendered set against a fresh one. Keys present in both produce
/// an UPDATE whether or not the value changed; the view decides what to
/// redraw.
pub fn reconcile<K, V, R>(rendered: &BTreeMap<K, R>, fresh: &BTreeMap<K, V>) -> Delta<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut removes = Vec::new();
    let mut updates = Vec::new();
    let mut creates = Vec::new();

    for key in rendered.keys() {
        if !fresh.contains_key(key) {
            removes.push(Op::Remove(key.clone()));
        }
    }
    for (key, value) in fresh {
        if rendered.contains_key(key) {
            updates.push(Op::Update(key.clone(), value.clone()));
        } else {
            creates.push(Op::Create(key.clone(), value.clone()));
        }
    }

    let mut ops = removes;
    ops.extend(updates);
    ops.extend(creates);
    Delta { ops }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&'static str]) -> BTreeMap<&'static str, u32> {
        keys.iter().enumerate().map(|(i, k)| (*k, i as u32)).collect()
    }

    #[test]
    fn overlapping_sets_produce_ordered_ops() {
        let old = set(&["A", "B", "C"]);
        let new = set(&["B", "C", "D"]);

        let delta = reconcile(&old, &new);
        assert_eq!(
            delta.ops,
            vec![
                Op::Remove("A"),
                Op::Update("B", 0),
                Op::Update("C", 1),
                Op::Create("D", 2),
            ]
        );
    }

    #[test]
    fn identical_sets_only_update() {
        let old = set(&["A", "B"]);
        let delta = reconcile(&old, &old);
        assert_eq!(delta.updates(), 2);
        assert_eq!(delta.removes() + delta.creates(), 0);
    }

    #[test]
    fn empty_sides() {
        let empty: BTreeMap<&str, u32> = BTreeMap::new();
        let full = set(&["A", "B"]);
        assert!(reconcile(&empty, &empty).is_empty());
        assert_eq!(reconcile(&empty, &full).creates(), 2);
        assert_eq!(reconcile(&full, &empty).removes(), 2);
    }

    #[test]
    fn column_move_is_remove_plus_create() {
        let key = ViewKey::Item(7);
        let old: BTreeMap<Placement, &str> =
            [(Placement::new(Column::Working, key.clone()), "v1")].into();
        let new: BTreeMap<Placement, &str> =
            [(Placement::new(Column::Review, key.clone()), "v2")].into();

        let delta = reconcile(&old, &new);
        assert_eq!(
            delta.ops,
            vec![
                Op::Remove(Placement::new(Column::Working, key.clone())),
                Op::Create(Placement::new(Column::Review, key), "v2"),
            ]
        );
    }

    #[test]
    fn applying_delta_reproduces_fresh_set() {
        let mut rendered = set(&["A", "B", "C"]);
        let fresh = set(&["C", "D"]);
        reconcile(&rendered, &fresh).apply_to(&mut rendered);
        assert_eq!(rendered, fresh);
    }

    #[test]
    fn view_keys_render_stable_strings() {
        assert_eq!(ViewKey::Item(12).to_string(), "item:12");
        assert_eq!(
            ViewKey::Session(LocationKey::new("myrepo/feat-auth", "%3")).to_string(),
            "session:myrepo/feat-auth:%3"
        );
    }

    #[test]
    fn unmanaged_sessions_map_by_state() {
        assert_eq!(Column::for_unmanaged(SessionState::Working), Column::Working);
        assert_eq!(Column::for_unmanaged(SessionState::Waiting), Column::Input);
        assert_eq!(Column::for_unmanaged(SessionState::Done), Column::Review);
    }
}
