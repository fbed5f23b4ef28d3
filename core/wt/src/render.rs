//! Plain-text rendering for CLI output and the live board.

use chrono::{DateTime, Local, Utc};
use std::fmt::Write;
use std::path::Path;

use wt_core::board::Card;
use wt_core::watch::FileStamp;
use wt_core::{Board, ChangeToken, Column, Session, WorkItem};

const UNAVAILABLE_BANNER: &str = "!! state unavailable: the store could not be read; retrying";

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn items_table(items: &[WorkItem]) -> String {
    if items.is_empty() {
        return "No work items\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<8}  {:<16}  {:<24}  {}",
        "ID", "STATUS", "REPO", "BRANCH", "NAME"
    );
    for item in items {
        let _ = writeln!(
            out,
            "{:>4}  {:<8}  {:<16}  {:<24}  {}",
            item.id,
            item.status,
            item.repo,
            item.branch,
            item.name.as_deref().unwrap_or("")
        );
    }
    out
}

pub fn sessions_table(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<8}  {:<28}  {:>7}  {:>5}  {}",
        "ID", "STATE", "LOCATION", "PID", "ITEM", "UPDATED"
    );
    for session in sessions {
        let item = session
            .work_item_id
            .map(|id| format!("#{}", id))
            .unwrap_or_else(|| "-".to_string());
        let pid = if session.pid == 0 {
            "?".to_string()
        } else {
            session.pid.to_string()
        };
        let _ = writeln!(
            out,
            "{:>4}  {:<8}  {:<28}  {:>7}  {:>5}  {}",
            session.id,
            session.state,
            session.location.to_string(),
            pid,
            item,
            local_time(&session.updated_at)
        );
    }
    out
}

pub fn item_detail(item: &WorkItem, sessions: &[Session]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#{} {}", item.id, item.display_name());
    let _ = writeln!(out, "  status:   {}", item.status);
    let _ = writeln!(out, "  repo:     {}", item.repo);
    let _ = writeln!(out, "  branch:   {}", item.branch);
    if let Some(path) = &item.worktree_path {
        let _ = writeln!(out, "  worktree: {}", path);
    }
    if let Some(prompt) = &item.prompt {
        let _ = writeln!(out, "  prompt:   {}", prompt);
    }
    let _ = writeln!(out, "  created:  {}", local_time(&item.created_at));
    let _ = writeln!(out, "  updated:  {}", local_time(&item.updated_at));
    if !sessions.is_empty() {
        let _ = writeln!(out);
        out.push_str(&sessions_table(sessions));
    }
    out
}

fn stamp_line(label: &str, stamp: Option<&FileStamp>) -> String {
    match stamp {
        None => format!("{}: missing\n", label),
        Some(stamp) => {
            let modified = stamp
                .modified
                .map(|time| DateTime::<Utc>::from(time).to_rfc3339())
                .unwrap_or_else(|| "?".to_string());
            format!("{}: {} bytes, modified {}\n", label, stamp.len, modified)
        }
    }
}

pub fn change_token(db_path: &Path, token: &ChangeToken) -> String {
    let mut out = format!("store: {}\n", db_path.display());
    out.push_str(&stamp_line("db", token.db.as_ref()));
    out.push_str(&stamp_line("wal", token.wal.as_ref()));
    out
}

fn card_line(card: &Card, focused: bool) -> String {
    let marker = if focused { ">" } else { " " };
    match card {
        Card::Item { item, sessions } => {
            let active = sessions.iter().filter(|s| !s.state.is_done()).count();
            let suffix = if active > 0 {
                format!("  [{} active]", active)
            } else {
                String::new()
            };
            format!("{} #{} {}{}", marker, item.id, card.title(), suffix)
        }
        Card::Unmanaged(session) => format!("{} ~ {} ({})", marker, card.title(), session.state),
    }
}

pub fn board(board: &Board, repo: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "womtrees board: {}", repo.unwrap_or("all repositories"));
    if board.is_unavailable() {
        let _ = writeln!(out, "{}", UNAVAILABLE_BANNER);
    }

    let counts = board.counts();
    let focus = board.focus();
    for column in Column::ALL {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} ({})", column.title().to_uppercase(), counts.get(column));
        for card in board.cards_in(column) {
            let focused = focus == Some(&card.key());
            let _ = writeln!(out, "{}", card_line(card, focused));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} cards, {} unmanaged sessions",
        board.len(),
        counts.unmanaged
    );
    out
}
