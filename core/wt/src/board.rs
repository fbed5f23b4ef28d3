//! Live board loop.
//!
//! The watch thread owns refreshes; the main thread reads single-letter
//! commands from stdin (`n`/`p` move focus, `r` refreshes, `q` quits).
//! Both redraw through the same mutex, so output never interleaves.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use wt_core::{ChangeWatch, Dashboard, Reaper, Store, SystemProbe, WatchConfig};

use crate::render;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

type SharedDashboard = Arc<Mutex<Dashboard<SystemProbe>>>;

pub fn run(store: Store, watch_config: WatchConfig, repo: Option<String>) -> Result<(), String> {
    let db_path = store.path().to_path_buf();
    let dashboard: SharedDashboard =
        Arc::new(Mutex::new(Dashboard::new(store, Reaper::system(), repo.clone())));

    let watch_dashboard = Arc::clone(&dashboard);
    let watch_repo = repo.clone();
    let watch = ChangeWatch::spawn(db_path, watch_config, move |reason| {
        tracing::debug!(?reason, "Board refresh");
        with_dashboard(&watch_dashboard, |dashboard| {
            dashboard.refresh();
            draw(dashboard, watch_repo.as_deref());
        });
    })
    .map_err(|e| format!("Failed to start change watch: {}", e))?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Board input closed");
                break;
            }
        };
        match line.trim() {
            "q" | "quit" => break,
            "n" => with_dashboard(&dashboard, |d| {
                d.board_mut().focus_step(true);
                draw(d, repo.as_deref());
            }),
            "p" => with_dashboard(&dashboard, |d| {
                d.board_mut().focus_step(false);
                draw(d, repo.as_deref());
            }),
            "r" => with_dashboard(&dashboard, |d| {
                d.refresh();
                draw(d, repo.as_deref());
            }),
            _ => {}
        }
    }

    watch.cancel();
    Ok(())
}

fn with_dashboard(dashboard: &SharedDashboard, f: impl FnOnce(&mut Dashboard<SystemProbe>)) {
    match dashboard.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

fn draw(dashboard: &Dashboard<SystemProbe>, repo: Option<&str>) {
    let mut out = io::stdout().lock();
    let frame = render::board(dashboard.board(), repo);
    let _ = write!(out, "{}{}", CLEAR_SCREEN, frame);
    let _ = writeln!(out, "[n]ext  [p]rev  [r]efresh  [q]uit");
    let _ = out.flush();
}
