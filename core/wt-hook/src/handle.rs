//! Builds a [`Signal`] from arguments, environment and stdin, then hands it
//! to the ingestion path.
//!
//! ## Resolution order
//!
//! ```text
//! location   --mux-session / --pane   → $WT_MUX_SESSION / $TMUX_PANE
//! pid        --pid                    → parent process → 0 (unknown)
//! work item  --work-item              → $WT_WORK_ITEM_ID
//! resume id  stdin JSON `session_id`  (only when stdin is not a terminal)
//! ```

use serde::Deserialize;
use std::env;
use std::io::{self, IsTerminal, Read};
use tracing::debug;

use wt_core::{config, ingest, load_engine_config, LocationKey, Signal, SignalKind, Store};

use crate::HookArgs;

const MUX_SESSION_ENV: &str = "WT_MUX_SESSION";
const PANE_ENV: &str = "TMUX_PANE";
const WORK_ITEM_ENV: &str = "WT_WORK_ITEM_ID";

/// Fields the assistant may pipe to its hooks. Everything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

pub fn run(kind: SignalKind, args: &HookArgs) -> Result<(), String> {
    let input = read_stdin();
    let signal = resolve(
        kind,
        args,
        &input,
        |key| env::var(key).ok(),
        parent_pid(),
    )?;

    let db_path = config::db_path().map_err(|e| e.to_string())?;
    let engine = match load_engine_config(None) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable engine config");
            Default::default()
        }
    };
    let store = Store::with_retry(db_path, engine.retry);

    ingest::ingest_quietly(&store, &signal);
    Ok(())
}

/// Assembles the signal. `lookup` reads environment variables.
pub fn resolve(
    kind: SignalKind,
    args: &HookArgs,
    input: &HookInput,
    lookup: impl Fn(&str) -> Option<String>,
    parent_pid: Option<u32>,
) -> Result<Signal, String> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let mux_session = non_empty(args.mux_session.clone())
        .or_else(|| non_empty(lookup(MUX_SESSION_ENV)))
        .ok_or_else(|| format!("No multiplexer session (--mux-session or ${})", MUX_SESSION_ENV))?;
    let pane = non_empty(args.pane.clone())
        .or_else(|| non_empty(lookup(PANE_ENV)))
        .ok_or_else(|| format!("No multiplexer pane (--pane or ${})", PANE_ENV))?;

    let pid = args.pid.or(parent_pid).unwrap_or(0);

    let work_item_hint = match args.work_item {
        Some(id) => Some(id),
        None => non_empty(lookup(WORK_ITEM_ENV)).and_then(|raw| match raw.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring malformed ${}", WORK_ITEM_ENV);
                None
            }
        }),
    };

    Ok(Signal {
        location: LocationKey::new(mux_session, pane),
        pid,
        kind,
        work_item_hint,
        repo: args.repo.clone().unwrap_or_default(),
        branch: args.branch.clone().unwrap_or_default(),
        resume_id: non_empty(input.session_id.clone()),
        prompt: non_empty(input.prompt.clone()),
    })
}

/// Parses hook stdin. Empty or malformed input yields the empty record.
pub fn parse_input(raw: &str) -> HookInput {
    if raw.trim().is_empty() {
        return HookInput::default();
    }
    match serde_json::from_str(raw) {
        Ok(input) => input,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable hook stdin");
            HookInput::default()
        }
    }
}

fn read_stdin() -> HookInput {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return HookInput::default();
    }
    let mut raw = String::new();
    if let Err(e) = stdin.lock().read_to_string(&mut raw) {
        debug!(error = %e, "Failed to read hook stdin");
        return HookInput::default();
    }
    parse_input(&raw)
}

fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() has no failure modes.
        #[allow(unsafe_code)]
        let pid = unsafe { libc::getppid() };
        (pid > 1).then_some(pid as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}
