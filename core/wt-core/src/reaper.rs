//! Marks sessions whose owning process has exited as done.
//!
//! Hooks only report what the assistant tells them; a crashed or killed
//! process never sends `stop`. The query path therefore sweeps active
//! sessions before returning them:
//!
//! ```text
//! list_active_sessions ──► sweep (pid probe) ──► mark_sessions_done
//! ```
//!
//! A pid of `0` means the hook could not tell who owns the session; such
//! rows are left alone.

use tracing::{debug, info};

use crate::error::Result;
use crate::process::{ProcessProbe, SystemProbe};
use crate::store::Store;
use crate::types::{Session, SessionId, SessionState};

pub struct Reaper<P = SystemProbe> {
    probe: P,
}

impl Reaper<SystemProbe> {
    /// Reaper that probes real processes.
    pub fn system() -> Self {
        Self::new(SystemProbe)
    }
}

impl<P: ProcessProbe> Reaper<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Marks dead sessions done in place and returns their ids.
    pub fn sweep(&self, sessions: &mut [Session]) -> Vec<SessionId> {
        let mut reaped = Vec::new();
        for session in sessions.iter_mut() {
            if session.state.is_done() || session.pid == 0 {
                continue;
            }
            if self.probe.is_alive(session.pid) {
                continue;
            }
            debug!(
                session_id = session.id,
                pid = session.pid,
                location = %session.location,
                "Session process is gone"
            );
            session.state = SessionState::Done;
            reaped.push(session.id);
        }
        reaped
    }

    /// Sweeps the store's active sessions and persists the result in a single
    /// write. Returns the reaped ids; no write happens when nothing died.
    pub fn reap(&self, store: &Store) -> Result<Vec<SessionId>> {
        let mut sessions = store.list_active_sessions()?;
        let reaped = self.sweep(&mut sessions);
        if reaped.is_empty() {
            return Ok(reaped);
        }
        let changed = store.mark_sessions_done(&reaped)?;
        info!(reaped = reaped.len(), changed, "Reaped sessions with dead processes");
        Ok(reaped)
    }
}
