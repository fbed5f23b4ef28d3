//! Change detection for long-lived consumers.
//!
//! Writers are separate processes, so there is nothing to subscribe to. The
//! watcher instead samples a cheap token built from file metadata of the
//! database and its WAL:
//!
//! ```text
//!            poll every 500ms
//!   probe ──► token changed? ──► debounce 1s ──► refresh (Changed)
//!                    │
//!                    └─ no change for 10s ──────► refresh (Fallback)
//! ```
//!
//! The schedule is a pure state machine over caller-supplied instants so its
//! timing can be tested without sleeping. [`ChangeWatch`] drives it on a
//! thread and runs refreshes inline, which keeps at most one in flight.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_FALLBACK_MS: u64 = 10_000;

// -----------------------------------------------------------------------------
// Change token
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

/// Snapshot of the store's on-disk artifacts. Equal tokens mean "nothing
/// observable changed"; a missing store is the empty token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeToken {
    pub db: Option<FileStamp>,
    pub wal: Option<FileStamp>,
}

impl ChangeToken {
    pub fn is_empty(&self) -> bool {
        self.db.is_none() && self.wal.is_none()
    }
}

/// Reads the change token for the database at `db_path`. Never opens the
/// database.
pub fn probe(db_path: &Path) -> ChangeToken {
    ChangeToken {
        db: stamp(db_path),
        wal: stamp(&wal_path(db_path)),
    }
}

fn stamp(path: &Path) -> Option<FileStamp> {
    let metadata = fs_err::metadata(path).ok()?;
    Some(FileStamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push("-wal");
    PathBuf::from(name)
}

// -----------------------------------------------------------------------------
// Schedule
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub fallback_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            fallback_ms: DEFAULT_FALLBACK_MS,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn fallback(&self) -> Duration {
        Duration::from_millis(self.fallback_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Initial,
    Changed,
    Fallback,
}

#[derive(Debug)]
pub struct WatchSchedule {
    config: WatchConfig,
    last_token: Option<ChangeToken>,
    pending_since: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl WatchSchedule {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            last_token: None,
            pending_since: None,
            last_refresh: None,
        }
    }

    /// Feeds one sample. Returns the reason to refresh now, if any.
    ///
    /// The first sample always asks for an initial refresh. Later changes
    /// open a debounce window at the first change; everything observed until
    /// it closes collapses into one refresh.
    pub fn poll(&mut self, now: Instant, token: ChangeToken) -> Option<RefreshReason> {
        let changed = self.last_token.map_or(false, |last| last != token);
        let first = self.last_token.is_none();
        self.last_token = Some(token);

        let last_refresh = match self.last_refresh {
            Some(at) if !first => at,
            _ => {
                self.pending_since = None;
                return Some(RefreshReason::Initial);
            }
        };

        if changed && self.pending_since.is_none() {
            self.pending_since = Some(now);
        }

        if let Some(since) = self.pending_since {
            if now.saturating_duration_since(since) >= self.config.debounce() {
                self.pending_since = None;
                return Some(RefreshReason::Changed);
            }
        }

        if now.saturating_duration_since(last_refresh) >= self.config.fallback() {
            self.pending_since = None;
            return Some(RefreshReason::Fallback);
        }

        None
    }

    pub fn mark_refreshed(&mut self, now: Instant) {
        self.last_refresh = Some(now);
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending_since.is_some()
    }
}

// -----------------------------------------------------------------------------
// Watch thread
// -----------------------------------------------------------------------------

/// Handle to a running watch loop. Dropping it cancels the loop.
pub struct ChangeWatch {
    cancelled: Arc<AtomicBool>,
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeWatch {
    /// Starts watching `db_path`, calling `refresh` on the watch thread: once
    /// immediately, then whenever the schedule fires.
    pub fn spawn<F>(db_path: PathBuf, config: WatchConfig, mut refresh: F) -> std::io::Result<Self>
    where
        F: FnMut(RefreshReason) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let flag = Arc::clone(&cancelled);

        let handle = thread::Builder::new()
            .name("wt-change-watch".to_string())
            .spawn(move || {
                let poll_interval = config.poll_interval();
                let mut schedule = WatchSchedule::new(config);
                loop {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let token = probe(&db_path);
                    if let Some(reason) = schedule.poll(Instant::now(), token) {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        debug!(?reason, "Refreshing");
                        refresh(reason);
                        schedule.mark_refreshed(Instant::now());
                    }
                    match cancel_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Change watch stopped");
            })?;

        Ok(Self {
            cancelled,
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    /// Stops the loop and waits for it. No refresh starts after this returns.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Change watch thread panicked");
            }
        }
    }
}

impl Drop for ChangeWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
