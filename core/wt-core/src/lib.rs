//! # wt-core
//!
//! State engine for womtrees: work items, the assistant sessions attached to
//! them, and the live board that shows both.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The only thread is the change watch.
//! - **Shared through SQLite only**: Hooks, CLI commands and the board are
//!   separate processes; the store file is the only thing they share.
//! - **Graceful degradation**: A missing store reads as empty state. Hook
//!   failures are logged, never surfaced to the assistant.
//! - **Identity-preserving views**: The board is updated by reconciliation,
//!   so focus survives refreshes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wt_core::{config, ingest, query, Reaper, Store};
//!
//! let store = Store::new(config::db_path()?);
//! ingest::ingest_quietly(&store, &signal);
//! let snapshot = query::snapshot(&store, &Reaper::system(), None)?;
//! ```

pub mod backoff;
pub mod board;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod process;
pub mod query;
pub mod reaper;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod watch;

pub use backoff::RetryPolicy;
pub use board::{Board, BoardCounts, Card, Dashboard};
pub use config::{load_engine_config, EngineConfig};
pub use error::{ConfigError, Result, StoreError};
pub use ingest::{Ingested, Signal, SignalKind};
pub use process::{ProcessProbe, SystemProbe};
pub use query::Snapshot;
pub use reaper::Reaper;
pub use reconcile::{Column, Delta, Op, Placement, ViewKey};
pub use store::Store;
pub use types::*;
pub use watch::{ChangeToken, ChangeWatch, RefreshReason, WatchConfig, WatchSchedule};
