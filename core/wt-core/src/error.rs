//! Error types for wt-core operations.

use std::path::PathBuf;

/// Errors surfaced by the entity store and everything layered on top of it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // ─────────────────────────────────────────────────────────────────────
    // Consumer-facing errors (propagate to whoever asked)
    // ─────────────────────────────────────────────────────────────────────
    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} cannot move from '{from}' to '{to}'")]
    InvalidState {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Branch '{branch}' already has an active work item (#{existing})")]
    DuplicateBranch { branch: String, existing: i64 },

    // ─────────────────────────────────────────────────────────────────────
    // Store health
    // ─────────────────────────────────────────────────────────────────────
    #[error("Store busy after {attempts} attempts")]
    Contention { attempts: u32 },

    #[error("Store unavailable: {context}: {message}")]
    Unavailable { context: String, message: String },
}

impl StoreError {
    pub(crate) fn unavailable(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Transient failures are retried by the store before they escape.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }

    /// True for errors that mean "the store itself is unhealthy", as opposed
    /// to a rejected request.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Contention { .. } | StoreError::Unavailable { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            return StoreError::Contention { attempts: 1 };
        }
        StoreError::unavailable("sqlite", err)
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(
                inner.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Errors loading the optional engine tuning file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read engine config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse engine config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("No per-user data directory available")]
    NoDataDir,
}

pub type Result<T> = std::result::Result<T, StoreError>;
