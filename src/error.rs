//! Engine-level errors and their dispositions
//!
//! Upstream transport failures, anti-bot challenges, and shape drift are not
//! errors at this level: they are absorbed inside the fetch pipeline and at
//! worst shrink the result set. What surfaces here is what a caller must
//! react to: bad user input, lock contention, and persistence failures.

use thiserror::Error;

/// Failures surfaced by the sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The user-supplied URL does not contain a recognizable organization id.
    /// The message is user-visible.
    #[error("{0}")]
    InvalidUrl(String),

    /// Another sync for the same source currently holds the lock
    #[error("sync already running")]
    AlreadyRunning,

    /// The database transaction failed and was rolled back; prior data is
    /// untouched
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The lock backend itself failed (not contention)
    #[error("lock backend error: {0}")]
    Lock(String),
}

impl SyncError {
    /// Validation failure with the standard user-visible message
    pub fn unparseable_url(url: &str) -> Self {
        SyncError::InvalidUrl(format!(
            "Не удалось определить идентификатор организации из ссылки: {url}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_url_message_is_user_visible() {
        let err = SyncError::unparseable_url("https://example.com/foo");
        let msg = err.to_string();
        assert!(msg.contains("идентификатор организации"));
        assert!(msg.contains("https://example.com/foo"));
    }

    #[test]
    fn already_running_message() {
        assert_eq!(SyncError::AlreadyRunning.to_string(), "sync already running");
    }
}
