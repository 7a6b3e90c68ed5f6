use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of sift appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// lock conditions when a second process holds the session database.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// Raw persisted auth entries, as read back from `session_state`.
///
/// Values are kept as strings here; parsing the user record is the session
/// manager's job so that a corrupt record can be detected and cleared there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: Option<String>,
    pub user: Option<String>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.user.is_none()
    }
}
