//! Error types for plugin registry storage

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend connection error
    #[error("Backend connection error: {0}")]
    Connection(String),

    /// A table the operation needs does not exist yet
    #[error("Table missing: {0}")]
    MissingTable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A migration or data script failed to execute
    #[error("Script execution failed: {0}")]
    Script(String),

    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error means the queried table has not been created yet
    pub fn is_missing_table(&self) -> bool {
        matches!(self, Error::MissingTable(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message();
                // SQLite reports "no such table", Postgres uses SQLSTATE 42P01
                if message.contains("no such table") || db.code().as_deref() == Some("42P01") {
                    Error::MissingTable(message.to_string())
                } else {
                    Error::Backend(err.to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Error::Connection(err.to_string())
            }
            _ => Error::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_detection() {
        assert!(Error::MissingTable("plugin_migrations".into()).is_missing_table());
        assert!(!Error::Backend("boom".into()).is_missing_table());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Script("syntax error".to_string());
        assert_eq!(err.to_string(), "Script execution failed: syntax error");
    }
}
