use thiserror::Error;

/// A battle lifecycle transition that was refused because the battle is not
/// in the state the transition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Battle {0} is already started")]
    AlreadyStarted(i64),

    #[error("Battle {0} is already finished")]
    AlreadyFinished(i64),

    #[error("Battle {0} has not been started")]
    NotRunning(i64),
}

impl TransitionError {
    pub fn battle_id(&self) -> i64 {
        match self {
            Self::AlreadyStarted(id) | Self::AlreadyFinished(id) | Self::NotRunning(id) => *id,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification used by callers deciding whether a failure is an
/// expected outcome or a bug/race that must stop the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    InvalidTransition,
    Fatal,
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Database(_) | Self::Migration(_) | Self::InvalidRow(_) | Self::Serialization(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Expected conditions the caller can act on (unknown robot, duplicate
    /// name, bad outcome). Everything else is a logic error or a race.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Validation)
    }

    pub fn transition(&self) -> Option<TransitionError> {
        match self {
            Self::InvalidTransition(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(sqlx::Error::Database(e))
                if e.kind() == sqlx::error::ErrorKind::UniqueViolation
        )
    }
}

impl From<validator::ValidationErrors> for StorageError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    format!(
                        "{}: {}",
                        field,
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    )
                })
            })
            .collect();
        Self::Validation(details.join(", "))
    }
}
