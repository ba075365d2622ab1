use thiserror::Error;

/// Failures of the persistent key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(String),
}

/// Failures reported by the declarative rule engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleEngineError {
    #[error("rule id {0} appears more than once in addRules")]
    DuplicateId(u32),

    #[error("rule id {0} is already in use")]
    IdInUse(u32),

    #[error("rule {id} is invalid: {reason}")]
    InvalidRule { id: u32, reason: String },

    #[error("rule limit exceeded: {count} > {max}")]
    TooManyRules { count: usize, max: usize },

    #[error("rule engine unavailable: {0}")]
    Unavailable(String),
}

/// Failures of user-issued commands.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown site '{0}'")]
    UnknownSite(String),

    #[error("invalid value for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("index {index} out of bounds (length: {len})")]
    OutOfBounds { index: usize, len: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dispatcher is not running")]
    ChannelClosed,
}

impl CommandError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CommandError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
