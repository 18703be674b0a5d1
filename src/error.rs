use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("Job descriptor has no executable")]
    MissingExecutable,

    #[error("Descriptor was already submitted")]
    AlreadySubmitted,

    #[error("Descriptor is frozen, cannot modify field {0}")]
    Frozen(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DagError>;
