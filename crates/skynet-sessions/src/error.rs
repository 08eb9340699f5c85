use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed session record: {0}")]
    Corrupt(String),

    #[error("branch not found: {branch_id}")]
    BranchNotFound { branch_id: String },

    #[error("too many sanitized-filename collisions for key: {key}")]
    CollisionLimitExceeded { key: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("branch depth exceeded for parent {parent_id}")]
    DepthExceeded { parent_id: String },

    #[error("cannot merge the main branch")]
    MergeOfMainBranch,

    #[error("branches {a} and {b} share no common ancestor")]
    NoCommonAncestor { a: String, b: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
