use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed plugin manifest: {0}")]
    Manifest(String),

    #[error("filesystem watch error: {0}")]
    Watch(String),
}

pub type Result<T> = std::result::Result<T, SkillError>;
