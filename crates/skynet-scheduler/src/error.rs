use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("bus error: {0}")]
    Bus(#[from] skynet_bus::BusError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
