use thiserror::Error;

use crate::application::repos::RepoError;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("task submission failed: {0}")]
    Submission(String),
    #[error("invalid arguments for task `{task}`: {message}")]
    InvalidArguments { task: String, message: String },
    #[error("no handler registered for task `{0}`")]
    UnknownTask(String),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error("task `{0}` exceeded its handler timeout")]
    TimedOut(String),
}

impl FanoutError {
    pub fn submission(err: impl std::fmt::Display) -> Self {
        Self::Submission(err.to_string())
    }

    pub fn invalid_arguments(task: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            task: task.into(),
            message: err.to_string(),
        }
    }
}
