use thiserror::Error;

use crate::core::{TaskId, TaskState};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task_id} would create a dependency cycle through {via}")]
    CyclicDependency { task_id: TaskId, via: TaskId },

    #[error("Unknown selection strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Coordinator is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
