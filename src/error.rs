use std::any::Any;
use std::error::Error as _;
use std::io;

use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("stage {index} ('{name}') failed")]
    Stage {
        index: usize,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("stage {index} ('{name}') panicked: {message}")]
    Panicked {
        index: usize,
        name: String,
        message: String,
    },
    #[error("stage {index} ('{name}') could not be scheduled")]
    Scheduling {
        index: usize,
        name: String,
        #[source]
        source: JoinError,
    },
    #[error("chain driver was aborted")]
    Aborted {
        #[source]
        source: JoinError,
    },
    #[error("failed to start worker pool")]
    Runtime(#[from] io::Error),
}

impl ChainError {
    /// Index of the stage that failed, when the failure belongs to a stage.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            ChainError::Stage { index, .. }
            | ChainError::Panicked { index, .. }
            | ChainError::Scheduling { index, .. } => Some(*index),
            ChainError::Aborted { .. } | ChainError::Runtime(_) => None,
        }
    }

    pub fn stage_name(&self) -> Option<&str> {
        match self {
            ChainError::Stage { name, .. }
            | ChainError::Panicked { name, .. }
            | ChainError::Scheduling { name, .. } => Some(name),
            ChainError::Aborted { .. } | ChainError::Runtime(_) => None,
        }
    }
}

impl ChainError {
    /// The message followed by every underlying cause, `: `-separated.
    pub fn describe(&self) -> String {
        let mut text = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            text.push_str(": ");
            text.push_str(&err.to_string());
            cause = err.source();
        }
        text
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
