//! Storage errors.

use std::fmt;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Which way an object was moving when a transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Fetch,
    Publish,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Fetch => write!(f, "fetch"),
            Direction::Publish => write!(f, "publish"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store misconfigured: {0}")]
    Config(String),

    #[error("No object at {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Failed to {direction} {location}: {reason}")]
    Transfer {
        direction: Direction,
        location: String,
        reason: String,
    },

    #[error("Failed to list {location}: {reason}")]
    ListFailed { location: String, reason: String },

    #[error("Object key {0:?} is empty or escapes its bucket")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn fetch_failed(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transfer {
            direction: Direction::Fetch,
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn publish_failed(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transfer {
            direction: Direction::Publish,
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn list_failed(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ListFailed {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}
