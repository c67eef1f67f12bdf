// src/error.rs

//! Crate-wide error type.

use std::io;
use std::sync::Arc;

/// Errors raised by the agent core.
///
/// Adapter-boundary errors (`Dcs`, `Database`) are stringified at the
/// boundary: the core treats `DcsAdapter`/`DatabaseControl` error types as
/// opaque, so there is nothing more structured to carry here. `Io`/`Config`
/// wrap the underlying error types directly, in `Arc` so the enum can stay
/// `Clone` even though neither `std::io::Error` nor `toml::de::Error`
/// implements it.
#[derive(Debug, thiserror::Error)]
pub enum DeadmanError {
    #[error("dcs error: {0}")]
    Dcs(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("missing required capability: {name}")]
    MissingCapability { name: &'static str },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("config error: {0}")]
    Config(Arc<toml::de::Error>),

    #[error("{0}")]
    Other(String),
}

// Manual impl because `io::Error`/`toml::de::Error` aren't `Clone`.
impl Clone for DeadmanError {
    fn clone(&self) -> Self {
        match self {
            DeadmanError::Dcs(s) => DeadmanError::Dcs(s.clone()),
            DeadmanError::Database(s) => DeadmanError::Database(s.clone()),
            DeadmanError::MissingCapability { name } => DeadmanError::MissingCapability { name },
            DeadmanError::InvariantViolation(s) => DeadmanError::InvariantViolation(s.clone()),
            DeadmanError::Io(e) => DeadmanError::Io(Arc::clone(e)),
            DeadmanError::Config(e) => DeadmanError::Config(Arc::clone(e)),
            DeadmanError::Other(s) => DeadmanError::Other(s.clone()),
        }
    }
}

impl From<io::Error> for DeadmanError {
    fn from(e: io::Error) -> Self {
        DeadmanError::Io(Arc::new(e))
    }
}

impl From<toml::de::Error> for DeadmanError {
    fn from(e: toml::de::Error) -> Self {
        DeadmanError::Config(Arc::new(e))
    }
}

impl PartialEq for DeadmanError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

pub type Result<T> = std::result::Result<T, DeadmanError>;
