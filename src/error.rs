use std::path::PathBuf;

use thiserror::Error;

use crate::messenger::RecipientId;

/// Refusals from the recipient registry. Never fatal to the caller.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("recipient \"{name}\" uses protected tags: {}", tags.join(", "))]
    Protected { name: String, tags: Vec<String> },
    #[error("recipient {0} is not registered")]
    UnknownRecipient(RecipientId),
    #[error("no recipient named \"{0}\"")]
    UnknownName(String),
}

impl RegistryError {
    /// Number of tags that caused the refusal.
    pub fn refused(&self) -> usize {
        match self {
            RegistryError::Protected { tags, .. } => tags.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("command \"{0}\" is already registered")]
    DuplicateCommand(String),
    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),
    #[error("empty command line")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid RON")]
    Parse(#[from] ron::error::SpannedError),
}

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("timeline \"{0}\" is running")]
    Running(String),
}
