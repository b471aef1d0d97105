use std::path::PathBuf;

use thiserror::Error;

use crate::modules::Platform;

/// Errors raised while talking to a bug bounty platform.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    #[error("authentication failed for {platform}: {reason}")]
    Auth { platform: Platform, reason: String },

    #[error("{platform} is blocking requests (HTTP {status}), skipping this run")]
    Banned { platform: Platform, status: u16 },

    #[error("request to {url} failed after {attempts} attempt(s): {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("unexpected HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to parse response from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("could not build request: {0}")]
    Request(String),

    #[error("rate limiter for {0} has shut down")]
    LimiterClosed(Platform),

    #[error("failed to fetch program {handle}: {reason}")]
    Fetch { handle: String, reason: String },
}

impl PollError {
    /// Bans and auth failures end the whole platform run, whatever the failure mode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Auth { .. } | PollError::Banned { .. })
    }

    pub fn fetch(handle: &str, reason: impl Into<String>) -> Self {
        PollError::Fetch {
            handle: handle.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by snapshot persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot store I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {}: {source}", .path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot store is locked by another process ({})", .0.display())]
    Locked(PathBuf),
}

pub type Result<T> = std::result::Result<T, PollError>;

/// Errors that end a whole poll cycle for one platform.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
