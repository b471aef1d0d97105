pub mod hackerone;
pub mod intigriti;
pub mod synthetic;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::category::Category;
use crate::core::scope::ProgramData;
use crate::error::Result;

pub use hackerone::HackerOnePoller;
pub use intigriti::IntigritiPoller;
pub use synthetic::SyntheticPoller;

/// Opaque per-platform program identifier, stable within one poll cycle.
pub type Handle = String;

/// Bug bounty platforms known to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    HackerOne,
    Bugcrowd,
    Intigriti,
    YesWeHack,
    Immunefi,
    Test,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::HackerOne,
        Platform::Bugcrowd,
        Platform::Intigriti,
        Platform::YesWeHack,
        Platform::Immunefi,
        Platform::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::HackerOne => "hackerone",
            Platform::Bugcrowd => "bugcrowd",
            Platform::Intigriti => "intigriti",
            Platform::YesWeHack => "yeswehack",
            Platform::Immunefi => "immunefi",
            Platform::Test => "test",
        }
    }

    /// Minimum spacing between two requests to this platform.
    ///
    /// Platforms fronted by aggressive anti-automation get one request per second.
    pub fn default_request_interval(&self) -> Duration {
        match self {
            Platform::Bugcrowd | Platform::YesWeHack | Platform::Immunefi => Duration::from_millis(1000),
            Platform::HackerOne | Platform::Intigriti | Platform::Test => Duration::ZERO,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hackerone" | "h1" => Ok(Platform::HackerOne),
            "bugcrowd" | "bc" => Ok(Platform::Bugcrowd),
            "intigriti" | "it" => Ok(Platform::Intigriti),
            "yeswehack" | "ywh" => Ok(Platform::YesWeHack),
            "immunefi" => Ok(Platform::Immunefi),
            "test" => Ok(Platform::Test),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// Credentials handed to [`Poller::authenticate`]. Unused fields stay `None`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            username: None,
            token: Some(token.into()),
        }
    }

    pub fn basic(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            token: Some(token.into()),
        }
    }
}

/// Listing and fetch options shared by every platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollOptions {
    pub private_only: bool,
    pub bounty_only: bool,
    pub categories: Option<Vec<Category>>,
    pub include_out_of_scope: bool,
}

/// One bug bounty platform as seen by the orchestrator.
///
/// Implementations retry transient failures themselves (through
/// [`crate::http::HttpClient`]) and only surface errors once retries are spent.
#[async_trait]
pub trait Poller: Send + Sync {
    fn platform(&self) -> Platform;

    /// Establishes or refreshes a session. Idempotent.
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Lists program handles, deduplicated across pages.
    async fn list_program_handles(&self, options: &PollOptions) -> Result<Vec<Handle>>;

    /// Fetches one program's scope. A program that no longer exists yields an
    /// empty [`ProgramData`] rather than an error.
    async fn fetch_program_scope(&self, handle: &str, options: &PollOptions) -> Result<ProgramData>;

    /// Recovers the handle of a previously persisted program from its URL.
    fn handle_from_url(&self, _url: &str) -> Option<Handle> {
        None
    }

    /// Tells the poller which URL a stored handle was last seen at.
    fn note_program_url(&self, _handle: &str, _url: &str) {}
}

/// Removes repeated handles while keeping first-seen order.
pub(crate) fn dedup_handles(handles: Vec<Handle>) -> Vec<Handle> {
    let mut seen = std::collections::HashSet::new();
    handles.into_iter().filter(|h| seen.insert(h.clone())).collect()
}
