use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Credentials, Handle, Platform, PollOptions, Poller};
use crate::core::scope::{ProgramData, ScopeElement};
use crate::core::throttle::RateLimiter;
use crate::error::{PollError, Result};

const BASE_URL: &str = "https://test.scopewatch.invalid/";

/// Deterministic in-memory platform.
///
/// Serves fixed programs for known handles, an empty (gone) program for
/// unknown ones, and the configured error for handles marked as failing.
/// Used by the test suites and by `scopewatch test`.
pub struct SyntheticPoller {
    programs: BTreeMap<Handle, ProgramData>,
    listed: Vec<Handle>,
    failures: HashMap<Handle, PollError>,
    latency: Duration,
    limiter: Option<Arc<RateLimiter>>,
    fetches: AtomicUsize,
}

impl SyntheticPoller {
    pub fn new() -> Self {
        Self {
            programs: BTreeMap::new(),
            listed: Vec::new(),
            failures: HashMap::new(),
            latency: Duration::ZERO,
            limiter: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn program_url(handle: &str) -> String {
        format!("{}{}", BASE_URL, handle)
    }

    /// Small fixed dataset served by the `test` platform.
    pub fn demo() -> Self {
        Self::new()
            .with_program(
                "acme",
                vec![
                    ScopeElement::new("*.acme.example.com", "WILDCARD").bounty(true),
                    ScopeElement::new("api.acme.example.com", "URL")
                        .with_description("Public REST API")
                        .bounty(true),
                    ScopeElement::new("com.acme.mobile", "GOOGLE_PLAY_APP_ID").bounty(true),
                ],
                vec![ScopeElement::new("blog.acme.example.com", "URL")],
            )
            .with_program(
                "globex",
                vec![
                    ScopeElement::new("10.20.0.0/16", "CIDR"),
                    ScopeElement::new("0x00000000000000000000000000000000deadbeef", "SMART_CONTRACT").bounty(true),
                ],
                vec![],
            )
            .with_program("initech", vec![ScopeElement::no_scope_table()], vec![])
    }

    /// Adds a program that is also returned by the listing.
    pub fn with_program(mut self, handle: &str, in_scope: Vec<ScopeElement>, out_of_scope: Vec<ScopeElement>) -> Self {
        self.listed.push(handle.to_string());
        self.programs.insert(
            handle.to_string(),
            ProgramData {
                url: Self::program_url(handle),
                in_scope,
                out_of_scope,
            },
        );
        self
    }

    /// Adds a program that can be fetched but is not listed.
    pub fn with_unlisted_program(mut self, handle: &str, in_scope: Vec<ScopeElement>) -> Self {
        self.programs.insert(
            handle.to_string(),
            ProgramData {
                url: Self::program_url(handle),
                in_scope,
                out_of_scope: Vec::new(),
            },
        );
        self
    }

    /// Makes fetching `handle` fail with `error`. The handle is listed.
    pub fn with_failure(mut self, handle: &str, error: PollError) -> Self {
        if !self.listed.iter().any(|h| h == handle) {
            self.listed.push(handle.to_string());
        }
        self.failures.insert(handle.to_string(), error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticPoller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Poller for SyntheticPoller {
    fn platform(&self) -> Platform {
        Platform::Test
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<()> {
        Ok(())
    }

    async fn list_program_handles(&self, _options: &PollOptions) -> Result<Vec<Handle>> {
        Ok(super::dedup_handles(self.listed.clone()))
    }

    async fn fetch_program_scope(&self, handle: &str, options: &PollOptions) -> Result<ProgramData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(limiter) = &self.limiter {
            limiter.admit().await?;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.failures.get(handle) {
            return Err(error.clone());
        }

        match self.programs.get(handle) {
            Some(program) => Ok(program.clone().apply_options(options)),
            None => Ok(ProgramData::gone(Self::program_url(handle))),
        }
    }

    fn handle_from_url(&self, url: &str) -> Option<Handle> {
        url.strip_prefix(BASE_URL)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
    }
}
