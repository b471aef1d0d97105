use std::time::Duration;

use rand::Rng;

/// Body fragments served by WAFs and anti-bot walls instead of real content.
const BAN_SIGNATURES: &[&str] = &[
    "attention required! | cloudflare",
    "cf-chl-bypass",
    "cf_chl_opt",
    "access denied",
    "request blocked",
    "you have been blocked",
    "error code: 1020",
];

/// What the HTTP client should do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the response to the caller (success, or a definitive 404/410).
    Accept,
    Retry,
    Banned,
    Unauthorized,
    Fail,
}

/// Retry and classification rules injected into [`super::HttpClient`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_statuses: Vec<u16>,
    pub ban_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            retry_statuses: vec![408, 425, 429, 500, 502, 503, 504],
            ban_statuses: vec![999, 1020],
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn classify(&self, status: u16, body: &str) -> Verdict {
        if self.ban_statuses.contains(&status) {
            return Verdict::Banned;
        }
        match status {
            200..=299 | 404 | 410 => Verdict::Accept,
            401 => Verdict::Unauthorized,
            403 if looks_like_ban(body) => Verdict::Banned,
            s if self.retry_statuses.contains(&s) || (500..600).contains(&s) => Verdict::Retry,
            _ => Verdict::Fail,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Exponential delay before the attempt following `attempt`: base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// [`Self::backoff`] plus up to 25% random jitter, never above the cap.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        let extra = rand::rng().random_range(0..=jitter_ms);
        (base + Duration::from_millis(extra)).min(self.max_delay)
    }
}

fn looks_like_ban(body: &str) -> bool {
    let lower = body.to_lowercase();
    BAN_SIGNATURES.iter().any(|sig| lower.contains(sig))
}
