use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy};

use super::retry::{RetryPolicy, Verdict};
use super::{Auth, HttpRequest, HttpResponse};
use crate::core::throttle::RateLimiter;
use crate::error::{PollError, Result};
use crate::modules::Platform;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
     Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// HTTP primitive shared by the platform adapters.
///
/// Every attempt goes through the platform's [`RateLimiter`] first, and the
/// injected [`RetryPolicy`] decides whether a response is returned, retried,
/// or turned into a typed error.
pub struct HttpClient {
    platform: Platform,
    inner: Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    default_headers: HeaderMap,
}

impl HttpClient {
    pub fn new(
        platform: Platform,
        timeout_seconds: u64,
        proxy_url: Option<&str>,
        custom_headers: &[(String, String)],
    ) -> Result<Self> {
        let mut builder = ClientBuilder::new().timeout(Duration::from_secs(timeout_seconds));

        if let Some(proxy) = proxy_url {
            let proxy = Proxy::all(proxy)
                .map_err(|e| PollError::Request(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| PollError::Request(format!("failed to build HTTP client: {}", e)))?;

        let mut default_headers = HeaderMap::new();
        for (key, val) in custom_headers {
            match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(val)) {
                (Ok(name), Ok(value)) => {
                    default_headers.insert(name, value);
                }
                _ => warn!("ignoring malformed custom header '{}'", key),
            }
        }

        Ok(Self {
            platform,
            inner,
            limiter: Arc::new(RateLimiter::unlimited(platform)),
            retry: RetryPolicy::default(),
            default_headers,
        })
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Sends `req`, retrying transient failures per the retry policy.
    ///
    /// 2xx, 404 and 410 responses are returned as-is; everything else ends up
    /// as a [`PollError`] once the policy gives up.
    pub async fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let url = req.url.to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.admit().await?;

            let reason = match self.send_once(req).await {
                Ok((status, body)) => match self.retry.classify(status, &body) {
                    Verdict::Accept => {
                        debug!("{} {} -> {}", req.method, url, status);
                        return Ok(HttpResponse { url, status, body });
                    }
                    Verdict::Banned => {
                        return Err(PollError::Banned {
                            platform: self.platform,
                            status,
                        })
                    }
                    Verdict::Unauthorized => {
                        return Err(PollError::Auth {
                            platform: self.platform,
                            reason: format!("HTTP {} from {}", status, url),
                        })
                    }
                    Verdict::Fail => return Err(PollError::Status { url, status }),
                    Verdict::Retry => format!("HTTP {}", status),
                },
                Err(e) => e.to_string(),
            };

            if !self.retry.should_retry(attempt) {
                return Err(PollError::Transient {
                    url,
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.retry.backoff_with_jitter(attempt);
            warn!(
                "{}: {} on {} (attempt {}/{}), retrying in {}ms",
                self.platform,
                reason,
                url,
                attempt,
                self.retry.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(&self, req: &HttpRequest) -> std::result::Result<(u16, String), reqwest::Error> {
        let mut builder = self.inner.request(req.method.clone(), req.url.as_str());

        for (name, value) in self.default_headers.iter() {
            builder = builder.header(name, value);
        }
        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }
        if !req.headers.contains_key(USER_AGENT) && !self.default_headers.contains_key(USER_AGENT) {
            builder = builder.header(USER_AGENT, random_user_agent());
        }

        builder = match &req.auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Bearer(token) => builder.bearer_auth(token),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    USER_AGENTS.choose(&mut rng).copied().unwrap_or("Mozilla/5.0")
}
