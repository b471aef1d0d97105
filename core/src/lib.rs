pub mod core;
pub mod error;
pub mod http;
pub mod modules;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub use crate::core::category::{normalize, Category};
pub use crate::core::cycle::{run_poll_cycle, CycleReport};
pub use crate::core::diff::{ChangeDetector, ChangeEvent, ChangeKind, DiffOutcome, DEFAULT_WIPE_THRESHOLD};
pub use crate::core::engine::{FailureMode, PollOrchestrator, DEFAULT_CONCURRENCY};
pub use crate::core::result_aggregator::{PollOutcome, ProgramFailure};
pub use crate::core::scope::{ProgramData, ScopeElement};
pub use crate::core::state::{JsonSnapshotStore, Snapshot, SnapshotStore, StoreLock};
pub use crate::core::target_manager::HandleQueue;
pub use crate::core::throttle::RateLimiter;
pub use crate::error::{CycleError, PollError, StoreError};
pub use crate::http::{HttpClient, RetryPolicy};
pub use crate::modules::{
    Credentials, Handle, HackerOnePoller, IntigritiPoller, Platform, PollOptions, Poller, SyntheticPoller,
};
pub use crate::utils::output::{format_change, OutputFormat};
pub use crate::utils::read_lines;

/// Shared poll configuration used by the CLI and any other frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollConfig {
    pub platforms: Vec<Platform>,
    pub concurrency: usize,
    pub timeout: u64,
    pub proxy: String,
    pub headers: String,
    /// Overrides every platform's default request interval when set.
    pub rate_limit_ms: Option<u64>,
    pub retry_attempts: u32,
    pub private_only: bool,
    pub bounty_only: bool,
    pub categories: String,
    pub include_out_of_scope: bool,
    pub fail_fast: bool,
    pub streaming: bool,
    pub diff: bool,
    pub store_dir: String,
    pub wipe_threshold: usize,
    pub known_handles_file: String,
    pub output_fields: String,
    pub delimiter: String,
    pub skip_empty: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            platforms: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: 30,
            proxy: String::new(),
            headers: String::new(),
            rate_limit_ms: None,
            retry_attempts: 3,
            private_only: false,
            bounty_only: false,
            categories: String::new(),
            include_out_of_scope: false,
            fail_fast: false,
            streaming: false,
            diff: false,
            store_dir: ".scopewatch".to_string(),
            wipe_threshold: DEFAULT_WIPE_THRESHOLD,
            known_handles_file: String::new(),
            output_fields: "tu".to_string(),
            delimiter: " ".to_string(),
            skip_empty: false,
        }
    }
}

impl PollConfig {
    /// Loads a JSON config file; missing keys take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path).with_context(|| format!("failed to read config '{}'", path))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config '{}'", path))
    }

    pub fn header_list(&self) -> Vec<String> {
        if self.headers.is_empty() {
            Vec::new()
        } else {
            self.headers
                .split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        parse_custom_headers(&self.header_list())
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }

    pub fn category_filter(&self) -> anyhow::Result<Option<Vec<Category>>> {
        if self.categories.trim().is_empty() {
            return Ok(None);
        }
        self.categories
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Category>().map_err(|e| anyhow!(e)))
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Some)
    }

    pub fn poll_options(&self) -> anyhow::Result<PollOptions> {
        Ok(PollOptions {
            private_only: self.private_only,
            bounty_only: self.bounty_only,
            categories: self.category_filter()?,
            include_out_of_scope: self.include_out_of_scope,
        })
    }

    pub fn failure_mode(&self) -> FailureMode {
        if self.fail_fast { FailureMode::FailFast } else { FailureMode::BestEffort }
    }

    pub fn output_format(&self) -> anyhow::Result<OutputFormat> {
        OutputFormat::parse(&self.output_fields, &self.delimiter).map_err(|e| anyhow!(e))
    }

    pub fn request_interval(&self, platform: Platform) -> Duration {
        match self.rate_limit_ms {
            Some(ms) => Duration::from_millis(ms),
            None => platform.default_request_interval(),
        }
    }

    pub fn known_handles(&self) -> anyhow::Result<Vec<Handle>> {
        if self.known_handles_file.is_empty() {
            return Ok(Vec::new());
        }
        read_lines(&self.known_handles_file)
            .with_context(|| format!("failed to read known handles from '{}'", self.known_handles_file))
    }
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Builds the poller for `platform`, wiring its HTTP client and rate limiter.
///
/// Must be called inside a tokio runtime when the platform is rate limited.
pub fn build_poller(platform: Platform, config: &PollConfig) -> anyhow::Result<Arc<dyn Poller>> {
    let http_client = || -> anyhow::Result<HttpClient> {
        let limiter = Arc::new(RateLimiter::spawn(platform, config.request_interval(platform)));
        Ok(HttpClient::new(platform, config.timeout, config.proxy_ref(), &config.parsed_headers())?
            .with_limiter(limiter)
            .with_retry_policy(RetryPolicy::default().with_max_attempts(config.retry_attempts)))
    };

    match platform {
        Platform::HackerOne => Ok(Arc::new(HackerOnePoller::new(http_client()?))),
        Platform::Intigriti => Ok(Arc::new(IntigritiPoller::new(http_client()?))),
        Platform::Test => {
            let interval = config.request_interval(platform);
            let poller = SyntheticPoller::demo();
            if interval.is_zero() {
                Ok(Arc::new(poller))
            } else {
                Ok(Arc::new(poller.with_limiter(Arc::new(RateLimiter::spawn(platform, interval)))))
            }
        }
        Platform::Bugcrowd | Platform::YesWeHack | Platform::Immunefi => Err(anyhow!(
            "{} needs an external session adapter and is not built in",
            platform
        )),
    }
}

/// Output abstraction for the poll pipeline.
/// The CLI implements this with terminal output.
pub trait PollEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    /// Called once per fetched program in streaming mode.
    fn on_program(&self, program: &ProgramData);
    /// Called once per change event in diff mode.
    fn on_change(&self, event: &ChangeEvent);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn PollEventSink>;

/// Terminal sink: data lines on stdout, logs and progress on stderr.
pub struct ConsoleSink {
    format: OutputFormat,
    verbose: bool,
}

impl ConsoleSink {
    pub fn new_ref(format: OutputFormat, verbose: bool) -> SinkRef {
        Arc::new(Self { format, verbose })
    }
}

impl PollEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        eprintln!("{}", colored);
    }

    fn on_program(&self, program: &ProgramData) {
        use std::io::Write;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in self.format.format_program(program) {
            let _ = writeln!(out, "{}", line);
        }
        out.flush().ok();
    }

    fn on_change(&self, event: &ChangeEvent) {
        use colored::*;
        let line = format_change(event);
        let colored = match event.kind {
            ChangeKind::Added => line.green(),
            ChangeKind::Removed | ChangeKind::ProgramRemoved => line.red(),
            ChangeKind::Updated => line.yellow(),
        };
        println!("{}", colored);
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        if !self.verbose && current > 0 {
            return;
        }
        if total > 0 {
            eprintln!("{}", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            eprintln!("{}", format!("[*] {}", phase).bright_cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.wipe_threshold, 10);
        assert_eq!(config.failure_mode(), FailureMode::BestEffort);
        assert_eq!(config.poll_options().unwrap(), PollOptions::default());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: PollConfig = serde_json::from_str(
            r#"{"platforms": ["hackerone", "test"], "failFast": true, "categories": "url, wildcard", "rateLimitMs": 250}"#,
        )
        .unwrap();

        assert_eq!(config.platforms, vec![Platform::HackerOne, Platform::Test]);
        assert_eq!(config.failure_mode(), FailureMode::FailFast);
        assert_eq!(config.category_filter().unwrap(), Some(vec![Category::Url, Category::Wildcard]));
        assert_eq!(config.request_interval(Platform::HackerOne), Duration::from_millis(250));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_bad_category_filter() {
        let config = PollConfig { categories: "url,nonsense".to_string(), ..Default::default() };
        assert!(config.poll_options().is_err());
    }

    #[test]
    fn test_request_interval_defaults_per_platform() {
        let config = PollConfig::default();
        assert_eq!(config.request_interval(Platform::Bugcrowd), Duration::from_secs(1));
        assert!(config.request_interval(Platform::HackerOne).is_zero());
    }

    #[test]
    fn test_parse_custom_headers() {
        let config = PollConfig { headers: "X-A: 1; X-B:two;;".to_string(), ..Default::default() };
        assert_eq!(
            config.parsed_headers(),
            vec![("X-A".to_string(), "1".to_string()), ("X-B".to_string(), "two".to_string())]
        );
    }

    #[tokio::test]
    async fn test_build_poller() {
        let config = PollConfig::default();
        assert_eq!(build_poller(Platform::Test, &config).unwrap().platform(), Platform::Test);
        assert_eq!(build_poller(Platform::HackerOne, &config).unwrap().platform(), Platform::HackerOne);
        assert!(build_poller(Platform::Bugcrowd, &config).is_err());
    }
}
