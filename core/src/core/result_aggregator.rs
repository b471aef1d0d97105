use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::scope::ProgramData;
use crate::modules::{Handle, Platform};
use crate::SinkRef;

/// A handle whose fetch failed, and why.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramFailure {
    pub handle: Handle,
    pub error: String,
    pub fatal: bool,
}

/// Everything one orchestrated poll produced.
///
/// `programs` is in completion order. When `aborted` is set the run stopped
/// early (fail-fast, or a fatal error) and `programs` is partial.
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub platform: Platform,
    pub programs: Vec<ProgramData>,
    /// Program URL to the handle it was fetched under.
    pub handles: BTreeMap<String, Handle>,
    pub failures: Vec<ProgramFailure>,
    pub aborted: Option<ProgramFailure>,
}

impl PollOutcome {
    pub fn empty(platform: Platform) -> Self {
        Self {
            platform,
            programs: Vec::new(),
            handles: BTreeMap::new(),
            failures: Vec::new(),
            aborted: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }

    /// Handles that did not produce a result, including the aborting one.
    pub fn failed_handles(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .chain(self.aborted.iter())
            .map(|f| f.handle.as_str())
    }

    /// Drops programs without any real in-scope target. Gone programs go too.
    pub fn without_empty_programs(mut self) -> Self {
        self.programs.retain(|p| !p.has_no_in_scope());
        self
    }

    pub fn report_summary(&self, sink: &SinkRef) {
        let targets: usize = self
            .programs
            .iter()
            .map(|p| p.in_scope.iter().filter(|e| !e.is_no_scope_table()).count())
            .sum();

        sink.on_log(
            "success",
            &format!(
                "[+] {}: {} program(s), {} in-scope target(s)",
                self.platform,
                self.programs.len(),
                targets
            ),
        );

        if !self.failures.is_empty() {
            sink.on_log("warn", &format!("[!] {} program(s) failed:", self.failures.len()));
            for (i, failure) in self.failures.iter().enumerate() {
                sink.on_log("warn", &format!("  #{} {} → {}", i + 1, failure.handle, failure.error));
            }
        }

        if let Some(ref abort) = self.aborted {
            sink.on_log("error", &format!("[!] {} poll aborted at {}: {}", self.platform, abort.handle, abort.error));
        }
    }
}
