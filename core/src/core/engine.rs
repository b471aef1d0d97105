use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use futures::future::join_all;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::core::result_aggregator::{PollOutcome, ProgramFailure};
use crate::core::scope::ProgramData;
use crate::core::target_manager::HandleQueue;
use crate::error::Result;
use crate::modules::{Handle, PollOptions, Poller};
use crate::SinkRef;

pub const DEFAULT_CONCURRENCY: usize = 3;

/// What a per-program failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureMode {
    /// Record the failure and keep going.
    #[default]
    BestEffort,
    /// Stop dispatching after the first failure.
    FailFast,
}

/// Fetches every program of one platform with a fixed pool of workers.
///
/// Workers pull handles from one shared queue and append results under a
/// single lock. Nothing is cancelled mid-request: after an abort, idle
/// workers stop taking handles and busy ones finish their current fetch.
/// Fatal errors (bans, auth) abort in either mode.
pub struct PollOrchestrator {
    poller: Arc<dyn Poller>,
    concurrency: usize,
    mode: FailureMode,
    sink: Option<SinkRef>,
    streaming: bool,
}

struct Shared {
    queue: Mutex<HandleQueue>,
    results: Mutex<Vec<ProgramData>>,
    handles: Mutex<BTreeMap<String, Handle>>,
    failures: Mutex<Vec<ProgramFailure>>,
    first_error: OnceLock<ProgramFailure>,
    started: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PollOrchestrator {
    pub fn new(poller: Arc<dyn Poller>, concurrency: usize) -> Self {
        Self {
            poller,
            concurrency: concurrency.max(1),
            mode: FailureMode::default(),
            sink: None,
            streaming: false,
        }
    }

    pub fn with_mode(mut self, mode: FailureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Progress and log output go to `sink`.
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Also emit each program to the sink as soon as it is fetched.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Lists the platform's programs, adds `known` handles, and fetches them all.
    ///
    /// Only a listing failure is returned as `Err`; fetch failures are in the outcome.
    pub async fn poll(&self, options: &PollOptions, known: &[Handle]) -> Result<PollOutcome> {
        let platform = self.poller.platform();
        let listed = self.poller.list_program_handles(options).await?;
        debug!("{}: {} listed handle(s), {} known", platform, listed.len(), known.len());

        let queue = HandleQueue::from_sources(listed, known);
        Ok(self.run(queue, options).await)
    }

    /// Fetches every handle in `queue`.
    pub async fn run(&self, queue: HandleQueue, options: &PollOptions) -> PollOutcome {
        let platform = self.poller.platform();
        if queue.is_empty() {
            return PollOutcome::empty(platform);
        }
        let total = queue.len();

        let workers = self.concurrency.min(total);
        if let Some(sink) = &self.sink {
            sink.on_progress(&format!("Polling {} ({} workers)", platform, workers), 0, total);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            results: Mutex::new(Vec::with_capacity(total)),
            handles: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Vec::new()),
            first_error: OnceLock::new(),
            started: AtomicUsize::new(0),
        });
        let options = Arc::new(options.clone());

        let tasks: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    shared: Arc::clone(&shared),
                    poller: Arc::clone(&self.poller),
                    options: Arc::clone(&options),
                    mode: self.mode,
                    sink: self.sink.clone(),
                    streaming: self.streaming,
                    total,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                error!("{}: poll worker crashed: {}", platform, e);
            }
        }

        let outcome = PollOutcome {
            platform,
            programs: std::mem::take(&mut *lock(&shared.results)),
            handles: std::mem::take(&mut *lock(&shared.handles)),
            failures: std::mem::take(&mut *lock(&shared.failures)),
            aborted: shared.first_error.get().cloned(),
        };
        debug!(
            "{}: {} fetch(es) started, {} succeeded, {} failed",
            platform,
            shared.started.load(Ordering::SeqCst),
            outcome.programs.len(),
            outcome.failures.len()
        );

        if let Some(sink) = &self.sink {
            outcome.report_summary(sink);
        }
        outcome
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    poller: Arc<dyn Poller>,
    options: Arc<PollOptions>,
    mode: FailureMode,
    sink: Option<SinkRef>,
    streaming: bool,
    total: usize,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.shared.first_error.get().is_some() {
                break;
            }
            let Some(handle) = lock(&self.shared.queue).next() else {
                break;
            };
            self.shared.started.fetch_add(1, Ordering::SeqCst);

            match self.poller.fetch_program_scope(&handle, &self.options).await {
                Ok(program) => self.record(handle, program),
                Err(e) => {
                    let failure = ProgramFailure {
                        handle,
                        error: e.to_string(),
                        fatal: e.is_fatal(),
                    };

                    if failure.fatal || self.mode == FailureMode::FailFast {
                        warn!("worker {}: aborting poll on {}: {}", self.id, failure.handle, failure.error);
                        // only the first error is kept
                        let _ = self.shared.first_error.set(failure);
                        break;
                    }

                    warn!("worker {}: {} failed: {}", self.id, failure.handle, failure.error);
                    lock(&self.shared.failures).push(failure);
                }
            }
        }
    }

    fn record(&self, handle: Handle, program: ProgramData) {
        if self.streaming {
            if let Some(sink) = &self.sink {
                sink.on_program(&program);
            }
        }

        lock(&self.shared.handles).insert(program.url.clone(), handle);

        let done = {
            let mut results = lock(&self.shared.results);
            results.push(program);
            results.len()
        };

        if let Some(sink) = &self.sink {
            sink.on_progress("Fetched", done, self.total);
        }
    }
}
