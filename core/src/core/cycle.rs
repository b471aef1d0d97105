use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::core::diff::{ChangeDetector, DiffOutcome};
use crate::core::engine::PollOrchestrator;
use crate::core::result_aggregator::PollOutcome;
use crate::core::state::{Snapshot, SnapshotStore};
use crate::error::CycleError;
use crate::modules::{Credentials, Handle, Platform, Poller};
use crate::{PollConfig, SinkRef};

/// What one poll cycle of one platform produced.
#[derive(Debug)]
pub struct CycleReport {
    pub platform: Platform,
    /// Fetched programs, also available when the diff was refused.
    pub outcome: PollOutcome,
    /// `None` without a store, or when the poll was aborted.
    pub diff: Option<DiffOutcome>,
    pub persisted: bool,
}

/// Polls one platform end to end.
///
/// With a `store`, the fresh programs are diffed against the persisted
/// snapshot, change events go to the sink, and the snapshot is replaced
/// unless the poll looks like a wipe. An aborted poll is never diffed.
pub async fn run_poll_cycle(
    poller: Arc<dyn Poller>,
    credentials: &Credentials,
    config: &PollConfig,
    store: Option<&dyn SnapshotStore>,
    sink: &SinkRef,
) -> Result<CycleReport, CycleError> {
    let platform = poller.platform();
    let options = config.poll_options().map_err(|e| CycleError::Config(format!("{:#}", e)))?;

    poller.authenticate(credentials).await?;
    debug!("{}: authenticated", platform);

    let persisted = match store {
        Some(store) => store.load(platform)?,
        None => None,
    };

    let mut known: Vec<Handle> = config
        .known_handles()
        .map_err(|e| CycleError::Config(format!("{:#}", e)))?;
    if let Some(snapshot) = &persisted {
        for url in snapshot.programs.keys() {
            if let Some(handle) = stored_handle(poller.as_ref(), snapshot, url) {
                poller.note_program_url(&handle, url);
                known.push(handle);
            }
        }
    }

    let orchestrator = PollOrchestrator::new(Arc::clone(&poller), config.concurrency)
        .with_mode(config.failure_mode())
        .with_sink(Arc::clone(sink))
        .streaming(config.streaming);

    let mut outcome = orchestrator.poll(&options, &known).await?;
    if config.skip_empty {
        outcome = outcome.without_empty_programs();
    }

    let Some(store) = store else {
        return Ok(CycleReport { platform, outcome, diff: None, persisted: false });
    };
    if !outcome.is_complete() {
        sink.on_log("warn", &format!("[!] {}: poll aborted, snapshot left untouched", platform));
        return Ok(CycleReport { platform, outcome, diff: None, persisted: false });
    }

    let fresh = fresh_snapshot(platform, &outcome, persisted.as_ref(), poller.as_ref());
    let detector = ChangeDetector::new(config.wipe_threshold);
    let diff = detector.diff(persisted.as_ref(), &fresh);

    match &diff {
        DiffOutcome::Baseline => {
            sink.on_log("success", &format!("[+] {}: baseline recorded ({} programs)", platform, fresh.len()));
        }
        DiffOutcome::Changes(events) => {
            for event in events {
                sink.on_change(event);
            }
            info!("{}: {} change(s)", platform, events.len());
        }
        DiffOutcome::SuspectedWipe { persisted_programs } => {
            sink.on_log(
                "error",
                &format!(
                    "[!] {}: empty poll against {} stored programs, not persisting",
                    platform, persisted_programs
                ),
            );
        }
    }

    let persisted = if diff.should_persist() {
        store.save(&fresh)?;
        true
    } else {
        false
    };

    Ok(CycleReport { platform, outcome, diff: Some(diff), persisted })
}

/// Handle a persisted program was fetched under, from the stored map or its URL.
fn stored_handle(poller: &dyn Poller, snapshot: &Snapshot, url: &str) -> Option<Handle> {
    snapshot
        .handles
        .get(url)
        .cloned()
        .or_else(|| poller.handle_from_url(url))
}

/// Builds the snapshot to compare and store.
///
/// Gone programs are left out. A handle whose fetch failed keeps its
/// persisted program so a flaky fetch does not read as a removal.
fn fresh_snapshot(
    platform: Platform,
    outcome: &PollOutcome,
    persisted: Option<&Snapshot>,
    poller: &dyn Poller,
) -> Snapshot {
    let mut fresh = Snapshot::from_programs(
        platform,
        outcome.programs.iter().filter(|p| !p.is_empty()).cloned(),
    );
    for (url, handle) in &outcome.handles {
        if fresh.programs.contains_key(url) {
            fresh.handles.insert(url.clone(), handle.clone());
        }
    }

    let Some(persisted) = persisted else {
        return fresh;
    };

    let failed: HashSet<&str> = outcome.failed_handles().collect();
    if failed.is_empty() {
        return fresh;
    }
    for (url, program) in &persisted.programs {
        if fresh.programs.contains_key(url) {
            continue;
        }
        let Some(handle) = stored_handle(poller, persisted, url) else {
            continue;
        };
        if failed.contains(handle.as_str()) {
            warn!("{}: keeping stored scope of {} after failed fetch", platform, url);
            fresh.programs.insert(url.clone(), program.clone());
            fresh.handles.insert(url.clone(), handle);
        }
    }
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::ChangeKind;
    use crate::core::scope::ScopeElement;
    use crate::core::state::JsonSnapshotStore;
    use crate::error::PollError;
    use crate::modules::SyntheticPoller;
    use crate::{ChangeEvent, PollEventSink};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<ChangeEvent>>,
    }

    impl PollEventSink for RecordingSink {
        fn on_log(&self, _level: &str, _message: &str) {}
        fn on_program(&self, _program: &crate::ProgramData) {}
        fn on_change(&self, event: &ChangeEvent) {
            self.changes.lock().unwrap().push(event.clone());
        }
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    fn url(handle: &str) -> String {
        SyntheticPoller::program_url(handle)
    }

    /// Numeric handles whose program URLs carry a slug instead of the handle.
    struct IdPoller {
        listed: Vec<Handle>,
        failing: Vec<Handle>,
        noted: Mutex<Vec<(Handle, String)>>,
    }

    impl IdPoller {
        fn new(listed: &[&str], failing: &[&str]) -> Self {
            Self {
                listed: listed.iter().map(|h| h.to_string()).collect(),
                failing: failing.iter().map(|h| h.to_string()).collect(),
                noted: Mutex::new(Vec::new()),
            }
        }

        fn page(handle: &str) -> String {
            let slug = if handle == "id-1" { "one" } else { "two" };
            format!("https://example.invalid/acme/{}/detail", slug)
        }
    }

    #[async_trait::async_trait]
    impl Poller for IdPoller {
        fn platform(&self) -> Platform {
            Platform::Intigriti
        }

        async fn authenticate(&self, _credentials: &Credentials) -> crate::error::Result<()> {
            Ok(())
        }

        async fn list_program_handles(&self, _options: &crate::PollOptions) -> crate::error::Result<Vec<Handle>> {
            Ok(self.listed.clone())
        }

        async fn fetch_program_scope(&self, handle: &str, _options: &crate::PollOptions) -> crate::error::Result<crate::ProgramData> {
            if self.failing.iter().any(|h| h == handle) {
                return Err(PollError::fetch(handle, "timeout"));
            }
            let mut program = crate::ProgramData::new(Self::page(handle));
            program.in_scope.push(ScopeElement::new(format!("{}.example.com", handle), "URL"));
            Ok(program)
        }

        fn note_program_url(&self, handle: &str, url: &str) {
            self.noted.lock().unwrap().push((handle.to_string(), url.to_string()));
        }
    }

    #[tokio::test]
    async fn test_without_store_nothing_is_diffed() {
        let sink: SinkRef = Arc::new(RecordingSink::default());
        let report = run_poll_cycle(
            Arc::new(SyntheticPoller::demo()),
            &Credentials::default(),
            &PollConfig::default(),
            None,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(report.outcome.programs.len(), 3);
        assert!(report.diff.is_none());
        assert!(!report.persisted);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_persisted_program() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());

        let mut stored = crate::ProgramData::new(url("flaky"));
        stored.in_scope.push(ScopeElement::new("flaky.example.com", "URL"));
        store.save(&Snapshot::from_programs(Platform::Test, vec![stored])).unwrap();

        let poller = SyntheticPoller::new()
            .with_program("steady", vec![ScopeElement::new("steady.example.com", "URL")], vec![])
            .with_failure("flaky", PollError::fetch("flaky", "timeout"));
        let recorder = Arc::new(RecordingSink::default());
        let sink: SinkRef = recorder.clone();

        let report = run_poll_cycle(Arc::new(poller), &Credentials::default(), &PollConfig::default(), Some(&store), &sink)
            .await
            .unwrap();

        let changes = recorder.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].target, "steady.example.com");
        assert!(report.persisted);
        assert!(store.load(Platform::Test).unwrap().unwrap().programs.contains_key(&url("flaky")));
    }

    #[tokio::test]
    async fn test_aborted_poll_leaves_store_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        let poller = SyntheticPoller::new()
            .with_program("a", vec![ScopeElement::new("a.example.com", "URL")], vec![])
            .with_failure("b", PollError::Banned { platform: Platform::Test, status: 1020 });
        let sink: SinkRef = Arc::new(RecordingSink::default());
        let config = PollConfig { concurrency: 1, ..Default::default() };

        let report = run_poll_cycle(Arc::new(poller), &Credentials::default(), &config, Some(&store), &sink)
            .await
            .unwrap();

        assert!(report.outcome.aborted.is_some());
        assert!(report.diff.is_none());
        assert!(store.load(Platform::Test).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gone_programs_are_not_snapshotted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        let config = PollConfig {
            known_handles_file: {
                let path = dir.path().join("known.txt");
                std::fs::write(&path, "vanished\n").unwrap();
                path.to_string_lossy().into_owned()
            },
            ..Default::default()
        };
        let sink: SinkRef = Arc::new(RecordingSink::default());

        let report = run_poll_cycle(Arc::new(SyntheticPoller::demo()), &Credentials::default(), &config, Some(&store), &sink)
            .await
            .unwrap();

        assert_eq!(report.diff, Some(DiffOutcome::Baseline));
        let saved = store.load(Platform::Test).unwrap().unwrap();
        assert_eq!(saved.len(), 3);
        assert!(!saved.programs.contains_key(&url("vanished")));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_carried_without_url_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        let config = PollConfig::default();

        let sink: SinkRef = Arc::new(RecordingSink::default());
        let baseline = IdPoller::new(&["id-1", "id-2"], &[]);
        let first = run_poll_cycle(Arc::new(baseline), &Credentials::default(), &config, Some(&store), &sink)
            .await
            .unwrap();
        assert_eq!(first.diff, Some(DiffOutcome::Baseline));
        let saved = store.load(Platform::Intigriti).unwrap().unwrap();
        assert_eq!(saved.handles.get(&IdPoller::page("id-2")).map(String::as_str), Some("id-2"));

        // id-2 drops out of the listing and its fetch fails
        let poller = Arc::new(IdPoller::new(&["id-1"], &["id-2"]));
        let recorder = Arc::new(RecordingSink::default());
        let sink: SinkRef = recorder.clone();
        let second = run_poll_cycle(poller.clone(), &Credentials::default(), &config, Some(&store), &sink)
            .await
            .unwrap();

        assert_eq!(second.outcome.failed_handles().collect::<Vec<_>>(), vec!["id-2"]);
        assert!(recorder.changes.lock().unwrap().is_empty());
        assert!(poller.noted.lock().unwrap().contains(&("id-2".to_string(), IdPoller::page("id-2"))));

        let saved = store.load(Platform::Intigriti).unwrap().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved.handles.get(&IdPoller::page("id-2")).map(String::as_str), Some("id-2"));
    }
}
