//! Running a collection download: work planning, the worker pool, and ledger upkeep.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Result};
use indicatif::ProgressBar;

use crate::extractor::Extractor;
use crate::fetcher::{FetchRequest, SnapshotFetcher};
use crate::identifier::Identifier;
use crate::ledger::Ledger;
use crate::notifiers::{notify, Notifier};

pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub page_url: String,
    pub output_dir: PathBuf,
    pub worker_count: usize,
    pub token: Option<String>,
    pub resume: bool,
    pub retry_failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_ids: Vec<Identifier>,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Download finished. Succeeded: {}/{}, failed: {}", self.succeeded, self.attempted, self.failed_ids.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub id: Identifier,
    pub success: bool,
}

/// Drops what already succeeded, then re-adds last run's failures when asked to.
pub fn plan_work(
    candidates: Vec<Identifier>,
    succeeded: &BTreeSet<Identifier>,
    failed: &BTreeSet<Identifier>,
    retry_failed: bool,
) -> Vec<Identifier> {
    let mut work: Vec<Identifier> = candidates.into_iter()
        .filter(|id| !succeeded.contains(id))
        .collect();
    if retry_failed {
        for id in failed {
            if !work.contains(id) {
                work.push(id.clone());
            }
        }
    }
    work
}

fn fetch_one(fetcher: &dyn SnapshotFetcher, id: &Identifier, request: &FetchRequest) -> bool {
    log::info!("Starting download: {}", id);
    match panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(request))) {
        Ok(Ok(())) => {
            log::info!("{} downloaded to {}", id, request.local_dir.display());
            true
        }
        Ok(Err(e)) => {
            log::error!("Error downloading {}: {:#}", id, e);
            false
        }
        Err(_) => {
            log::error!("Download of {} panicked", id);
            false
        }
    }
}

/// Runs every job on at most `worker_count` threads and blocks until all are done.
///
/// Outcomes come back in completion order. Each completion advances `progress`
/// and is reported to `notifier` from the calling thread.
pub fn run_pool(
    jobs: &[(Identifier, FetchRequest)],
    worker_count: usize,
    fetcher: &dyn SnapshotFetcher,
    notifier: &dyn Notifier,
    progress: &ProgressBar,
) -> Vec<Outcome> {
    let total = jobs.len();
    if total == 0 {
        return vec![];
    }
    progress.set_length(total as u64);
    progress.set_position(0);
    let workers = worker_count.clamp(1, total);
    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            s.spawn(move || loop {
                let Some((id, request)) = jobs.get(cursor.fetch_add(1, Ordering::SeqCst)) else { break };
                let success = fetch_one(fetcher, id, request);
                if tx.send(Outcome { id: id.clone(), success }).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        for outcome in rx {
            let status = if outcome.success { "ok" } else { "failed" };
            notify(notifier, &format!("[{}/{}] {} {}", outcomes.len() + 1, total, status, outcome.id));
            progress.set_message(outcome.id.to_string());
            progress.inc(1);
            outcomes.push(outcome);
        }
        progress.finish_and_clear();
        outcomes
    })
}

pub fn summarize(outcomes: &[Outcome]) -> FetchSummary {
    let mut failed_ids: Vec<Identifier> = outcomes.iter()
        .filter(|o| !o.success)
        .map(|o| o.id.clone())
        .collect();
    failed_ids.sort();
    FetchSummary {
        attempted: outcomes.len(),
        succeeded: outcomes.iter().filter(|o| o.success).count(),
        failed_ids,
    }
}

/// Ties the extractor, a fetcher and the on-disk ledger together for one run.
pub struct Coordinator {
    extractor: Extractor,
    fetcher: Box<dyn SnapshotFetcher>,
    notifier: Box<dyn Notifier>,
    progress: ProgressBar,
}

impl Coordinator {
    pub fn new(extractor: Extractor, fetcher: Box<dyn SnapshotFetcher>, notifier: Box<dyn Notifier>) -> Self {
        Self { extractor, fetcher, notifier, progress: ProgressBar::hidden() }
    }

    /// Draws pool progress on `bar`; without it progress is only sent to the notifier.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn run(&self, options: &RunOptions) -> Result<FetchSummary> {
        let ledger = Ledger::new(&options.output_dir);
        let succeeded = ledger.load_succeeded()?;
        let failed = if options.retry_failed {
            let failed = ledger.load_failed()?;
            log::info!("Loaded {} failed models, will retry them", failed.len());
            failed
        } else {
            BTreeSet::new()
        };

        let candidates = self.extractor.extract(&options.page_url)?.identifiers();
        log::info!("Found {} models/datasets in the collection", candidates.len());

        let skipped = candidates.iter().filter(|id| succeeded.contains(*id)).count();
        if skipped > 0 {
            log::info!("Skipping {} models already downloaded", skipped);
        }
        let work = plan_work(candidates, &succeeded, &failed, options.retry_failed);

        if work.is_empty() {
            log::info!("No models need to be downloaded");
            self.progress.finish_and_clear();
            let summary = FetchSummary::default();
            notify(self.notifier.as_ref(), &summary.to_string());
            return Ok(summary);
        }

        fs::create_dir_all(&options.output_dir)
            .map_err(|e| anyhow!("could not create output directory {}: {}", options.output_dir.display(), e))?;

        let jobs: Vec<(Identifier, FetchRequest)> = work.into_iter()
            .map(|id| {
                let request = FetchRequest::for_identifier(&id, &options.output_dir, options.token.clone(), options.resume);
                (id, request)
            })
            .collect();
        let outcomes = run_pool(&jobs, options.worker_count, self.fetcher.as_ref(), self.notifier.as_ref(), &self.progress);
        let summary = summarize(&outcomes);

        // completed downloads must reach the success ledger even if the failure ledger can't be written
        let recorded = ledger.record_succeeded(outcomes.iter().filter(|o| o.success).map(|o| &o.id));
        let replaced = ledger.replace_failed(&summary.failed_ids);
        recorded?;
        replaced?;

        notify(self.notifier.as_ref(), &summary.to_string());
        if !summary.failed_ids.is_empty() {
            log::info!("Failed models recorded in {}", ledger.failure_path().display());
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::data::PageSource;
    use crate::error::CollectionError;
    use crate::identifier::RepoKind;
    use crate::notifiers::MemoryNotifier;

    const PAGE_URL: &str = "https://huggingface.co/collections/facebook/sparsh";

    struct StaticSource(String);

    impl PageSource for StaticSource {
        fn get_page(&self, _url: &Url) -> Result<String, CollectionError> {
            Ok(self.0.clone())
        }
    }

    fn page(ids: &[&str]) -> String {
        let entries: Vec<String> = ids.iter().map(|id| format!(r#"{{"id":"{}"}}"#, id)).collect();
        format!(r#"<script>window.initialData={{"collection":{{"models":[{}]}}}}</script>"#, entries.join(","))
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        failing: HashSet<String>,
        panicking: HashSet<String>,
        delay: Duration,
        requests: Mutex<Vec<FetchRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn failing(names: &[&str]) -> Self {
            Self { failing: names.iter().map(|s| s.to_string()).collect(), ..Self::default() }
        }

        fn seen(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl SnapshotFetcher for ScriptedFetcher {
        fn fetch(&self, request: &FetchRequest) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.panicking.contains(&request.remote_name) {
                panic!("fetcher blew up");
            }
            if self.failing.contains(&request.remote_name) {
                return Err(anyhow!("simulated failure"));
            }
            Ok(())
        }
    }

    fn coordinator(html: String, fetcher: Arc<ScriptedFetcher>, notifier: Arc<MemoryNotifier>) -> Coordinator {
        Coordinator::new(Extractor::new(Box::new(StaticSource(html))), Box::new(fetcher), Box::new(notifier))
    }

    fn options(dir: &std::path::Path) -> RunOptions {
        RunOptions {
            page_url: PAGE_URL.to_string(),
            output_dir: dir.to_path_buf(),
            worker_count: DEFAULT_WORKERS,
            token: Some("tok".to_string()),
            resume: true,
            retry_failed: false,
        }
    }

    fn ids(list: &[&str]) -> Vec<Identifier> {
        list.iter().map(|s| Identifier::from(*s)).collect()
    }

    #[test]
    fn test_one_success_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::failing(&["facebook/model-b"]));
        let notifier = Arc::new(MemoryNotifier::new());
        let c = coordinator(page(&["facebook/model-a", "facebook/model-b"]), fetcher.clone(), notifier.clone());

        let summary = c.run(&options(dir.path())).unwrap();
        assert_eq!(summary, FetchSummary { attempted: 2, succeeded: 1, failed_ids: ids(&["facebook/model-b"]) });

        let ledger = Ledger::new(dir.path());
        assert_eq!(fs::read_to_string(ledger.failure_path()).unwrap(), "facebook/model-b\n");
        assert_eq!(fs::read_to_string(ledger.success_path()).unwrap(), "facebook/model-a\n");

        let requests = fetcher.seen();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.token.as_deref() == Some("tok") && r.resume));
        assert!(requests.iter().any(|r| r.local_dir == dir.path().join("facebook--model-a")));

        let messages = notifier.get_saved_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages.last().unwrap(), "Download finished. Succeeded: 1/2, failed: 1");
    }

    #[test]
    fn test_second_run_has_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let c = coordinator(page(&["org/a", "org/b"]), fetcher.clone(), Arc::new(MemoryNotifier::new()));

        assert_eq!(c.run(&options(dir.path())).unwrap().succeeded, 2);
        let second = c.run(&options(dir.path())).unwrap();
        assert_eq!(second, FetchSummary::default());
        assert_eq!(fetcher.seen().len(), 2);
        assert_eq!(Ledger::new(dir.path()).load_succeeded().unwrap().len(), 2);
    }

    #[test]
    fn test_retry_failed_brings_back_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        ledger.record_succeeded(&ids(&["org/a"])).unwrap();
        ledger.replace_failed(&ids(&["org/a", "org/b", "old/removed"])).unwrap();

        let fetcher = Arc::new(ScriptedFetcher::default());
        let c = coordinator(page(&["org/a", "org/b", "org/c"]), fetcher.clone(), Arc::new(MemoryNotifier::new()));

        let mut opts = options(dir.path());
        let plain = c.run(&opts).unwrap();
        assert_eq!(plain.attempted, 2);

        ledger.replace_failed(&ids(&["org/a", "old/removed"])).unwrap();
        opts.retry_failed = true;
        let retried = c.run(&opts).unwrap();
        // org/a is both succeeded and failed on disk; the retry flag wins
        assert_eq!(retried.attempted, 2);
        let names: Vec<String> = fetcher.seen().iter().skip(2).map(|r| r.remote_name.clone()).collect();
        assert!(names.contains(&"org/a".to_string()));
        assert!(names.contains(&"old/removed".to_string()));
        assert_eq!(fs::read_to_string(ledger.failure_path()).unwrap(), "");
    }

    #[test]
    fn test_dataset_identifier_is_delegated_as_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let c = coordinator(page(&["datasets/facebook/foo"]), fetcher.clone(), Arc::new(MemoryNotifier::new()));
        c.run(&options(dir.path())).unwrap();

        let requests = fetcher.seen();
        assert_eq!(requests[0].kind, RepoKind::Dataset);
        assert_eq!(requests[0].remote_name, "facebook/foo");
        assert_eq!(requests[0].local_dir, dir.path().join("datasets--facebook--foo"));
        assert_eq!(fs::read_to_string(Ledger::new(dir.path()).success_path()).unwrap(), "datasets/facebook/foo\n");
    }

    #[test]
    fn test_panicking_fetch_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            panicking: ["org/bad".to_string()].into_iter().collect(),
            ..ScriptedFetcher::default()
        });
        let c = coordinator(page(&["org/bad", "org/good"]), fetcher, Arc::new(MemoryNotifier::new()));
        let summary = c.run(&options(dir.path())).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed_ids, ids(&["org/bad"]));
    }

    #[test]
    fn test_pool_respects_worker_count() {
        let fetcher = ScriptedFetcher { delay: Duration::from_millis(30), ..ScriptedFetcher::default() };
        let out = std::path::Path::new("/unused");
        let jobs: Vec<(Identifier, FetchRequest)> = (0..6)
            .map(|i| {
                let id = Identifier::new(format!("org/m{}", i));
                let request = FetchRequest::for_identifier(&id, out, None, false);
                (id, request)
            })
            .collect();
        let notifier = MemoryNotifier::new();
        let outcomes = run_pool(&jobs, 2, &fetcher, &notifier, &ProgressBar::hidden());
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.success));
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(notifier.get_saved_messages().len(), 6);
        assert!(notifier.get_saved_messages()[5].starts_with("[6/6] ok"));
    }

    #[test]
    fn test_pool_advances_progress_bar() {
        let fetcher = ScriptedFetcher::failing(&["org/m1"]);
        let jobs: Vec<(Identifier, FetchRequest)> = (0..3)
            .map(|i| {
                let id = Identifier::new(format!("org/m{}", i));
                let request = FetchRequest::for_identifier(&id, std::path::Path::new("/unused"), None, false);
                (id, request)
            })
            .collect();
        let bar = ProgressBar::hidden();
        run_pool(&jobs, 2, &fetcher, &MemoryNotifier::new(), &bar);
        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 3);
        assert!(bar.is_finished());
    }

    #[test]
    fn test_success_ledger_written_when_failure_ledger_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        // a directory where the failure file belongs makes the overwrite fail
        fs::create_dir_all(ledger.failure_path()).unwrap();

        let fetcher = Arc::new(ScriptedFetcher::failing(&["org/b"]));
        let c = coordinator(page(&["org/a", "org/b"]), fetcher, Arc::new(MemoryNotifier::new()));
        assert!(c.run(&options(dir.path())).is_err());
        assert_eq!(fs::read_to_string(ledger.success_path()).unwrap(), "org/a\n");
    }

    #[test]
    fn test_zero_workers_still_runs() {
        let fetcher = ScriptedFetcher::default();
        let id = Identifier::from("org/only");
        let jobs = vec![(id.clone(), FetchRequest::for_identifier(&id, std::path::Path::new("/unused"), None, false))];
        let outcomes = run_pool(&jobs, 0, &fetcher, &MemoryNotifier::new(), &ProgressBar::hidden());
        assert_eq!(outcomes, vec![Outcome { id, success: true }]);
    }

    #[test]
    fn test_invalid_url_aborts_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let c = coordinator(page(&["org/a"]), fetcher.clone(), Arc::new(MemoryNotifier::new()));
        let mut opts = options(&output_dir);
        opts.page_url = "https://huggingface.co".to_string();

        let err = c.run(&opts).expect_err("missing path should be rejected");
        assert!(matches!(err.downcast_ref::<CollectionError>(), Some(CollectionError::InvalidInput(_))));
        assert!(fetcher.seen().is_empty());
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_empty_work_list_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        let c = coordinator(page(&[]), Arc::new(ScriptedFetcher::default()), Arc::new(MemoryNotifier::new()));
        assert_eq!(c.run(&options(&output_dir)).unwrap(), FetchSummary::default());
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_plan_work() {
        let succeeded: BTreeSet<Identifier> = ids(&["a/1"]).into_iter().collect();
        let failed: BTreeSet<Identifier> = ids(&["a/2", "a/9"]).into_iter().collect();
        let candidates = ids(&["a/1", "a/2", "a/3"]);

        assert_eq!(plan_work(candidates.clone(), &succeeded, &failed, false), ids(&["a/2", "a/3"]));
        assert_eq!(plan_work(candidates, &succeeded, &failed, true), ids(&["a/2", "a/3", "a/9"]));
    }
}
