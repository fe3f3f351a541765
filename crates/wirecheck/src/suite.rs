//! Test-case and test-group scaffolding, plus the runner that walks a
//! catalog against one server.
//!
//! A test case is a value: a description, the requirement text it encodes,
//! and a closure `(config, connection) -> outcome`. Groups nest; the
//! runner opens a fresh connection per case, so no state survives from one
//! case to the next.

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::LocalBoxFuture;
use tracing::debug;

use crate::verify::TestError;
use crate::{transport, Config, Conn};

/// A boxed test body. The future is local: tests run one at a time on one
/// thread.
pub type RunFn =
    Box<dyn Fn(Arc<Config>, Conn) -> LocalBoxFuture<'static, Result<(), TestError>>>;

pub struct TestCase {
    pub desc: &'static str,
    pub requirement: &'static str,
    /// where the case is defined, for failure output
    pub origin: &'static Location<'static>,
    pub run: RunFn,
}

impl TestCase {
    #[track_caller]
    pub fn new<F, Fut>(desc: &'static str, requirement: &'static str, f: F) -> Self
    where
        F: Fn(Arc<Config>, Conn) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        Self {
            desc,
            requirement,
            origin: Location::caller(),
            run: Box::new(move |config, conn| Box::pin(f(config, conn))),
        }
    }
}

/// A named, hierarchical container of test cases.
pub struct TestGroup {
    /// section key, e.g. "6.7" (or "http2" for a root group)
    pub section: String,
    /// human title, e.g. "PING"
    pub title: String,
    pub groups: Vec<TestGroup>,
    pub tests: Vec<TestCase>,
}

impl TestGroup {
    pub fn new(section: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            title: title.into(),
            groups: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn add_group(&mut self, group: TestGroup) {
        self.groups.push(group);
    }

    pub fn add_test_case(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    /// Number of test cases in this group and all its children.
    pub fn len(&self) -> usize {
        self.tests.len() + self.groups.iter().map(TestGroup::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Error,
}

/// Everything reporting needs to know about one finished case.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// full section path, e.g. "http2/6.7/1"
    pub path: String,
    pub desc: String,
    pub requirement: String,
    pub outcome: Outcome,
    pub expected: Vec<String>,
    pub actual: Option<String>,
    pub origin: String,
    pub duration: Duration,
}

/// Roll-up of a whole run.
#[derive(Debug, Default)]
pub struct Report {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl Report {
    fn record(&mut self, result: TestResult) {
        match result.outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Skip => self.skipped += 1,
            Outcome::Error => self.errored += 1,
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// The run succeeded iff nothing failed or errored.
    pub fn ok(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Fail | Outcome::Error))
    }

    /// Roll-up counters for one group, addressed by its path prefix
    /// (e.g. "http2/6.7").
    pub fn tally_under(&self, path_prefix: &str) -> Tally {
        let mut tally = Tally::default();
        for result in &self.results {
            match result.path.strip_prefix(path_prefix) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => {}
                _ => continue,
            }
            match result.outcome {
                Outcome::Pass => tally.passed += 1,
                Outcome::Fail => tally.failed += 1,
                Outcome::Skip => tally.skipped += 1,
                Outcome::Error => tally.errored += 1,
            }
        }
        tally
    }
}

/// Per-group outcome counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Receives progress callbacks while a run unfolds. Reporters live outside
/// the core; this is the seam they plug into.
pub trait RunObserver {
    fn group_started(&mut self, _depth: usize, _section: &str, _title: &str) {}
    fn case_finished(&mut self, _depth: usize, _result: &TestResult) {}
}

/// An observer that ignores everything.
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Walks groups depth-first, opening one fresh connection per test case.
pub struct Runner {
    config: Arc<Config>,
    filter: Option<String>,
}

impl Runner {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Only run cases whose path or description contains the needle.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub async fn run(&self, groups: &[TestGroup], observer: &mut dyn RunObserver) -> Report {
        let mut report = Report::default();
        for group in groups {
            self.run_group(group, &group.section, 0, &mut report, &mut *observer)
                .await;
        }
        report
    }

    /// Section strings are fully dotted ("6.9.2"), so a case path is just
    /// `root key / leaf section / case number`.
    fn run_group<'a>(
        &'a self,
        group: &'a TestGroup,
        path: &'a str,
        depth: usize,
        report: &'a mut Report,
        observer: &'a mut dyn RunObserver,
    ) -> LocalBoxFuture<'a, ()> {
        Box::pin(async move {
            observer.group_started(depth, &group.section, &group.title);

            for (index, test) in group.tests.iter().enumerate() {
                let case_path = format!("{path}/{}", index + 1);
                if let Some(filter) = &self.filter {
                    if !case_path.contains(filter.as_str()) && !test.desc.contains(filter.as_str())
                    {
                        continue;
                    }
                }
                let result = self.run_case(test, case_path).await;
                observer.case_finished(depth, &result);
                report.record(result);
            }

            let root = path.split('/').next().unwrap_or(path);
            for child in &group.groups {
                let child_path = format!("{root}/{}", child.section);
                self.run_group(child, &child_path, depth + 1, &mut *report, &mut *observer)
                    .await;
            }
        })
    }

    async fn run_case(&self, test: &TestCase, path: String) -> TestResult {
        let origin = format!("{}:{}", test.origin.file(), test.origin.line());
        let mut result = TestResult {
            path,
            desc: test.desc.to_string(),
            requirement: test.requirement.to_string(),
            outcome: Outcome::Skip,
            expected: Vec::new(),
            actual: None,
            origin,
            duration: Duration::ZERO,
        };

        if self.config.dry_run {
            return result;
        }

        let start = Instant::now();
        let outcome = self.connect_and_run(test).await;
        result.duration = start.elapsed();

        match outcome {
            Ok(()) => result.outcome = Outcome::Pass,
            Err(TestError::Skipped) => result.outcome = Outcome::Skip,
            Err(TestError::Mismatch { expected, actual }) => {
                result.outcome = Outcome::Fail;
                result.expected = expected;
                result.actual = Some(actual);
            }
            Err(TestError::Other(report)) => {
                result.outcome = Outcome::Error;
                result.actual = Some(report.to_string());
            }
        }
        result
    }

    async fn connect_and_run(&self, test: &TestCase) -> Result<(), TestError> {
        let io = transport::connect(&self.config).await?;
        let conn = Conn::new(self.config.clone(), io);
        debug!(desc = %test.desc, "running test case");

        // a whole case gets a few event timeouts' worth of wall clock; a
        // body stuck past that is an error, not a hang
        let budget = self.config.timeout.saturating_mul(5);
        match tokio::time::timeout(budget, (test.run)(self.config.clone(), conn)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TestError::Other(eyre::eyre!(
                "test case did not finish within {budget:?}"
            ))),
        }
    }
}
