//! Named scenarios, their checks, and the run-level tally.

use futures::FutureExt;
use std::any::Any;
use std::fmt::{self, Write as _};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::ScenarioError;

pub const EXIT_FAILED: u8 = 1;
pub const EXIT_FATAL: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScenarioStatus {
    #[default]
    NotStarted,
    Running,
    Passed,
    Failed,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScenarioStatus::NotStarted => "not started",
            ScenarioStatus::Running => "running",
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of a single assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub description: String,
    pub passed: bool,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl CheckResult {
    pub fn pass(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            passed: true,
            expected: None,
            actual: None,
        }
    }

    pub fn fail(description: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(description)
        }
    }

    /// Passes iff `expected == actual`; both values are kept for the report.
    pub fn equal<T>(description: impl Into<String>, expected: T, actual: T) -> Self
    where
        T: PartialEq + fmt::Debug,
    {
        Self {
            description: description.into(),
            passed: expected == actual,
            expected: Some(format!("{expected:?}")),
            actual: Some(format!("{actual:?}")),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)?;
        match (&self.expected, &self.actual) {
            (Some(expected), Some(actual)) => write!(f, ": expected {expected}, got {actual}"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct Scenario {
    name: String,
    status: ScenarioStatus,
    checks: Vec<CheckResult>,
    faults: Vec<String>,
    started: Instant,
}

impl Scenario {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ScenarioStatus::NotStarted,
            checks: Vec::new(),
            faults: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ScenarioStatus {
        self.status
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn faults(&self) -> &[String] {
        &self.faults
    }

    pub fn check(&mut self, description: impl Into<String>, condition: bool) -> bool {
        let result = if condition {
            CheckResult::pass(description)
        } else {
            CheckResult::fail(description)
        };
        self.record(result)
    }

    pub fn check_equal<T>(&mut self, description: impl Into<String>, expected: T, actual: T) -> bool
    where
        T: PartialEq + fmt::Debug,
    {
        self.record(CheckResult::equal(description, expected, actual))
    }

    /// Appends a check and returns whether it passed.
    pub fn record(&mut self, result: CheckResult) -> bool {
        if !result.passed {
            warn!(target: "harness::scenario", scenario = %self.name, check = %result, "check failed");
        }
        let passed = result.passed;
        self.checks.push(result);
        passed
    }

    pub fn record_all(&mut self, results: impl IntoIterator<Item = CheckResult>) {
        for result in results {
            self.record(result);
        }
    }

    /// Records an error or panic that cut the scenario short.
    pub fn fault(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "harness::scenario", scenario = %self.name, fault = %message, "scenario fault");
        self.faults.push(message);
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|check| !check.passed)
    }

    fn outcome(&self) -> ScenarioStatus {
        if self.faults.is_empty() && self.checks.iter().all(|check| check.passed) {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        }
    }
}

/// What remains of a finished scenario for the final report.
#[derive(Debug, Clone)]
pub struct ScenarioRecord {
    pub name: String,
    pub status: ScenarioStatus,
    pub checks_run: usize,
    pub failed_checks: Vec<CheckResult>,
    pub faults: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scenarios_run: usize,
    pub scenarios_failed: usize,
    pub checks_run: usize,
    pub checks_failed: usize,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.scenarios_failed == 0
    }

    pub fn exit_status(&self) -> u8 {
        if self.passed() {
            0
        } else {
            EXIT_FAILED
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

#[derive(Debug, Default)]
pub struct ScenarioRunner {
    records: Vec<ScenarioRecord>,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, name: impl Into<String>) -> Scenario {
        let mut scenario = Scenario::new(name);
        scenario.status = ScenarioStatus::Running;
        info!(target: "harness::scenario", scenario = %scenario.name, "scenario started");
        scenario
    }

    /// Closes a scenario, folding its checks into the run counters.
    pub fn finish(&mut self, mut scenario: Scenario) -> ScenarioStatus {
        scenario.status = scenario.outcome();
        let failed_checks: Vec<CheckResult> = scenario.failed_checks().cloned().collect();
        let elapsed = scenario.started.elapsed();
        info!(
            target: "harness::scenario",
            scenario = %scenario.name,
            status = %scenario.status,
            checks = scenario.checks.len(),
            failed = failed_checks.len(),
            faults = scenario.faults.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scenario finished"
        );
        let status = scenario.status;
        self.records.push(ScenarioRecord {
            name: scenario.name,
            status,
            checks_run: scenario.checks.len(),
            failed_checks,
            faults: scenario.faults,
            elapsed,
        });
        status
    }

    pub fn records(&self) -> &[ScenarioRecord] {
        &self.records
    }

    pub fn summary(&self) -> RunSummary {
        self.records
            .iter()
            .fold(RunSummary::default(), |mut summary, record| {
                summary.scenarios_run += 1;
                summary.checks_run += record.checks_run;
                summary.checks_failed += record.failed_checks.len();
                if record.status == ScenarioStatus::Failed {
                    summary.scenarios_failed += 1;
                }
                summary
            })
    }

    /// Lists every failed check and fault, followed by the totals.
    pub fn render_results(&self) -> String {
        let mut out = String::new();
        for record in self.records.iter().filter(|r| r.status == ScenarioStatus::Failed) {
            let _ = writeln!(out, "___");
            let _ = writeln!(out, "FAILED: {}", record.name);
            for check in &record.failed_checks {
                let _ = writeln!(out, "    check failed: {check}");
            }
            for fault in &record.faults {
                let _ = writeln!(out, "    fault: {fault}");
            }
        }
        let summary = self.summary();
        let _ = writeln!(out, "___");
        let _ = write!(
            out,
            "{} scenarios ran, {} failed; {} checks ran, {} failed",
            summary.scenarios_run, summary.scenarios_failed, summary.checks_run, summary.checks_failed
        );
        out
    }

    pub fn print_results(&self) -> RunSummary {
        println!("{}", self.render_results());
        self.summary()
    }
}

/// Drives a scenario body to completion, turning an error or a panic into a
/// fault message instead of letting it escape.
pub async fn guarded<F>(body: F) -> Result<(), String>
where
    F: Future<Output = Result<(), ScenarioError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(format!("panic: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
