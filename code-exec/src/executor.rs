use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, warn};

use crate::{
    error::Error,
    languages::PythonExecutor,
    limits::ResourceLimits,
    sandbox::{RunOutcome, Sandbox, StopCause},
    types::{
        ExecutionResult, ExecutionStatus, GuestReport, SafetyFlag, TestCase, TestCaseResult,
        TestSummary,
    },
    validator::ValidationVerdict,
    watchdog::Termination,
    Result,
};

/// Trait for guest language runtimes
#[async_trait]
pub trait LanguageExecutor: Send + Sync {
    /// Get the file extension for source files
    fn file_extension(&self) -> &str;

    /// Absolute path of the interpreter to spawn
    fn interpreter(&self) -> Result<PathBuf>;

    /// Arguments passed to the interpreter for `source_file`
    fn run_args(&self, source_file: &Path) -> Vec<String>;

    /// Write the guest source into the sandbox and describe how to start it
    async fn prepare(&self, sandbox: &Sandbox, code: &str) -> Result<LaunchPlan> {
        let name = format!("source.{}", self.file_extension());
        let source_file = sandbox.write_file(&name, code).await?;
        Ok(LaunchPlan {
            args: self.run_args(&source_file),
            report_marker: None,
        })
    }

    /// Limit that explains a non-zero exit, judged from the guest's stderr
    fn limit_from_stderr(&self, _stderr: &str) -> Option<SafetyFlag> {
        None
    }
}

/// How to start the interpreter for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub args: Vec<String>,
    /// Line prefix of the JSON report the runtime appends to stdout
    pub report_marker: Option<String>,
}

/// What one unit run produced.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub status: ExecutionStatus,
    /// Guest stdout with the harness report removed
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub flags: BTreeSet<SafetyFlag>,
    pub report: GuestReport,
}

impl UnitReport {
    fn internal(error: Error) -> Self {
        error!("Sandbox infrastructure failure: {}", error);
        Self {
            status: ExecutionStatus::InternalError,
            stdout: String::new(),
            stderr: "internal error: the execution unit could not be run".to_string(),
            exit_code: None,
            elapsed: Duration::ZERO,
            flags: BTreeSet::new(),
            report: GuestReport::default(),
        }
    }
}

/// Runs validated code in fresh sandboxes and maps how each unit ended to a status.
pub struct CodeExecutor {
    language: Box<dyn LanguageExecutor>,
}

impl CodeExecutor {
    pub fn new(interpreter: &str) -> Self {
        Self::with_language(Box::new(PythonExecutor::new(interpreter)))
    }

    pub fn with_language(language: Box<dyn LanguageExecutor>) -> Self {
        Self { language }
    }

    /// Run `code` once, or once per test case, each in its own unit.
    ///
    /// After a case ends in a status that [`ExecutionStatus::stops_test_run`],
    /// the remaining cases are reported as skipped.
    pub async fn execute(
        &self,
        code: &str,
        test_cases: &[TestCase],
        limits: &ResourceLimits,
        verdict: ValidationVerdict,
    ) -> ExecutionResult {
        if test_cases.is_empty() {
            let report = self.run_unit(code, "", limits).await;
            return ExecutionResult {
                status: report.status,
                stdout: report.stdout,
                stderr: report.stderr,
                exit_code: report.exit_code,
                test_results: Vec::new(),
                summary: None,
                elapsed: report.elapsed,
                safety_flags: report.flags,
                verdict,
                execution_type: report.report.execution_type,
                result: report.report.result,
                variables: report.report.variables,
            };
        }

        let mut status = ExecutionStatus::Completed;
        let mut last: Option<UnitReport> = None;
        let mut flags = BTreeSet::new();
        let mut elapsed = Duration::ZERO;
        let mut results = Vec::with_capacity(test_cases.len());

        for (index, case) in test_cases.iter().enumerate() {
            if status.stops_test_run() {
                results.push(TestCaseResult {
                    index,
                    input: case.input.clone(),
                    expected_output: case.expected_output.clone(),
                    actual_output: None,
                    passed: false,
                    status: None,
                    elapsed: Duration::ZERO,
                    variables: BTreeMap::new(),
                });
                continue;
            }

            let report = self.run_unit(code, &case.input, limits).await;
            let passed = report.status == ExecutionStatus::Completed && case.matches(&report.stdout);
            debug!(
                "Test case {} finished with {} (passed: {})",
                index, report.status, passed
            );

            if status == ExecutionStatus::Completed {
                status = report.status;
            }
            flags.extend(report.flags.iter().copied());
            elapsed += report.elapsed;
            results.push(TestCaseResult {
                index,
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: Some(report.stdout.clone()),
                passed,
                status: Some(report.status),
                elapsed: report.elapsed,
                variables: report.report.variables.clone(),
            });
            last = Some(report);
        }

        let summary = TestSummary::from_results(&results);
        let (stdout, stderr, exit_code, guest) = last
            .map(|r| (r.stdout, r.stderr, r.exit_code, r.report))
            .unwrap_or_default();

        ExecutionResult {
            status,
            stdout,
            stderr,
            exit_code,
            test_results: results,
            summary: Some(summary),
            elapsed,
            safety_flags: flags,
            verdict,
            execution_type: guest.execution_type,
            result: guest.result,
            variables: guest.variables,
        }
    }

    /// One fresh unit: create the sandbox, write the source, run, classify.
    pub async fn run_unit(&self, code: &str, input: &str, limits: &ResourceLimits) -> UnitReport {
        match self.try_run_unit(code, input, limits).await {
            Ok((outcome, marker)) => self.classify(&outcome, marker.as_deref(), limits),
            Err(e) => UnitReport::internal(e),
        }
    }

    async fn try_run_unit(
        &self,
        code: &str,
        input: &str,
        limits: &ResourceLimits,
    ) -> Result<(RunOutcome, Option<String>)> {
        let interpreter = self.language.interpreter()?;
        let sandbox = Sandbox::new(*limits)?;
        let plan = self.language.prepare(&sandbox, code).await?;
        let outcome = sandbox.run(&interpreter, &plan.args, input).await?;
        Ok((outcome, plan.report_marker))
    }

    /// Map how the unit ended to a terminal status plus the limits that fired.
    ///
    /// `marker` is the prefix of the runtime's report on stdout, if it writes one.
    pub fn classify(
        &self,
        outcome: &RunOutcome,
        marker: Option<&str>,
        limits: &ResourceLimits,
    ) -> UnitReport {
        let (stdout, report) = match marker {
            Some(marker) => split_report(outcome.stdout.to_string_lossy(), marker),
            None => (outcome.stdout.to_string_lossy(), None),
        };
        let stderr = outcome.stderr.to_string_lossy();
        let mut flags = BTreeSet::new();

        if outcome.termination == Some(Termination::Forced) {
            flags.insert(SafetyFlag::ForcedKill);
        }
        if outcome.output_truncated() {
            flags.insert(SafetyFlag::OutputLimit);
        }

        let status = match outcome.stop {
            StopCause::Deadline => {
                flags.insert(SafetyFlag::WallClockTimeout);
                ExecutionStatus::TimedOut
            }
            StopCause::OutputOverflow => ExecutionStatus::ResourceExceeded,
            StopCause::Exited if outcome.output_truncated() => ExecutionStatus::ResourceExceeded,
            StopCause::Exited => match (outcome.exit_code(), outcome.signal()) {
                (Some(0), _) => ExecutionStatus::Completed,
                (Some(_), _) => match self.language.limit_from_stderr(&stderr) {
                    Some(flag) => {
                        flags.insert(flag);
                        ExecutionStatus::ResourceExceeded
                    }
                    None => ExecutionStatus::Crashed,
                },
                (None, Some(signal)) => match signal_limit(signal, outcome.elapsed, limits) {
                    Some(flag) => {
                        flags.insert(flag);
                        ExecutionStatus::ResourceExceeded
                    }
                    None => ExecutionStatus::Crashed,
                },
                (None, None) => ExecutionStatus::Crashed,
            },
        };

        UnitReport {
            status,
            stdout,
            stderr,
            exit_code: outcome.exit_code(),
            elapsed: outcome.elapsed,
            flags,
            report: report.unwrap_or_default(),
        }
    }
}

/// Cuts the harness report off the end of `stdout`.
///
/// The harness writes a newline, the marker and one line of JSON, so the
/// newline before the marker belongs to the report and not to the guest.
fn split_report(mut stdout: String, marker: &str) -> (String, Option<GuestReport>) {
    let Some(at) = stdout.rfind(marker) else {
        return (stdout, None);
    };
    let report = match serde_json::from_str(stdout[at + marker.len()..].trim_end()) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("Discarding unreadable execution report: {}", e);
            None
        }
    };
    stdout.truncate(at);
    if stdout.ends_with('\n') {
        stdout.pop();
    }
    (stdout, report)
}

/// Limit implied by a signal the watchdog did not send.
fn signal_limit(signal: i32, elapsed: Duration, limits: &ResourceLimits) -> Option<SafetyFlag> {
    match Signal::try_from(signal).ok()? {
        Signal::SIGXCPU => Some(SafetyFlag::CpuLimit),
        Signal::SIGXFSZ => Some(SafetyFlag::FileWriteBlocked),
        // SIGKILL comes from the CPU hard limit or the OOM killer.
        Signal::SIGKILL if elapsed.as_secs() >= limits.cpu_seconds => Some(SafetyFlag::CpuLimit),
        Signal::SIGKILL => Some(SafetyFlag::MemoryLimit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::limits::ResourceLimiter;
    use crate::types::ExecutionMode;
    use crate::watchdog::CappedOutput;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn limits() -> ResourceLimits {
        ResourceLimiter::new(&ExecutionConfig::default()).defaults()
    }

    fn outcome(status: ExitStatus, stop: StopCause, stderr: &str) -> RunOutcome {
        RunOutcome {
            status,
            stdout: CappedOutput::default(),
            stderr: CappedOutput {
                bytes: stderr.as_bytes().to_vec(),
                truncated: false,
            },
            stop,
            termination: None,
            elapsed: Duration::from_millis(10),
        }
    }

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn signalled(signal: Signal) -> ExitStatus {
        ExitStatus::from_raw(signal as i32)
    }

    fn classify(outcome: RunOutcome) -> UnitReport {
        CodeExecutor::new("python3").classify(&outcome, None, &limits())
    }

    const MARKER: &str = "@@report-1234@@";

    fn with_stdout(stdout: &str) -> RunOutcome {
        let mut run = outcome(exited(0), StopCause::Exited, "");
        run.stdout.bytes = stdout.as_bytes().to_vec();
        run
    }

    #[test]
    fn test_clean_exit_is_completed() {
        let report = classify(outcome(exited(0), StopCause::Exited, ""));
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.flags.is_empty());
    }

    #[test]
    fn test_exception_is_crashed() {
        let report = classify(outcome(
            exited(1),
            StopCause::Exited,
            "Traceback (most recent call last):\nZeroDivisionError: division by zero\n",
        ));
        assert_eq!(report.status, ExecutionStatus::Crashed);
        assert!(report.stderr.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_memory_error_is_resource_exceeded() {
        let report = classify(outcome(exited(1), StopCause::Exited, "MemoryError\n"));
        assert_eq!(report.status, ExecutionStatus::ResourceExceeded);
        assert!(report.flags.contains(&SafetyFlag::MemoryLimit));
    }

    #[test]
    fn test_signals_map_to_limits() {
        let report = classify(outcome(signalled(Signal::SIGXCPU), StopCause::Exited, ""));
        assert!(report.flags.contains(&SafetyFlag::CpuLimit));

        let report = classify(outcome(signalled(Signal::SIGXFSZ), StopCause::Exited, ""));
        assert!(report.flags.contains(&SafetyFlag::FileWriteBlocked));

        let report = classify(outcome(signalled(Signal::SIGKILL), StopCause::Exited, ""));
        assert_eq!(report.status, ExecutionStatus::ResourceExceeded);
        assert!(report.flags.contains(&SafetyFlag::MemoryLimit));

        let report = classify(outcome(signalled(Signal::SIGABRT), StopCause::Exited, ""));
        assert_eq!(report.status, ExecutionStatus::Crashed);
    }

    #[test]
    fn test_deadline_is_timed_out() {
        let mut run = outcome(signalled(Signal::SIGKILL), StopCause::Deadline, "");
        run.termination = Some(Termination::Forced);
        let report = classify(run);
        assert_eq!(report.status, ExecutionStatus::TimedOut);
        assert!(report.flags.contains(&SafetyFlag::WallClockTimeout));
        assert!(report.flags.contains(&SafetyFlag::ForcedKill));
    }

    #[test]
    fn test_output_overflow() {
        let mut run = outcome(signalled(Signal::SIGTERM), StopCause::OutputOverflow, "");
        run.stdout.truncated = true;
        run.termination = Some(Termination::Graceful);
        let report = classify(run);
        assert_eq!(report.status, ExecutionStatus::ResourceExceeded);
        assert!(report.flags.contains(&SafetyFlag::OutputLimit));
        assert!(!report.flags.contains(&SafetyFlag::ForcedKill));
    }

    #[test]
    fn test_report_is_split_from_stdout() {
        let run = with_stdout(&format!(
            "14\n\n{}{{\"execution_type\": \"statement\", \"result\": null, \"variables\": {{\"n\": 14}}}}\n",
            MARKER
        ));
        let report = CodeExecutor::new("python3").classify(&run, Some(MARKER), &limits());
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.stdout, "14\n");
        assert_eq!(report.report.execution_type, Some(ExecutionMode::Statement));
        assert_eq!(report.report.variables.get("n"), Some(&serde_json::json!(14)));
    }

    #[test]
    fn test_report_without_guest_output() {
        let run = with_stdout(&format!(
            "\n{}{{\"execution_type\": \"expression\", \"result\": 14}}\n",
            MARKER
        ));
        let report = CodeExecutor::new("python3").classify(&run, Some(MARKER), &limits());
        assert_eq!(report.stdout, "");
        assert_eq!(report.report.result, Some(serde_json::json!(14)));
    }

    #[test]
    fn test_missing_or_broken_report() {
        let executor = CodeExecutor::new("python3");

        // Crashed before the harness could report
        let report = executor.classify(&with_stdout("partial"), Some(MARKER), &limits());
        assert_eq!(report.stdout, "partial");
        assert_eq!(report.report, GuestReport::default());

        let run = with_stdout(&format!("out\n\n{}{{not json", MARKER));
        let report = executor.classify(&run, Some(MARKER), &limits());
        assert_eq!(report.stdout, "out\n");
        assert_eq!(report.report.execution_type, None);
    }
}
