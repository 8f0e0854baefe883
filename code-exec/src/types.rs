use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::{error::Error, limits::LimitOverrides, validator::ValidationVerdict, Result};

/// Script execution request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Python source to run
    pub code: String,
    /// Optional (input, expected output) pairs; each runs in a fresh unit
    #[serde(default, alias = "testCases")]
    pub test_cases: Vec<TestCase>,
    /// Limit overrides, clamped to the configured ceilings
    #[serde(flatten)]
    pub limits: LimitOverrides,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = test_cases;
        self
    }

    pub fn with_limits(mut self, limits: LimitOverrides) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Fed to the unit's stdin
    pub input: String,
    #[serde(alias = "expectedOutput")]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }

    /// Outputs are compared with surrounding whitespace removed.
    pub fn matches(&self, actual: &str) -> bool {
        actual.trim() == self.expected_output.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub index: usize,
    pub input: String,
    pub expected_output: String,
    /// `None` when the case was skipped
    pub actual_output: Option<String>,
    pub passed: bool,
    /// `None` when the case was skipped after an earlier case hit a limit
    pub status: Option<ExecutionStatus>,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    /// Top-level variables the script left behind for this input
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub success_rate: f64,
    pub all_passed: bool,
}

impl TestSummary {
    pub fn from_results(results: &[TestCaseResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            success_rate,
            all_passed: total > 0 && passed == total,
        }
    }
}

/// Terminal status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Rejected,
    TimedOut,
    ResourceExceeded,
    Crashed,
    InternalError,
}

impl ExecutionStatus {
    /// Statuses after which remaining test cases are not run.
    pub fn stops_test_run(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::TimedOut | ExecutionStatus::ResourceExceeded | ExecutionStatus::InternalError
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Rejected => "rejected",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::ResourceExceeded => "resource_exceeded",
            ExecutionStatus::Crashed => "crashed",
            ExecutionStatus::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

/// Which limit fired during an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFlag {
    WallClockTimeout,
    /// SIGTERM was ignored and the unit had to be SIGKILLed
    ForcedKill,
    MemoryLimit,
    CpuLimit,
    OutputLimit,
    FileWriteBlocked,
}

/// How the harness ran a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The whole script was a single expression; its value is the result
    Expression,
    Statement,
}

/// What the guest harness reports after a script finishes without error.
///
/// Values are JSON renderings of the script's objects. Anything without a
/// natural JSON form arrives as a truncated `repr` string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestReport {
    pub execution_type: Option<ExecutionMode>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Some variables were left out to keep the report small
    #[serde(default)]
    pub variables_truncated: bool,
}

/// Terminal record of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<TestSummary>,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    pub safety_flags: BTreeSet<SafetyFlag>,
    pub verdict: ValidationVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<ExecutionMode>,
    /// Value of the script when it was a single expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

impl ExecutionResult {
    pub fn rejected(verdict: ValidationVerdict) -> Self {
        let stderr = verdict.to_string();
        Self {
            status: ExecutionStatus::Rejected,
            stdout: String::new(),
            stderr,
            exit_code: None,
            test_results: Vec::new(),
            summary: None,
            elapsed: Duration::ZERO,
            safety_flags: BTreeSet::new(),
            verdict,
            execution_type: None,
            result: None,
            variables: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
            && self.summary.map_or(true, |s| s.all_passed)
    }
}

/// Lifecycle of one execution.
///
/// ```text
/// Pending -> Validating -> Rejected -> Reported
///                       -> Spawning -> Running -> {Completed | TimedOut | Killed | Crashed} -> Reported
/// Spawning | Running -> InternalError -> Reported
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Pending,
    Validating,
    Rejected,
    Spawning,
    Running,
    Completed,
    TimedOut,
    Killed,
    Crashed,
    InternalError,
    Reported,
}

impl ExecutionPhase {
    pub fn can_transition_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rejected)
                | (Validating, Spawning)
                | (Spawning, Running)
                | (Spawning, InternalError)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Killed)
                | (Running, Crashed)
                | (Running, InternalError)
                | (Rejected, Reported)
                | (Completed, Reported)
                | (TimedOut, Reported)
                | (Killed, Reported)
                | (Crashed, Reported)
                | (InternalError, Reported)
        )
    }

    pub fn transition(self, next: ExecutionPhase) -> Result<ExecutionPhase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::System(format!(
                "Invalid execution phase transition {:?} -> {:?}",
                self, next
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutionPhase::Reported
    }

    /// Phase that records a finished unit with the given status.
    pub fn for_status(status: ExecutionStatus) -> ExecutionPhase {
        match status {
            ExecutionStatus::Completed => ExecutionPhase::Completed,
            ExecutionStatus::Rejected => ExecutionPhase::Rejected,
            ExecutionStatus::TimedOut => ExecutionPhase::TimedOut,
            ExecutionStatus::ResourceExceeded => ExecutionPhase::Killed,
            ExecutionStatus::Crashed => ExecutionPhase::Crashed,
            ExecutionStatus::InternalError => ExecutionPhase::InternalError,
        }
    }
}

/// Durations are carried as whole milliseconds on the wire.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_happy_path() {
        let phase = ExecutionPhase::Pending
            .transition(ExecutionPhase::Validating)
            .and_then(|p| p.transition(ExecutionPhase::Spawning))
            .and_then(|p| p.transition(ExecutionPhase::Running))
            .and_then(|p| p.transition(ExecutionPhase::TimedOut))
            .and_then(|p| p.transition(ExecutionPhase::Reported))
            .unwrap();
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_phase_rejects_skipping_states() {
        assert!(ExecutionPhase::Pending
            .transition(ExecutionPhase::Running)
            .is_err());
        assert!(ExecutionPhase::Validating
            .transition(ExecutionPhase::Completed)
            .is_err());
        assert!(ExecutionPhase::Rejected
            .transition(ExecutionPhase::Spawning)
            .is_err());
        assert!(!ExecutionPhase::Reported.can_transition_to(ExecutionPhase::Pending));
    }

    #[test]
    fn test_every_unit_status_reaches_reported() {
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::TimedOut,
            ExecutionStatus::ResourceExceeded,
            ExecutionStatus::Crashed,
            ExecutionStatus::InternalError,
        ] {
            let phase = ExecutionPhase::for_status(status);
            assert!(ExecutionPhase::Running.can_transition_to(phase), "{status}");
            assert!(phase.can_transition_to(ExecutionPhase::Reported), "{status}");
        }
    }

    #[test]
    fn test_summary() {
        let case = |passed| TestCaseResult {
            index: 0,
            input: String::new(),
            expected_output: String::new(),
            actual_output: Some(String::new()),
            passed,
            status: Some(ExecutionStatus::Completed),
            elapsed: Duration::ZERO,
            variables: BTreeMap::new(),
        };
        let summary = TestSummary::from_results(&[case(true), case(false), case(true), case(true)]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.success_rate, 0.75);
        assert!(!summary.all_passed);

        assert!(!TestSummary::from_results(&[]).all_passed);
    }

    #[test]
    fn test_output_comparison_trims_whitespace() {
        let case = TestCase::new("", "42");
        assert!(case.matches("42\n"));
        assert!(case.matches("  42  "));
        assert!(!case.matches("4 2"));
    }

    #[test]
    fn test_request_deserializes_flat_limits() {
        let request: ExecutionRequest = serde_json::from_str(
            r#"{"code": "print(1)", "timeout_seconds": 2.5, "memory_mb": 64}"#,
        )
        .unwrap();
        assert_eq!(request.limits.timeout_seconds, Some(2.5));
        assert_eq!(request.limits.memory_mb, Some(64));
        assert!(request.test_cases.is_empty());
    }

    #[test]
    fn test_result_serializes_elapsed_in_millis() {
        let mut result = ExecutionResult::rejected(ValidationVerdict::Safe);
        result.elapsed = Duration::from_millis(1_250);
        result.safety_flags.insert(SafetyFlag::WallClockTimeout);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed"], 1250);
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["safety_flags"][0], "wall_clock_timeout");
        assert!(json.get("summary").is_none());
        assert!(json.get("result").is_none());
        assert!(json.get("variables").is_none());
    }

    #[test]
    fn test_guest_report_defaults() {
        let report: GuestReport =
            serde_json::from_str(r#"{"execution_type": "statement", "result": null}"#).unwrap();
        assert_eq!(report.execution_type, Some(ExecutionMode::Statement));
        assert_eq!(report.result, None);
        assert!(report.variables.is_empty());
        assert!(!report.variables_truncated);
    }
}
