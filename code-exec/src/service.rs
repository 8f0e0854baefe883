use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::SandboxConfig,
    error::Error,
    executor::CodeExecutor,
    languages::check_command,
    limits::{LimitOverrides, ResourceLimiter},
    types::{ExecutionPhase, ExecutionRequest, ExecutionResult, ExecutionStatus, TestCase},
    validator::{ValidationVerdict, Validator},
    Result,
};

/// Admission-controlled front door for script execution.
///
/// Validation runs before a permit is requested, so rejected input never
/// occupies a sandbox slot. At most `max_concurrent` units run at once.
#[derive(Clone)]
pub struct CodeExecutionService {
    executor: Arc<CodeExecutor>,
    validator: Arc<Validator>,
    limiter: ResourceLimiter,
    semaphore: Arc<Semaphore>,
    interpreter: String,
}

impl CodeExecutionService {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let validator = Validator::new(&config.validator)?;
        Ok(Self::with_validator(config, Arc::new(validator)))
    }

    /// Share an existing validator, e.g. with a calculator built from the same config.
    pub fn with_validator(config: &SandboxConfig, validator: Arc<Validator>) -> Self {
        let execution = &config.execution;
        Self {
            executor: Arc::new(CodeExecutor::new(&execution.interpreter)),
            validator,
            limiter: ResourceLimiter::new(execution),
            semaphore: Arc::new(Semaphore::new(execution.max_concurrent)),
            interpreter: execution.interpreter.clone(),
        }
    }

    pub fn validate(&self, code: &str) -> ValidationVerdict {
        self.validator.validate(code)
    }

    pub fn limiter(&self) -> &ResourceLimiter {
        &self.limiter
    }

    /// Validate, then run in fresh sandboxes under an admission permit.
    ///
    /// Guest outcomes, including rejection and infrastructure failure, come
    /// back as an [`ExecutionResult`]. `Err` is returned only for invalid
    /// limit overrides or a closed admission queue.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let id = Uuid::new_v4();
        let span = info_span!("execution", %id, test_cases = request.test_cases.len());
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let mut phase = advance(ExecutionPhase::Pending, ExecutionPhase::Validating)?;

        let verdict = self.validator.validate(&request.code);
        if !verdict.is_safe() {
            phase = advance(phase, ExecutionPhase::Rejected)?;
            advance(phase, ExecutionPhase::Reported)?;
            return Ok(ExecutionResult::rejected(verdict));
        }

        let limits = self.limiter.limits_for(&request.limits)?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::System(format!("Failed to acquire execution permit: {}", e)))?;

        phase = advance(phase, ExecutionPhase::Spawning)?;
        debug!(
            "Running with {} MiB, {}s CPU, {}ms wall clock",
            limits.memory_mb,
            limits.cpu_seconds,
            limits.timeout.as_millis()
        );

        let result = self
            .executor
            .execute(&request.code, &request.test_cases, &limits, verdict)
            .await;

        if result.status != ExecutionStatus::InternalError || result.exit_code.is_some() {
            phase = advance(phase, ExecutionPhase::Running)?;
        }
        phase = advance(phase, ExecutionPhase::for_status(result.status))?;
        advance(phase, ExecutionPhase::Reported)?;

        match result.status {
            ExecutionStatus::Completed => info!(
                "Execution completed in {}ms",
                result.elapsed.as_millis()
            ),
            ExecutionStatus::InternalError => error!("Execution failed: internal error"),
            status => warn!(
                "Execution ended with {} (flags: {:?})",
                status, result.safety_flags
            ),
        }

        Ok(result)
    }

    /// Run `code` against a single test case.
    pub async fn run_test_case(
        &self,
        code: &str,
        input: &str,
        expected_output: &str,
        limits: LimitOverrides,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest::new(code)
            .with_test_cases(vec![TestCase::new(input, expected_output)])
            .with_limits(limits);
        self.execute(request).await
    }

    /// Run `code` against every test case and report a pass summary.
    pub async fn validate_solution(
        &self,
        code: &str,
        test_cases: Vec<TestCase>,
        limits: LimitOverrides,
    ) -> Result<ExecutionResult> {
        if test_cases.is_empty() {
            return Err(Error::InvalidArgument(
                "validate_solution needs at least one test case".into(),
            ));
        }
        let request = ExecutionRequest::new(code)
            .with_test_cases(test_cases)
            .with_limits(limits);
        self.execute(request).await
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Whether the configured interpreter can be found on `PATH`.
    pub fn interpreter_available(&self) -> bool {
        check_command(&self.interpreter)
    }
}

fn advance(phase: ExecutionPhase, next: ExecutionPhase) -> Result<ExecutionPhase> {
    let next = phase.transition(next)?;
    debug!("Execution phase {:?} -> {:?}", phase, next);
    Ok(next)
}
