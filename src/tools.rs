//! The operations exposed through the [`ToolManager`](crate::ToolManager).
//!
//! Each tool parses its JSON parameters, fills unset limits from its
//! configured defaults, and hands the call to one of the two engines.

use async_trait::async_trait;
use code_exec::{
    CalculationResult, Calculator, CodeExecutionService, ExecutionRequest, ExecutionResult,
    LimitOverrides, ResourceLimits, TestCase,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::ToolError;

pub const EXECUTE: &str = "execute";
pub const RUN_TEST_CASE: &str = "run_test_case";
pub const VALIDATE_SOLUTION: &str = "validate_solution";
pub const CALCULATE: &str = "calculate";
pub const SOLVE_QUADRATIC: &str = "solve_quadratic";
pub const VERIFY_SOLUTION: &str = "verify_solution";

pub const OPERATIONS: [&str; 6] = [
    EXECUTE,
    RUN_TEST_CASE,
    VALIDATE_SOLUTION,
    CALCULATE,
    SOLVE_QUADRATIC,
    VERIFY_SOLUTION,
];

/// Resolve an operation name, accepting the camelCase spellings used by callers.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    let canonical = match name {
        "runTestCase" => RUN_TEST_CASE,
        "validateSolution" => VALIDATE_SOLUTION,
        "solveQuadratic" => SOLVE_QUADRATIC,
        "verifySolution" => VERIFY_SOLUTION,
        other => return OPERATIONS.iter().copied().find(|op| *op == other),
    };
    Some(canonical)
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn capability(&self) -> Capability;

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError>;
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Execution(ExecutionResult),
    Calculation(CalculationResult),
}

impl ToolOutput {
    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            ToolOutput::Execution(result) => Some(result),
            ToolOutput::Calculation(_) => None,
        }
    }

    pub fn calculation(&self) -> Option<&CalculationResult> {
        match self {
            ToolOutput::Calculation(result) => Some(result),
            ToolOutput::Execution(_) => None,
        }
    }
}

/// Read-only description of one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    fn required(name: &'static str, kind: ParamType) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    fn optional(name: &'static str, kind: ParamType, default: Value) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    /// List of `{input, expected_output}` objects
    TestCases,
}

const DEFAULT_TOLERANCE: f64 = 1e-9;

fn parse<P: DeserializeOwned>(operation: &str, params: Value) -> Result<P, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::invalid_params(operation, e))
}

/// Limit parameters shared by the execution tools, showing the effective defaults.
fn limit_params(effective: &ResourceLimits) -> Vec<ParamSpec> {
    vec![
        ParamSpec::optional(
            "timeout_seconds",
            ParamType::Number,
            json!(effective.timeout.as_secs_f64()),
        ),
        ParamSpec::optional("memory_mb", ParamType::Integer, json!(effective.memory_mb)),
        ParamSpec::optional("cpu_seconds", ParamType::Integer, json!(effective.cpu_seconds)),
    ]
}

/// Shared state of the three execution tools.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub service: Arc<CodeExecutionService>,
    pub defaults: LimitOverrides,
    pub effective: ResourceLimits,
}

impl ExecutionContext {
    fn limits(&self, requested: LimitOverrides) -> LimitOverrides {
        requested.or(self.defaults)
    }
}

pub(crate) struct ExecuteTool(pub ExecutionContext);

#[async_trait]
impl Tool for ExecuteTool {
    fn capability(&self) -> Capability {
        let mut params = vec![
            ParamSpec::required("code", ParamType::String),
            ParamSpec::optional("test_cases", ParamType::TestCases, json!([])),
        ];
        params.extend(limit_params(&self.0.effective));
        Capability {
            name: EXECUTE,
            description: "Screen and run a Python script in a resource-limited sandbox",
            params,
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let request: ExecutionRequest = parse(EXECUTE, params)?;
        let limits = self.0.limits(request.limits);
        let result = self.0.service.execute(request.with_limits(limits)).await?;
        Ok(ToolOutput::Execution(result))
    }
}

#[derive(Deserialize)]
struct RunTestCaseParams {
    code: String,
    #[serde(default)]
    input: String,
    #[serde(alias = "expectedOutput")]
    expected_output: String,
    #[serde(flatten)]
    limits: LimitOverrides,
}

pub(crate) struct RunTestCaseTool(pub ExecutionContext);

#[async_trait]
impl Tool for RunTestCaseTool {
    fn capability(&self) -> Capability {
        let mut params = vec![
            ParamSpec::required("code", ParamType::String),
            ParamSpec::optional("input", ParamType::String, json!("")),
            ParamSpec::required("expected_output", ParamType::String),
        ];
        params.extend(limit_params(&self.0.effective));
        Capability {
            name: RUN_TEST_CASE,
            description: "Run a script against one stdin input and compare its output",
            params,
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let params: RunTestCaseParams = parse(RUN_TEST_CASE, params)?;
        let result = self
            .0
            .service
            .run_test_case(
                &params.code,
                &params.input,
                &params.expected_output,
                self.0.limits(params.limits),
            )
            .await?;
        Ok(ToolOutput::Execution(result))
    }
}

#[derive(Deserialize)]
struct ValidateSolutionParams {
    code: String,
    #[serde(alias = "testCases")]
    test_cases: Vec<TestCase>,
    #[serde(flatten)]
    limits: LimitOverrides,
}

pub(crate) struct ValidateSolutionTool(pub ExecutionContext);

#[async_trait]
impl Tool for ValidateSolutionTool {
    fn capability(&self) -> Capability {
        let mut params = vec![
            ParamSpec::required("code", ParamType::String),
            ParamSpec::required("test_cases", ParamType::TestCases),
        ];
        params.extend(limit_params(&self.0.effective));
        Capability {
            name: VALIDATE_SOLUTION,
            description: "Run a script against every test case and summarise the pass rate",
            params,
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let params: ValidateSolutionParams = parse(VALIDATE_SOLUTION, params)?;
        let result = self
            .0
            .service
            .validate_solution(&params.code, params.test_cases, self.0.limits(params.limits))
            .await?;
        Ok(ToolOutput::Execution(result))
    }
}

/// Evaluation is synchronous and bounded by the calculator's own budget,
/// so it runs on the blocking pool.
async fn calculate_blocking<F>(calculator: &Arc<Calculator>, f: F) -> Result<ToolOutput, ToolError>
where
    F: FnOnce(&Calculator) -> code_exec::Result<CalculationResult> + Send + 'static,
{
    let calculator = calculator.clone();
    let result = tokio::task::spawn_blocking(move || f(&calculator))
        .await
        .map_err(|e| code_exec::Error::System(format!("Calculator task failed: {}", e)))??;
    Ok(ToolOutput::Calculation(result))
}

#[derive(Deserialize)]
struct CalculateParams {
    expression: String,
}

pub(crate) struct CalculateTool(pub Arc<Calculator>);

#[async_trait]
impl Tool for CalculateTool {
    fn capability(&self) -> Capability {
        Capability {
            name: CALCULATE,
            description: "Evaluate an arithmetic expression with whitelisted functions",
            params: vec![ParamSpec::required("expression", ParamType::String)],
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let params: CalculateParams = parse(CALCULATE, params)?;
        calculate_blocking(&self.0, move |calculator| {
            calculator.evaluate(&params.expression)
        })
        .await
    }
}

#[derive(Deserialize)]
struct SolveQuadraticParams {
    a: f64,
    b: f64,
    c: f64,
}

pub(crate) struct SolveQuadraticTool(pub Arc<Calculator>);

#[async_trait]
impl Tool for SolveQuadraticTool {
    fn capability(&self) -> Capability {
        Capability {
            name: SOLVE_QUADRATIC,
            description: "Solve a*x^2 + b*x + c = 0, including complex roots",
            params: vec![
                ParamSpec::required("a", ParamType::Number),
                ParamSpec::required("b", ParamType::Number),
                ParamSpec::required("c", ParamType::Number),
            ],
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let SolveQuadraticParams { a, b, c } = parse(SOLVE_QUADRATIC, params)?;
        calculate_blocking(&self.0, move |calculator| calculator.solve_quadratic(a, b, c)).await
    }
}

#[derive(Deserialize)]
struct VerifySolutionParams {
    expression: String,
    variable: String,
    value: f64,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

pub(crate) struct VerifySolutionTool(pub Arc<Calculator>);

#[async_trait]
impl Tool for VerifySolutionTool {
    fn capability(&self) -> Capability {
        Capability {
            name: VERIFY_SOLUTION,
            description: "Check a candidate value against an expression or equation",
            params: vec![
                ParamSpec::required("expression", ParamType::String),
                ParamSpec::required("variable", ParamType::String),
                ParamSpec::required("value", ParamType::Number),
                ParamSpec::optional("tolerance", ParamType::Number, json!(DEFAULT_TOLERANCE)),
            ],
        }
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutput, ToolError> {
        let params: VerifySolutionParams = parse(VERIFY_SOLUTION, params)?;
        calculate_blocking(&self.0, move |calculator| {
            calculator.verify_solution(
                &params.expression,
                &params.variable,
                params.value,
                params.tolerance,
            )
        })
        .await
    }
}
