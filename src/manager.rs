use code_exec::{Calculator, CodeExecutionService, Validator};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    settings::Settings,
    tools::{
        canonical_name, CalculateTool, Capability, ExecuteTool, ExecutionContext, RunTestCaseTool,
        SolveQuadraticTool, Tool, ToolOutput, ValidateSolutionTool, VerifySolutionTool,
        EXECUTE, OPERATIONS, RUN_TEST_CASE, VALIDATE_SOLUTION,
    },
    ToolError,
};

/// Registry mapping operation names to the two engines.
///
/// Built once from [`Settings`]; holds no mutable state, so one instance can
/// serve concurrent callers behind an `Arc`.
pub struct ToolManager {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
    disabled: BTreeSet<&'static str>,
    service: Arc<CodeExecutionService>,
}

impl ToolManager {
    pub fn new(settings: &Settings) -> Result<Self, ToolError> {
        settings.sandbox.validate()?;

        let mut disabled = BTreeSet::new();
        for name in &settings.tools.disabled {
            let operation =
                canonical_name(name).ok_or_else(|| ToolError::UnknownOperation(name.clone()))?;
            disabled.insert(operation);
        }
        for name in settings.tools.defaults.keys() {
            if canonical_name(name).is_none() {
                return Err(ToolError::UnknownOperation(name.clone()));
            }
        }

        let validator = Arc::new(Validator::new(&settings.sandbox.validator)?);
        let service = Arc::new(CodeExecutionService::with_validator(
            &settings.sandbox,
            validator.clone(),
        ));
        let calculator = Arc::new(Calculator::new(
            settings.sandbox.calculator.clone(),
            validator,
        ));

        let context = |operation: &str| -> Result<ExecutionContext, ToolError> {
            let defaults = settings.defaults_for(operation);
            let effective = service.limiter().limits_for(&defaults)?;
            Ok(ExecutionContext {
                service: service.clone(),
                defaults,
                effective,
            })
        };

        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ExecuteTool(context(EXECUTE)?)),
            Arc::new(RunTestCaseTool(context(RUN_TEST_CASE)?)),
            Arc::new(ValidateSolutionTool(context(VALIDATE_SOLUTION)?)),
            Arc::new(CalculateTool(calculator.clone())),
            Arc::new(SolveQuadraticTool(calculator.clone())),
            Arc::new(VerifySolutionTool(calculator)),
        ];
        let tools: BTreeMap<_, _> = tools
            .into_iter()
            .map(|tool| (tool.capability().name, tool))
            .collect();
        debug_assert_eq!(tools.len(), OPERATIONS.len());

        info!(
            "Tool manager ready with {} operations ({} disabled)",
            tools.len() - disabled.len(),
            disabled.len()
        );
        Ok(Self {
            tools,
            disabled,
            service,
        })
    }

    /// Dispatch `operation` with JSON `params`.
    pub async fn invoke(&self, operation: &str, params: Value) -> Result<ToolOutput, ToolError> {
        let name = canonical_name(operation)
            .ok_or_else(|| ToolError::UnknownOperation(operation.to_string()))?;
        if self.disabled.contains(name) {
            warn!("Refused disabled operation {}", name);
            return Err(ToolError::Disabled(name.to_string()));
        }
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownOperation(operation.to_string()))?;

        debug!("Invoking {}", name);
        let result = tool.invoke(params).await;
        if let Err(e) = &result {
            warn!("{} failed ({}): {}", name, e.kind(), e);
        }
        result
    }

    /// Enabled operations and their parameter shapes.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.tools
            .iter()
            .filter(|(name, _)| !self.disabled.contains(*name))
            .map(|(_, tool)| tool.capability())
            .collect()
    }

    pub fn is_enabled(&self, operation: &str) -> bool {
        canonical_name(operation).is_some_and(|name| !self.disabled.contains(name))
    }

    /// Whether scripts can run on this host at all.
    pub fn interpreter_available(&self) -> bool {
        self.service.interpreter_available()
    }
}
