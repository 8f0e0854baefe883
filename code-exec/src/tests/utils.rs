pub mod defaults {
    use std::sync::Arc;

    use crate::{
        config::{SandboxConfig, ValidatorConfig},
        limits::{LimitOverrides, ResourceLimiter, ResourceLimits},
        Calculator, CodeExecutionService, Validator,
    };

    /// Short limits so hostile scripts finish quickly.
    pub fn test_config() -> SandboxConfig {
        let mut config = SandboxConfig::default();
        config.execution.default_limits.timeout_seconds = 2.0;
        config.execution.default_limits.cpu_seconds = 2;
        config.execution.default_limits.grace_period_ms = 300;
        config.execution.default_limits.output_bytes = 16 * 1024;
        config
    }

    pub fn default_test_limits() -> ResourceLimits {
        ResourceLimiter::new(&test_config().execution)
            .limits_for(&LimitOverrides::default())
            .unwrap()
    }

    pub fn test_service() -> CodeExecutionService {
        CodeExecutionService::new(&test_config()).unwrap()
    }

    pub fn test_calculator() -> Calculator {
        let config = test_config();
        let validator = Validator::new(&ValidatorConfig::default()).unwrap();
        Calculator::new(config.calculator, Arc::new(validator))
    }
}

pub(crate) use crate::languages::skip_if_not_available;
