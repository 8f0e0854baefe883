//! Startup configuration for the sandbox subsystem.
//!
//! Loaded once (usually from a TOML file) and then shared read-only by every
//! component. Missing keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{error::Error, Result};

/// Smallest address-space cap a CPython interpreter can start under.
pub const MIN_INTERPRETER_MEMORY_MB: u64 = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub validator: ValidatorConfig,
    pub calculator: CalculatorConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Maximum script length in characters
    pub max_code_chars: usize,
    /// Maximum calculator expression length in characters
    pub max_expression_chars: usize,
    /// Modules a script may import
    pub allowed_imports: Vec<String>,
    /// Additional case-insensitive regexes screened alongside the built-in blocklist
    pub extra_blocked_patterns: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_code_chars: 10_000,
            max_expression_chars: 1_000,
            allowed_imports: ["math", "random", "datetime", "json", "re"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            extra_blocked_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    pub max_magnitude: f64,
    pub max_factorial_input: u32,
    pub max_power_exponent: f64,
    pub max_collection_len: usize,
    pub max_nesting_depth: usize,
    pub timeout_ms: u64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            max_magnitude: 1e100,
            max_factorial_input: 1000,
            max_power_exponent: 1000.0,
            max_collection_len: 10_000,
            max_nesting_depth: 64,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Interpreter used for guest scripts
    pub interpreter: String,
    /// Number of sandboxes allowed to run at once
    pub max_concurrent: usize,
    pub default_limits: LimitDefaults,
    pub ceilings: LimitCeilings,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            max_concurrent: 4,
            default_limits: LimitDefaults::default(),
            ceilings: LimitCeilings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitDefaults {
    pub memory_mb: u64,
    pub cpu_seconds: u64,
    pub timeout_seconds: f64,
    pub output_bytes: usize,
    pub max_processes: u64,
    pub grace_period_ms: u64,
}

impl Default for LimitDefaults {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            cpu_seconds: 5,
            timeout_seconds: 5.0,
            output_bytes: 64 * 1024,
            max_processes: 0,
            grace_period_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitCeilings {
    pub memory_mb: u64,
    pub cpu_seconds: u64,
    pub timeout_seconds: f64,
}

impl Default for LimitCeilings {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_seconds: 30,
            timeout_seconds: 30.0,
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SandboxConfig =
            toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations that would make every request fail or bypass a ceiling.
    pub fn validate(&self) -> Result<()> {
        let v = &self.validator;
        if v.max_code_chars == 0 || v.max_expression_chars == 0 {
            return Err(Error::Config("input length limits must be positive".into()));
        }

        let c = &self.calculator;
        if !(c.max_magnitude.is_finite() && c.max_magnitude > 0.0) {
            return Err(Error::Config("max_magnitude must be finite and positive".into()));
        }
        if !(c.max_power_exponent.is_finite() && c.max_power_exponent >= 0.0) {
            return Err(Error::Config(
                "max_power_exponent must be finite and non-negative".into(),
            ));
        }
        if c.timeout_ms == 0 || c.max_nesting_depth == 0 {
            return Err(Error::Config(
                "calculator timeout and nesting depth must be positive".into(),
            ));
        }

        let e = &self.execution;
        if e.interpreter.trim().is_empty() {
            return Err(Error::Config("interpreter must not be empty".into()));
        }
        if e.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".into()));
        }
        let d = &e.default_limits;
        let ceil = &e.ceilings;
        if !(d.timeout_seconds.is_finite() && d.timeout_seconds > 0.0) {
            return Err(Error::Config("default timeout must be positive".into()));
        }
        if d.cpu_seconds == 0 || d.output_bytes == 0 {
            return Err(Error::Config(
                "default CPU time and output cap must be positive".into(),
            ));
        }
        if d.memory_mb < MIN_INTERPRETER_MEMORY_MB {
            return Err(Error::Config(format!(
                "default memory must be at least {} MiB",
                MIN_INTERPRETER_MEMORY_MB
            )));
        }
        if ceil.memory_mb < d.memory_mb
            || ceil.cpu_seconds < d.cpu_seconds
            || !(ceil.timeout_seconds.is_finite() && ceil.timeout_seconds >= d.timeout_seconds)
        {
            return Err(Error::Config("ceilings must not be below defaults".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_defaults_are_valid() {
        SandboxConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SandboxConfig::from_toml_str(
            r#"
            [execution]
            max_concurrent = 8

            [execution.default_limits]
            timeout_seconds = 2.5
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.max_concurrent, 8);
        assert_eq!(config.execution.default_limits.timeout_seconds, 2.5);
        assert_eq!(config.execution.default_limits.memory_mb, 128);
        assert_eq!(config.calculator.max_factorial_input, 1000);
        assert!(config
            .validator
            .allowed_imports
            .iter()
            .any(|m| m == "math"));
    }

    #[test]
    fn test_rejects_ceiling_below_default() {
        let err = SandboxConfig::from_toml_str(
            r#"
            [execution.ceilings]
            memory_mb = 64
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_tiny_memory() {
        let err = SandboxConfig::from_toml_str(
            r#"
            [execution.default_limits]
            memory_mb = 4
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("MiB"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(SandboxConfig::from_toml_str("[execution").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("sandbox.toml");
        file.write_str(
            r#"
            [validator]
            allowed_imports = ["math"]

            [execution]
            interpreter = "python3.12"
            "#,
        )
        .unwrap();

        let config = SandboxConfig::from_file(file.path()).unwrap();
        assert_eq!(config.validator.allowed_imports, vec!["math".to_string()]);
        assert_eq!(config.execution.interpreter, "python3.12");

        let err = SandboxConfig::from_file(dir.child("missing.toml").path()).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
