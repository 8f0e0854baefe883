//! # Code Execution Sandbox
//!
//! Screens and runs short untrusted Python scripts in resource-limited,
//! single-use processes, and evaluates arithmetic and algebra expressions
//! with a whitelist-only in-process calculator.

pub mod calculator;
pub mod config;
mod error;
mod executor;
mod languages;
mod limits;
mod sandbox;
mod service;
mod types;
pub mod validator;
mod watchdog;

#[cfg(test)]
mod tests;

pub use calculator::{CalculationResult, Calculator, QuadraticSolution, Root, RootClassification, Value};
pub use config::SandboxConfig;
pub use error::{Error, ErrorKind};
pub use executor::{CodeExecutor, LanguageExecutor, LaunchPlan, UnitReport};
pub use languages::PythonExecutor;
pub use limits::{LimitOverrides, ResourceLimiter, ResourceLimits};
pub use sandbox::{RunOutcome, Sandbox, StopCause};
pub use service::CodeExecutionService;
pub use types::{
    ExecutionMode, ExecutionPhase, ExecutionRequest, ExecutionResult, ExecutionStatus,
    GuestReport, SafetyFlag, TestCase, TestCaseResult, TestSummary,
};
pub use validator::{UnsafeReason, ValidationVerdict, Validator};
pub use watchdog::{CappedOutput, Termination};

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, Error>;
