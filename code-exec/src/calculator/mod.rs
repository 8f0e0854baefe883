//! In-process expression evaluator for arithmetic and algebra checks.
//!
//! Expressions are screened by the [`Validator`], parsed by a
//! whitelist-only grammar, and evaluated under numeric guards and a
//! wall-clock budget. No expression text ever reaches an interpreter.

mod eval;
mod lexer;
mod parser;
mod quadratic;
mod types;

pub use types::{CalculationResult, QuadraticSolution, Root, RootClassification, Value};

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    config::CalculatorConfig,
    error::Error,
    validator::{ValidationVerdict, Validator},
    Result,
};
use eval::Evaluator;
use parser::{Function, CONSTANTS};

#[derive(Debug, Clone)]
pub struct Calculator {
    config: CalculatorConfig,
    validator: Arc<Validator>,
}

impl Calculator {
    pub fn new(config: CalculatorConfig, validator: Arc<Validator>) -> Self {
        Self { config, validator }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Evaluate `expression` within the configured time budget.
    pub fn evaluate(&self, expression: &str) -> Result<CalculationResult> {
        self.evaluate_within(expression, self.timeout())
    }

    pub fn evaluate_within(&self, expression: &str, timeout: Duration) -> Result<CalculationResult> {
        self.screen(expression)?;
        let expr = parser::parse_expression(expression, self.config.max_nesting_depth)?;
        let value = Evaluator::new(&self.config, timeout).eval(&expr)?;
        debug!("Evaluated {} = {}", expression, value);
        Ok(CalculationResult::Evaluation {
            expression: expression.to_string(),
            value,
        })
    }

    pub fn solve_quadratic(&self, a: f64, b: f64, c: f64) -> Result<CalculationResult> {
        let solution = quadratic::solve(a, b, c, self.config.max_magnitude)?;
        debug!(
            "Solved {}x^2 + {}x + {} = 0: {:?}",
            a, b, c, solution.classification
        );
        Ok(CalculationResult::Quadratic(solution))
    }

    /// Check whether `variable = value` satisfies `expression`.
    ///
    /// `expression` is either `f(x)` (residual `f(value)`) or an equation
    /// `lhs = rhs` (residual `lhs − rhs`).
    pub fn verify_solution(
        &self,
        expression: &str,
        variable: &str,
        value: f64,
        tolerance: f64,
    ) -> Result<CalculationResult> {
        check_variable(variable)?;
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "tolerance must be a non-negative number, got {}",
                tolerance
            )));
        }
        if !value.is_finite() || value.abs() > self.config.max_magnitude {
            return Err(Error::NumericLimit(format!(
                "candidate value exceeds magnitude limit of {:e}",
                self.config.max_magnitude
            )));
        }

        self.screen(expression)?;
        let equation = parser::parse_equation(expression, self.config.max_nesting_depth)?;
        let evaluator = Evaluator::new(&self.config, self.timeout()).with_binding(variable, value);
        let lhs = evaluator.eval_number(&equation.lhs)?;
        let rhs = match &equation.rhs {
            Some(rhs) => evaluator.eval_number(rhs)?,
            None => 0.0,
        };
        let residual = lhs - rhs;
        let within_tolerance = residual.abs() <= tolerance;
        debug!(
            "Verified {} at {}={}: residual {}",
            expression, variable, value, residual
        );

        Ok(CalculationResult::Verification {
            expression: expression.to_string(),
            variable: variable.to_string(),
            value,
            residual,
            tolerance,
            within_tolerance,
        })
    }

    fn screen(&self, expression: &str) -> Result<()> {
        match self.validator.validate_expression(expression) {
            ValidationVerdict::Safe => Ok(()),
            ValidationVerdict::Unsafe { reason } => Err(Error::Rejected(reason)),
            ValidationVerdict::SyntaxError { message, .. } => Err(Error::Syntax(message)),
        }
    }
}

fn check_variable(variable: &str) -> Result<()> {
    let mut chars = variable.chars();
    let well_formed = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed || variable.starts_with("__") {
        return Err(Error::InvalidArgument(format!(
            "`{}` is not a valid variable name",
            variable
        )));
    }
    if Function::from_name(variable).is_some() || CONSTANTS.contains(&variable) {
        return Err(Error::InvalidArgument(format!(
            "`{}` is a reserved name",
            variable
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;

    fn calculator() -> Calculator {
        let validator = Validator::new(&ValidatorConfig::default()).unwrap();
        Calculator::new(CalculatorConfig::default(), Arc::new(validator))
    }

    #[test]
    fn test_evaluate() {
        let result = calculator().evaluate("2 + 3 * 4").unwrap();
        assert_eq!(result.value(), Some(&Value::Number(14.0)));
    }

    #[test]
    fn test_blocked_expression_never_parsed() {
        let err = calculator().evaluate("__import__('os')").unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[test]
    fn test_variable_names() {
        assert!(check_variable("x").is_ok());
        assert!(check_variable("t_1").is_ok());
        for bad in ["", "1x", "x-y", "__x", "sqrt", "pi"] {
            assert!(check_variable(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_verify_equation_form() {
        let result = calculator()
            .verify_solution("2x + 1 = 7", "x", 3.0, 0.0)
            .unwrap();
        assert_eq!(result.residual(), Some(0.0));
    }

    #[test]
    fn test_verify_rejects_bad_tolerance() {
        for tolerance in [-1.0, f64::NAN] {
            assert!(calculator()
                .verify_solution("x", "x", 0.0, tolerance)
                .is_err());
        }
    }
}
