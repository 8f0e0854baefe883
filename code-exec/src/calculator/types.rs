use serde::{Deserialize, Serialize};
use std::fmt;

/// A calculator value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    List(Vec<f64>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::List(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|n| n.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Nature of a quadratic's roots, from the sign of its discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootClassification {
    /// D > 0
    TwoReal,
    /// D == 0
    RepeatedReal,
    /// D < 0
    ComplexConjugate,
    /// a == 0, solved as bx + c = 0
    Linear,
}

/// A root as `re + im·i`, with |a·z² + b·z + c| at that root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub re: f64,
    pub im: f64,
    pub residual: f64,
}

impl Root {
    pub fn is_real(&self) -> bool {
        self.im == 0.0
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_real() {
            write!(f, "{}", self.re)
        } else if self.im < 0.0 {
            write!(f, "{} - {}i", self.re, -self.im)
        } else {
            write!(f, "{} + {}i", self.re, self.im)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadraticSolution {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// b² − 4ac; absent for the linear case
    pub discriminant: Option<f64>,
    pub classification: RootClassification,
    pub roots: Vec<Root>,
}

/// Result of any calculator operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CalculationResult {
    Evaluation {
        expression: String,
        value: Value,
    },
    Quadratic(QuadraticSolution),
    Verification {
        expression: String,
        variable: String,
        value: f64,
        residual: f64,
        tolerance: f64,
        within_tolerance: bool,
    },
}

impl CalculationResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            CalculationResult::Evaluation { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn quadratic(&self) -> Option<&QuadraticSolution> {
        match self {
            CalculationResult::Quadratic(solution) => Some(solution),
            _ => None,
        }
    }

    pub fn residual(&self) -> Option<f64> {
        match self {
            CalculationResult::Verification { residual, .. } => Some(*residual),
            _ => None,
        }
    }
}
