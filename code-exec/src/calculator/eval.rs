use std::time::{Duration, Instant};

use super::{
    parser::{BinaryOp, CompareOp, Expr, Function},
    types::Value,
};
use crate::{config::CalculatorConfig, error::Error, Result};

/// Largest integer an f64 holds exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Walks a parsed expression under the configured numeric guards.
///
/// Every node checks the deadline, every literal and intermediate value is
/// held to the magnitude ceiling, and factorial and power arguments are
/// bounded before anything is computed.
pub(crate) struct Evaluator<'a> {
    limits: &'a CalculatorConfig,
    binding: Option<(&'a str, f64)>,
    deadline: Instant,
    budget: Duration,
}

impl<'a> Evaluator<'a> {
    pub fn new(limits: &'a CalculatorConfig, budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            limits,
            binding: None,
            deadline: now.checked_add(budget).unwrap_or(now + Duration::from_secs(86_400)),
            budget,
        }
    }

    /// Bind `name` to `value` for this evaluation.
    pub fn with_binding(mut self, name: &'a str, value: f64) -> Self {
        self.binding = Some((name, value));
        self
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        self.tick()?;
        match expr {
            Expr::Number(value) => Ok(Value::Number(self.check(*value)?)),
            Expr::Name(name) => self.lookup(name).map(Value::Number),
            Expr::List(items) => {
                if items.len() > self.limits.max_collection_len {
                    return Err(Error::ResourceExceeded(format!(
                        "list of {} items exceeds limit of {}",
                        items.len(),
                        self.limits.max_collection_len
                    )));
                }
                let values = items
                    .iter()
                    .map(|item| self.eval_number(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            Expr::Neg(operand) => Ok(Value::Number(-self.eval_number(operand)?)),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_number(lhs)?;
                let rhs = self.eval_number(rhs)?;
                self.binary(*op, lhs, rhs).map(Value::Number)
            }
            Expr::Compare(first, rest) => {
                let mut lhs = self.eval_number(first)?;
                let mut holds = true;
                for (op, expr) in rest {
                    let rhs = self.eval_number(expr)?;
                    holds &= compare(*op, lhs, rhs);
                    lhs = rhs;
                }
                Ok(Value::Bool(holds))
            }
            Expr::Call(function, args) => self.call(*function, args),
        }
    }

    pub fn eval_number(&self, expr: &Expr) -> Result<f64> {
        self.eval(expr)?
            .as_number()
            .ok_or_else(|| Error::InvalidArgument("expected a number, got a list".into()))
    }

    fn tick(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(Error::Timeout(self.budget));
        }
        Ok(())
    }

    fn check(&self, value: f64) -> Result<f64> {
        if value.is_nan() {
            return Err(Error::Evaluation("math domain error".into()));
        }
        if value.is_infinite() || value.abs() > self.limits.max_magnitude {
            return Err(Error::NumericLimit(format!(
                "value exceeds magnitude limit of {:e}",
                self.limits.max_magnitude
            )));
        }
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Result<f64> {
        if let Some((bound, value)) = self.binding {
            if bound == name {
                return self.check(value);
            }
        }
        match name {
            "pi" => Ok(std::f64::consts::PI),
            "e" => Ok(std::f64::consts::E),
            "tau" => Ok(std::f64::consts::TAU),
            _ => Err(Error::InvalidArgument(format!("unknown name `{}`", name))),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: f64, rhs: f64) -> Result<f64> {
        let value = match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => {
                nonzero_divisor(rhs)?;
                lhs / rhs
            }
            BinaryOp::FloorDiv => {
                nonzero_divisor(rhs)?;
                (lhs / rhs).floor()
            }
            BinaryOp::Mod => {
                nonzero_divisor(rhs)?;
                // Result takes the divisor's sign.
                lhs - rhs * (lhs / rhs).floor()
            }
            BinaryOp::Pow => return self.pow(lhs, rhs),
        };
        self.check(value)
    }

    fn pow(&self, base: f64, exponent: f64) -> Result<f64> {
        if exponent.abs() > self.limits.max_power_exponent {
            return Err(Error::NumericLimit(format!(
                "exponent {} exceeds limit of {}",
                exponent, self.limits.max_power_exponent
            )));
        }
        if base == 0.0 && exponent < 0.0 {
            return Err(Error::Evaluation(
                "0.0 cannot be raised to a negative power".into(),
            ));
        }
        if base < 0.0 && exponent.fract() != 0.0 {
            return Err(Error::Evaluation(
                "negative number cannot be raised to a fractional power".into(),
            ));
        }
        self.check(base.powf(exponent))
    }

    fn call(&self, function: Function, args: &[Expr]) -> Result<Value> {
        let value = match function {
            Function::Max | Function::Min | Function::Sum => {
                let values = self.collection(function, args)?;
                let folded = match function {
                    Function::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Function::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    _ => values.iter().sum(),
                };
                return Ok(Value::Number(self.check(folded)?));
            }
            Function::Round => {
                let (x, digits) = match args {
                    [x] => (self.eval_number(x)?, None),
                    [x, digits] => (self.eval_number(x)?, Some(self.integer(function, digits)?)),
                    _ => return Err(arity(function, "one or two arguments", args.len())),
                };
                round(x, digits)
            }
            Function::Log => {
                let (x, base) = match args {
                    [x] => (self.eval_number(x)?, None),
                    [x, base] => (self.eval_number(x)?, Some(self.eval_number(base)?)),
                    _ => return Err(arity(function, "one or two arguments", args.len())),
                };
                if x <= 0.0 {
                    return Err(domain_error());
                }
                match base {
                    None => x.ln(),
                    Some(base) if base <= 0.0 => return Err(domain_error()),
                    Some(base) if base == 1.0 => {
                        return Err(Error::Evaluation("division by zero".into()))
                    }
                    Some(base) => x.ln() / base.ln(),
                }
            }
            Function::Pow => match args {
                [base, exponent] => {
                    let base = self.eval_number(base)?;
                    let exponent = self.eval_number(exponent)?;
                    self.pow(base, exponent)?
                }
                _ => return Err(arity(function, "exactly two arguments", args.len())),
            },
            Function::Gcd => {
                let mut acc: u64 = 0;
                for arg in args {
                    let n = self.integer(function, arg)?;
                    acc = gcd(acc, n.unsigned_abs());
                }
                acc as f64
            }
            Function::Factorial => {
                let [arg] = args else {
                    return Err(arity(function, "exactly one argument", args.len()));
                };
                let n = self.eval_number(arg)?;
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(Error::InvalidArgument(
                        "factorial() only accepts non-negative integral values".into(),
                    ));
                }
                if n > f64::from(self.limits.max_factorial_input) {
                    return Err(Error::NumericLimit(format!(
                        "factorial argument {} exceeds limit of {}",
                        n, self.limits.max_factorial_input
                    )));
                }
                self.factorial(n as u32)?
            }
            _ => {
                let [arg] = args else {
                    return Err(arity(function, "exactly one argument", args.len()));
                };
                let x = self.eval_number(arg)?;
                unary(function, x)?
            }
        };
        Ok(Value::Number(self.check(value)?))
    }

    /// Arguments of `max`/`min`/`sum`: one list, or (for `max`/`min`) several numbers.
    fn collection(&self, function: Function, args: &[Expr]) -> Result<Vec<f64>> {
        let values = match args {
            [single] => match self.eval(single)? {
                Value::List(items) => items,
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "{}() expects a list or several numbers",
                        function
                    )))
                }
            },
            _ if function == Function::Sum => {
                return Err(arity(function, "exactly one list", args.len()));
            }
            _ => args
                .iter()
                .map(|arg| self.eval_number(arg))
                .collect::<Result<Vec<_>>>()?,
        };
        if values.is_empty() && function != Function::Sum {
            return Err(Error::InvalidArgument(format!(
                "{}() arg is an empty sequence",
                function
            )));
        }
        Ok(values)
    }

    fn integer(&self, function: Function, expr: &Expr) -> Result<i64> {
        let value = self.eval_number(expr)?;
        if value.fract() != 0.0 || value.abs() > MAX_EXACT_INT {
            return Err(Error::InvalidArgument(format!(
                "{}() requires integer arguments, got {}",
                function, value
            )));
        }
        Ok(value as i64)
    }

    fn factorial(&self, n: u32) -> Result<f64> {
        let mut product = 1.0_f64;
        for k in 2..=n {
            self.tick()?;
            product = self.check(product * f64::from(k))?;
        }
        Ok(product)
    }
}

fn unary(function: Function, x: f64) -> Result<f64> {
    let value = match function {
        Function::Abs => x.abs(),
        Function::Sqrt if x < 0.0 => return Err(domain_error()),
        Function::Sqrt => x.sqrt(),
        Function::Sin => x.sin(),
        Function::Cos => x.cos(),
        Function::Tan => x.tan(),
        Function::Asin | Function::Acos if !(-1.0..=1.0).contains(&x) => {
            return Err(domain_error())
        }
        Function::Asin => x.asin(),
        Function::Acos => x.acos(),
        Function::Atan => x.atan(),
        Function::Log10 | Function::Log2 if x <= 0.0 => return Err(domain_error()),
        Function::Log10 => x.log10(),
        Function::Log2 => x.log2(),
        Function::Exp => x.exp(),
        Function::Ceil => x.ceil(),
        Function::Floor => x.floor(),
        other => {
            return Err(Error::InvalidArgument(format!(
                "{}() cannot be called with one argument",
                other
            )))
        }
    };
    Ok(value)
}

fn compare(op: CompareOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Eq => lhs == rhs,
        CompareOp::NotEq => lhs != rhs,
    }
}

/// Half-to-even rounding, optionally to `digits` decimal places.
fn round(x: f64, digits: Option<i64>) -> f64 {
    fn half_even(v: f64) -> f64 {
        let rounded = v.round();
        if (v - v.trunc()).abs() == 0.5 {
            2.0 * (v / 2.0).round()
        } else {
            rounded
        }
    }
    match digits {
        None | Some(0) => half_even(x),
        // Beyond f64 precision; nothing to round.
        Some(d) if d > 15 => x,
        Some(d) if d < -308 => 0.0,
        Some(d) => {
            let factor = 10f64.powi(d as i32);
            half_even(x * factor) / factor
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn nonzero_divisor(rhs: f64) -> Result<()> {
    if rhs == 0.0 {
        return Err(Error::Evaluation("division by zero".into()));
    }
    Ok(())
}

fn domain_error() -> Error {
    Error::Evaluation("math domain error".into())
}

fn arity(function: Function, expected: &str, given: usize) -> Error {
    Error::InvalidArgument(format!(
        "{}() takes {} ({} given)",
        function, expected, given
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::parser::parse_expression;

    fn eval(input: &str) -> Result<Value> {
        let limits = CalculatorConfig::default();
        let expr = parse_expression(input, limits.max_nesting_depth)?;
        Evaluator::new(&limits, Duration::from_secs(5)).eval(&expr)
    }

    fn number(input: &str) -> f64 {
        eval(input).unwrap().as_number().unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(number("2 + 3 * 4"), 14.0);
        assert_eq!(number("7 // 2"), 3.0);
        assert_eq!(number("-7 // 2"), -4.0);
        assert_eq!(number("-7 % 3"), 2.0);
        assert_eq!(number("7 % -3"), -2.0);
        assert_eq!(number("2 ^ 10"), 1024.0);
        assert_eq!(number("-2 ** 2"), -4.0);
        assert_eq!(number("2 ** -1"), 0.5);
    }

    #[test]
    fn test_functions() {
        assert_eq!(number("sqrt(16)"), 4.0);
        assert_eq!(number("factorial(5)"), 120.0);
        assert_eq!(number("gcd(12, 18)"), 6.0);
        assert_eq!(number("max(1, 5, 3)"), 5.0);
        assert_eq!(number("min([4, 2, 8])"), 2.0);
        assert_eq!(number("sum([1, 2, 3])"), 6.0);
        assert_eq!(number("sum([])"), 0.0);
        assert_eq!(number("round(2.5)"), 2.0);
        assert_eq!(number("round(3.5)"), 4.0);
        assert_eq!(number("round(1.2345, 2)"), 1.23);
        assert_eq!(number("log(8, 2)"), 3.0);
        assert_eq!(number("abs(-3)"), 3.0);
        assert_eq!(number("pow(2, 3)"), 8.0);
        assert!((number("sin(pi / 2)") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 < 3 < 2").unwrap(), Value::Bool(false));
        assert_eq!(eval("2 * 3 == 6").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_numeric_guards() {
        assert!(matches!(eval("factorial(1001)"), Err(Error::NumericLimit(_))));
        assert!(matches!(eval("2 ** 1001"), Err(Error::NumericLimit(_))));
        assert!(matches!(eval("10 ** 101"), Err(Error::NumericLimit(_))));
        assert!(matches!(eval("1e101"), Err(Error::NumericLimit(_))));
        assert!(matches!(eval("exp(1000)"), Err(Error::NumericLimit(_))));
        // 70! is about 1.2e100.
        assert!(matches!(eval("factorial(70)"), Err(Error::NumericLimit(_))));
        assert!(eval("factorial(69)").is_ok());
    }

    #[test]
    fn test_domain_errors() {
        for input in ["1 / 0", "5 % 0", "sqrt(-1)", "log(0)", "asin(2)", "0 ** -1", "(-8) ** 0.5"] {
            assert!(matches!(eval(input), Err(Error::Evaluation(_))), "{input}");
        }
    }

    #[test]
    fn test_invalid_arguments() {
        for input in ["factorial(2.5)", "factorial(-1)", "gcd(1.5, 2)", "sqrt(1, 2)", "max()", "sum(1, 2)", "x + 1"] {
            assert!(matches!(eval(input), Err(Error::InvalidArgument(_))), "{input}");
        }
    }

    #[test]
    fn test_binding() {
        let limits = CalculatorConfig::default();
        let expr = parse_expression("x^2 + 5x + 6", 64).unwrap();
        let evaluator = Evaluator::new(&limits, Duration::from_secs(5)).with_binding("x", -2.0);
        assert_eq!(evaluator.eval_number(&expr).unwrap(), 0.0);
    }

    #[test]
    fn test_collection_limit() {
        let limits = CalculatorConfig {
            max_collection_len: 3,
            ..CalculatorConfig::default()
        };
        let expr = parse_expression("sum([1, 2, 3, 4])", 64).unwrap();
        let err = Evaluator::new(&limits, Duration::from_secs(5)).eval(&expr).unwrap_err();
        assert!(matches!(err, Error::ResourceExceeded(_)));
    }

    #[test]
    fn test_deadline() {
        let limits = CalculatorConfig::default();
        let expr = parse_expression("1 + 1", 64).unwrap();
        let err = Evaluator::new(&limits, Duration::ZERO).eval(&expr).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
