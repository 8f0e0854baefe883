use std::fmt;

use super::lexer::{tokenize, Spanned, Token};
use crate::{error::Error, Result};

/// Whitelisted calculator functions. Anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Abs,
    Round,
    Max,
    Min,
    Sum,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Log,
    Log10,
    Log2,
    Exp,
    Ceil,
    Floor,
    Factorial,
    Gcd,
    Pow,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        let function = match name {
            "abs" => Function::Abs,
            "round" => Function::Round,
            "max" => Function::Max,
            "min" => Function::Min,
            "sum" => Function::Sum,
            "sqrt" => Function::Sqrt,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atan" => Function::Atan,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "exp" => Function::Exp,
            "ceil" => Function::Ceil,
            "floor" => Function::Floor,
            "factorial" => Function::Factorial,
            "gcd" => Function::Gcd,
            "pow" => Function::Pow,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Round => "round",
            Function::Max => "max",
            Function::Min => "min",
            Function::Sum => "sum",
            Function::Sqrt => "sqrt",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Exp => "exp",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Factorial => "factorial",
            Function::Gcd => "gcd",
            Function::Pow => "pow",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) const CONSTANTS: &[&str] = &["pi", "e", "tau"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Name(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Python-style chain: `a < b <= c` is `a < b and b <= c`
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    Call(Function, Vec<Expr>),
}

/// `lhs` alone, or `lhs = rhs`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Equation {
    pub lhs: Expr,
    pub rhs: Option<Expr>,
}

pub(crate) fn parse_expression(input: &str, max_depth: usize) -> Result<Expr> {
    let equation = parse_equation(input, max_depth)?;
    if equation.rhs.is_some() {
        return Err(Error::Syntax(
            "`=` is only allowed when verifying an equation".into(),
        ));
    }
    Ok(equation.lhs)
}

pub(crate) fn parse_equation(input: &str, max_depth: usize) -> Result<Equation> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::Syntax("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };

    let lhs = parser.comparison()?;
    let rhs = if parser.eat(&Token::Assign) {
        Some(parser.comparison()?)
    } else {
        None
    };
    if let Some(extra) = parser.peek_spanned() {
        return Err(Error::Syntax(format!(
            "unexpected {:?} at {}",
            extra.token, extra.offset
        )));
    }
    Ok(Equation { lhs, rhs })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            return Ok(());
        }
        match self.peek_spanned() {
            Some(found) => Err(Error::Syntax(format!(
                "expected {:?} at {}, found {:?}",
                token, found.offset, found.token
            ))),
            None => Err(Error::Syntax(format!(
                "expected {:?}, found end of input",
                token
            ))),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::ResourceExceeded(format!(
                "expression nesting exceeds {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn comparison(&mut self) -> Result<Expr> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                Some(Token::EqEq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                // Implicit multiplication: `5x`, `2(x+1)`, `(a)(b)`
                Some(Token::Ident(_)) | Some(Token::LParen) => {
                    let rhs = self.power()?;
                    lhs = Expr::Binary(BinaryOp::Mul, Box::new(lhs), Box::new(rhs));
                    continue;
                }
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(Expr::Neg(Box::new(operand)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(operand)
            }
            _ => self.power(),
        }
    }

    /// Binds tighter than unary minus on its left and is right-associative:
    /// `-2**2` is `-(2**2)`, `2**3**2` is `2**(3**2)`.
    fn power(&mut self) -> Result<Expr> {
        let base = self.atom()?;
        if self.eat(&Token::Power) {
            self.enter()?;
            let exponent = self.unary()?;
            self.leave();
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(Error::Syntax("unexpected end of input".into()));
        };
        self.pos += 1;

        match spanned.token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    if let Some(function) = Function::from_name(&name) {
                        return self.call(function);
                    }
                    // A single letter before `(` is a variable times a group.
                    if name.len() > 1 {
                        return Err(Error::Syntax(format!(
                            "function `{}` is not allowed",
                            name
                        )));
                    }
                }
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                self.enter()?;
                let inner = self.comparison()?;
                self.expect(Token::RParen)?;
                self.leave();
                Ok(inner)
            }
            Token::LBracket => {
                self.enter()?;
                let items = self.sequence(Token::RBracket)?;
                self.leave();
                Ok(Expr::List(items))
            }
            other => Err(Error::Syntax(format!(
                "unexpected {:?} at {}",
                other, spanned.offset
            ))),
        }
    }

    fn call(&mut self, function: Function) -> Result<Expr> {
        self.expect(Token::LParen)?;
        self.enter()?;
        let args = self.sequence(Token::RParen)?;
        self.leave();
        Ok(Expr::Call(function, args))
    }

    /// Comma-separated expressions up to and including `close`.
    fn sequence(&mut self, close: Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.comparison()?);
            if self.eat(&Token::Comma) {
                // Trailing comma
                if self.eat(&close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close.clone())?;
            return Ok(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_expression(input, 64).unwrap()
    }

    fn num(v: f64) -> Box<Expr> {
        Box::new(Expr::Number(v))
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2.0), num(3.0)))
            )
        );
        assert_eq!(
            parse("-2**2"),
            Expr::Neg(Box::new(Expr::Binary(BinaryOp::Pow, num(2.0), num(2.0))))
        );
        assert_eq!(
            parse("2^3^2"),
            Expr::Binary(
                BinaryOp::Pow,
                num(2.0),
                Box::new(Expr::Binary(BinaryOp::Pow, num(3.0), num(2.0)))
            )
        );
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(
            parse("5x"),
            Expr::Binary(BinaryOp::Mul, num(5.0), name("x"))
        );
        assert_eq!(
            parse("2x^2"),
            Expr::Binary(
                BinaryOp::Mul,
                num(2.0),
                Box::new(Expr::Binary(BinaryOp::Pow, name("x"), num(2.0)))
            )
        );
        assert_eq!(
            parse("x(x+1)"),
            Expr::Binary(
                BinaryOp::Mul,
                name("x"),
                Box::new(Expr::Binary(BinaryOp::Add, name("x"), num(1.0)))
            )
        );
        assert!(matches!(
            parse("(x+1)(x-1)"),
            Expr::Binary(BinaryOp::Mul, _, _)
        ));
    }

    #[test]
    fn test_calls_and_lists() {
        assert_eq!(
            parse("max([1, 2], )"),
            Expr::Call(
                Function::Max,
                vec![Expr::List(vec![Expr::Number(1.0), Expr::Number(2.0)])]
            )
        );
        assert_eq!(parse("sqrt()"), Expr::Call(Function::Sqrt, vec![]));
    }

    #[test]
    fn test_comparison_chain() {
        assert!(matches!(parse("1 < 2 <= 3"), Expr::Compare(_, rest) if rest.len() == 2));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = parse_expression("system(1)", 64).unwrap_err();
        assert!(matches!(err, Error::Syntax(msg) if msg.contains("system")));
    }

    #[test]
    fn test_equation() {
        let equation = parse_equation("x^2 = 4", 64).unwrap();
        assert!(equation.rhs.is_some());
        assert!(parse_expression("x = 4", 64).is_err());
        assert!(parse_equation("x = 4 = 5", 64).is_err());
    }

    #[test]
    fn test_malformed() {
        for input in ["", "1 +", "(1", "1 2", "[1, 2", "*3"] {
            assert!(
                matches!(parse_expression(input, 64), Err(Error::Syntax(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse_expression(&deep, 64).is_ok());
        let err = parse_expression(&deep, 5).unwrap_err();
        assert!(matches!(err, Error::ResourceExceeded(_)));

        let minus_chain = format!("{}1", "-".repeat(100));
        assert!(matches!(
            parse_expression(&minus_chain, 64),
            Err(Error::ResourceExceeded(_))
        ));
    }
}
