//! Input screening that runs before anything is evaluated or spawned.
//!
//! Three layers run in order and stop at the first failure:
//! 1. length check
//! 2. lexical blocklist over the lowercased text
//! 3. structural screen over the parsed script
//!
//! Nothing in this module executes any part of the input.

mod lexical;
mod structural;

pub use lexical::{BlockedPattern, LexicalScreen, PatternCategory};
pub use structural::StructuralScreen;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::{config::ValidatorConfig, Result};

/// Why an input was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum UnsafeReason {
    #[error("input is {length} characters, limit is {max}")]
    TooLong { length: usize, max: usize },

    #[error("blocked {category} pattern `{pattern}`")]
    BlockedPattern {
        category: PatternCategory,
        pattern: String,
    },

    #[error("function definitions are not allowed")]
    FunctionDefinition,

    #[error("class definitions are not allowed")]
    ClassDefinition,

    #[error("global declarations are not allowed")]
    GlobalDeclaration,

    #[error("nonlocal declarations are not allowed")]
    NonlocalDeclaration,

    #[error("import of `{module}` is not allowed")]
    DisallowedImport { module: String },

    #[error("access to double-underscore attribute `{name}` is not allowed")]
    DunderAttribute { name: String },
}

impl UnsafeReason {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            UnsafeReason::TooLong { .. } => "too_long",
            UnsafeReason::BlockedPattern { .. } => "blocked_pattern",
            UnsafeReason::FunctionDefinition => "function_definition",
            UnsafeReason::ClassDefinition => "class_definition",
            UnsafeReason::GlobalDeclaration => "global_declaration",
            UnsafeReason::NonlocalDeclaration => "nonlocal_declaration",
            UnsafeReason::DisallowedImport { .. } => "disallowed_import",
            UnsafeReason::DunderAttribute { .. } => "dunder_attribute",
        }
    }
}

/// Outcome of screening one input. Produced once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Safe,
    Unsafe { reason: UnsafeReason },
    SyntaxError { message: String, offset: usize },
}

impl ValidationVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, ValidationVerdict::Safe)
    }

    pub fn unsafe_reason(&self) -> Option<&UnsafeReason> {
        match self {
            ValidationVerdict::Unsafe { reason } => Some(reason),
            _ => None,
        }
    }

    fn rejected(reason: UnsafeReason) -> Self {
        ValidationVerdict::Unsafe { reason }
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationVerdict::Safe => write!(f, "safe"),
            ValidationVerdict::Unsafe { reason } => write!(f, "unsafe: {}", reason),
            ValidationVerdict::SyntaxError { message, offset } => {
                write!(f, "syntax error at offset {}: {}", offset, message)
            }
        }
    }
}

/// Screens scripts and calculator expressions.
#[derive(Debug, Clone)]
pub struct Validator {
    max_code_chars: usize,
    max_expression_chars: usize,
    lexical: LexicalScreen,
    structural: StructuralScreen,
}

impl Validator {
    pub fn new(config: &ValidatorConfig) -> Result<Self> {
        Ok(Self {
            max_code_chars: config.max_code_chars,
            max_expression_chars: config.max_expression_chars,
            lexical: LexicalScreen::new(&config.extra_blocked_patterns)?,
            structural: StructuralScreen::new(config.allowed_imports.iter().cloned()),
        })
    }

    /// Full three-layer screen for a script.
    pub fn validate(&self, code: &str) -> ValidationVerdict {
        let verdict = self.screen(code, self.max_code_chars, true);
        if !verdict.is_safe() {
            warn!("Script rejected: {}", verdict);
        }
        verdict
    }

    /// Length and lexical layers only. Calculator expressions get their
    /// structural screen from the calculator's own whitelist parser.
    pub fn validate_expression(&self, expression: &str) -> ValidationVerdict {
        let verdict = self.screen(expression, self.max_expression_chars, false);
        if !verdict.is_safe() {
            warn!("Expression rejected: {}", verdict);
        }
        verdict
    }

    pub fn max_code_chars(&self) -> usize {
        self.max_code_chars
    }

    pub fn max_expression_chars(&self) -> usize {
        self.max_expression_chars
    }

    fn screen(&self, text: &str, max: usize, structural: bool) -> ValidationVerdict {
        let length = text.chars().count();
        if length > max {
            return ValidationVerdict::rejected(UnsafeReason::TooLong { length, max });
        }

        if let Some(blocked) = self.lexical.check(text) {
            return ValidationVerdict::rejected(UnsafeReason::BlockedPattern {
                category: blocked.category,
                pattern: blocked.pattern,
            });
        }

        if structural {
            return self.structural.check(text);
        }

        ValidationVerdict::Safe
    }
}
