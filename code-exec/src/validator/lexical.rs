use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{error::Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    DynamicEvaluation,
    Introspection,
    SystemModule,
    EscapeSequence,
    Custom,
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternCategory::DynamicEvaluation => "dynamic-evaluation",
            PatternCategory::Introspection => "introspection",
            PatternCategory::SystemModule => "system-module",
            PatternCategory::EscapeSequence => "escape-sequence",
            PatternCategory::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A blocklist hit: which rule fired and the text it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPattern {
    pub category: PatternCategory,
    pub pattern: String,
}

// Matched against the lowercased input.
const DYNAMIC_EVALUATION: &[&str] = &[
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bcompile\s*\(",
    r"\b__import__\b",
    r"\bglobals\s*\(",
    r"\blocals\s*\(",
    r"\bvars\s*\(",
    r"\bdir\s*\(",
    r"\bgetattr\s*\(",
    r"\bsetattr\s*\(",
    r"\bdelattr\s*\(",
    r"\bhasattr\s*\(",
    r"\bopen\s*\(",
    r"\bbreakpoint\s*\(",
    r"\bmemoryview\s*\(",
];

const INTROSPECTION: &[&str] = &[
    r"__class__",
    r"__bases__",
    r"__base__",
    r"__subclasses__",
    r"__mro__",
    r"__globals__",
    r"__builtins__",
    r"__dict__",
    r"__code__",
    r"__closure__",
    r"__getattribute__",
    r"__reduce__",
    r"__reduce_ex__",
    r"__loader__",
    r"__spec__",
    r"\bf_globals\b",
    r"\bf_locals\b",
    r"\bgi_frame\b",
    r"\bcr_frame\b",
    r"\btb_frame\b",
];

const SYSTEM_MODULES: &[&str] = &[
    r"\bos\s*\.",
    r"\bimport\s+os\b",
    r"\bfrom\s+os\b",
    r"\bsys\b",
    r"\bsubprocess\b",
    r"\bsocket\b",
    r"\bshutil\b",
    r"\bpathlib\b",
    r"\bctypes\b",
    r"\bcffi\b",
    r"\bimportlib\b",
    r"\bbuiltins\b",
    r"\bpickle\b",
    r"\bmarshal\b",
    r"\bshelve\b",
    r"\bmultiprocessing\b",
    r"\bthreading\b",
    r"\bsignal\b",
    r"\bpty\b",
    r"\bresource\b",
    r"\bposix\b",
    r"\burllib\b",
    r"\bhttp\.client\b",
    r"\bftplib\b",
    r"\bsmtplib\b",
    r"\btelnetlib\b",
    r"\brequests\b",
    r"\bio\s*\.",
    r"\btempfile\b",
    r"\bglob\b",
    r"\binspect\b",
    r"\bgc\s*\.",
];

const ESCAPE_SEQUENCES: &[&str] = &[
    r"\\x[0-9a-f]{2}",
    r"\\u[0-9a-f]{4}",
    r"\\[0-7]{3}",
];

/// Case-insensitive token blocklist, compiled once.
#[derive(Debug, Clone)]
pub struct LexicalScreen {
    set: RegexSet,
    rules: Vec<(PatternCategory, Regex)>,
}

impl LexicalScreen {
    pub fn new(extra_patterns: &[String]) -> Result<Self> {
        let mut sources: Vec<(PatternCategory, String)> = Vec::new();
        let builtin = [
            (PatternCategory::DynamicEvaluation, DYNAMIC_EVALUATION),
            (PatternCategory::Introspection, INTROSPECTION),
            (PatternCategory::SystemModule, SYSTEM_MODULES),
            (PatternCategory::EscapeSequence, ESCAPE_SEQUENCES),
        ];
        for (category, patterns) in builtin {
            sources.extend(patterns.iter().map(|p| (category, p.to_string())));
        }
        sources.extend(
            extra_patterns
                .iter()
                .map(|p| (PatternCategory::Custom, p.to_lowercase())),
        );

        let set = RegexSet::new(sources.iter().map(|(_, p)| p.as_str()))
            .map_err(|e| Error::Config(format!("Invalid blocklist pattern: {}", e)))?;
        let rules = sources
            .into_iter()
            .map(|(category, p)| {
                Regex::new(&p)
                    .map(|re| (category, re))
                    .map_err(|e| Error::Config(format!("Invalid blocklist pattern: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { set, rules })
    }

    /// First blocklist hit in the lowercased text, if any.
    pub fn check(&self, text: &str) -> Option<BlockedPattern> {
        let lowered = text.to_lowercase();
        let index = self.set.matches(&lowered).into_iter().next()?;
        let (category, regex) = &self.rules[index];
        let pattern = regex
            .find(&lowered)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| regex.as_str().to_string());
        Some(BlockedPattern {
            category: *category,
            pattern,
        })
    }
}
