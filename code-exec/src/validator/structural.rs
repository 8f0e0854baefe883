use rustpython_parser::{
    ast::{self, Expr, Pattern, Stmt},
    Parse,
};
use std::collections::HashSet;

use super::{UnsafeReason, ValidationVerdict};

const SOURCE_PATH: &str = "<guest>";

/// Syntax-tree screen for guest scripts.
///
/// The script is parsed in full so that unparsable input is reported as a
/// syntax error, then every statement, expression and pattern of the tree
/// is visited for forbidden constructs. String contents and keywords used in
/// other roles (`raise ... from`, `yield from`) never look like imports.
#[derive(Debug, Clone)]
pub struct StructuralScreen {
    allowed_imports: HashSet<String>,
}

type Check = Result<(), UnsafeReason>;

impl StructuralScreen {
    pub fn new(allowed_imports: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_imports: allowed_imports.into_iter().collect(),
        }
    }

    pub fn check(&self, code: &str) -> ValidationVerdict {
        let suite = match ast::Suite::parse(code, SOURCE_PATH) {
            Ok(suite) => suite,
            Err(e) => {
                return ValidationVerdict::SyntaxError {
                    message: e.error.to_string(),
                    offset: u32::from(e.offset) as usize,
                }
            }
        };

        match self.body(&suite) {
            Ok(()) => ValidationVerdict::Safe,
            Err(reason) => ValidationVerdict::Unsafe { reason },
        }
    }

    fn body(&self, stmts: &[Stmt]) -> Check {
        stmts.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&self, stmt: &Stmt) -> Check {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::AsyncFunctionDef(_) => {
                Err(UnsafeReason::FunctionDefinition)
            }
            Stmt::ClassDef(_) => Err(UnsafeReason::ClassDefinition),
            Stmt::Global(_) => Err(UnsafeReason::GlobalDeclaration),
            Stmt::Nonlocal(_) => Err(UnsafeReason::NonlocalDeclaration),
            Stmt::Import(node) => node
                .names
                .iter()
                .try_for_each(|alias| self.check_module(alias.name.as_str())),
            Stmt::ImportFrom(node) => {
                let module = node.module.as_ref().map(|m| m.as_str()).unwrap_or("");
                let level = node.level.as_ref().map(|l| l.to_usize()).unwrap_or(0);
                if level > 0 {
                    return Err(UnsafeReason::DisallowedImport {
                        module: format!("{}{}", ".".repeat(level), module),
                    });
                }
                self.check_module(module)
            }

            Stmt::Return(node) => self.opt_expr(node.value.as_deref()),
            Stmt::Delete(node) => self.exprs(&node.targets),
            Stmt::Assign(node) => {
                self.exprs(&node.targets)?;
                self.expr(&node.value)
            }
            Stmt::TypeAlias(node) => {
                self.expr(&node.name)?;
                self.expr(&node.value)
            }
            Stmt::AugAssign(node) => {
                self.expr(&node.target)?;
                self.expr(&node.value)
            }
            Stmt::AnnAssign(node) => {
                self.expr(&node.target)?;
                self.expr(&node.annotation)?;
                self.opt_expr(node.value.as_deref())
            }
            Stmt::For(node) => {
                self.expr(&node.target)?;
                self.expr(&node.iter)?;
                self.body(&node.body)?;
                self.body(&node.orelse)
            }
            Stmt::AsyncFor(node) => {
                self.expr(&node.target)?;
                self.expr(&node.iter)?;
                self.body(&node.body)?;
                self.body(&node.orelse)
            }
            Stmt::While(node) => {
                self.expr(&node.test)?;
                self.body(&node.body)?;
                self.body(&node.orelse)
            }
            Stmt::If(node) => {
                self.expr(&node.test)?;
                self.body(&node.body)?;
                self.body(&node.orelse)
            }
            Stmt::With(node) => {
                self.with_items(&node.items)?;
                self.body(&node.body)
            }
            Stmt::AsyncWith(node) => {
                self.with_items(&node.items)?;
                self.body(&node.body)
            }
            Stmt::Match(node) => {
                self.expr(&node.subject)?;
                node.cases.iter().try_for_each(|case| {
                    self.pattern(&case.pattern)?;
                    self.opt_expr(case.guard.as_deref())?;
                    self.body(&case.body)
                })
            }
            Stmt::Raise(node) => {
                self.opt_expr(node.exc.as_deref())?;
                self.opt_expr(node.cause.as_deref())
            }
            Stmt::Try(node) => {
                self.body(&node.body)?;
                self.handlers(&node.handlers)?;
                self.body(&node.orelse)?;
                self.body(&node.finalbody)
            }
            Stmt::TryStar(node) => {
                self.body(&node.body)?;
                self.handlers(&node.handlers)?;
                self.body(&node.orelse)?;
                self.body(&node.finalbody)
            }
            Stmt::Assert(node) => {
                self.expr(&node.test)?;
                self.opt_expr(node.msg.as_deref())
            }
            Stmt::Expr(node) => self.expr(&node.value),
            _ => Ok(()),
        }
    }

    fn handlers(&self, handlers: &[ast::ExceptHandler]) -> Check {
        handlers.iter().try_for_each(|handler| {
            let ast::ExceptHandler::ExceptHandler(handler) = handler;
            self.opt_expr(handler.type_.as_deref())?;
            self.body(&handler.body)
        })
    }

    fn with_items(&self, items: &[ast::WithItem]) -> Check {
        items.iter().try_for_each(|item| {
            self.expr(&item.context_expr)?;
            self.opt_expr(item.optional_vars.as_deref())
        })
    }

    fn exprs(&self, exprs: &[Expr]) -> Check {
        exprs.iter().try_for_each(|expr| self.expr(expr))
    }

    fn opt_expr(&self, expr: Option<&Expr>) -> Check {
        expr.map_or(Ok(()), |expr| self.expr(expr))
    }

    fn comprehensions(&self, generators: &[ast::Comprehension]) -> Check {
        generators.iter().try_for_each(|generator| {
            self.expr(&generator.target)?;
            self.expr(&generator.iter)?;
            self.exprs(&generator.ifs)
        })
    }

    fn expr(&self, expr: &Expr) -> Check {
        match expr {
            Expr::Lambda(_) => Err(UnsafeReason::FunctionDefinition),
            Expr::Attribute(node) => {
                if node.attr.as_str().starts_with("__") {
                    return Err(UnsafeReason::DunderAttribute {
                        name: node.attr.to_string(),
                    });
                }
                self.expr(&node.value)
            }

            Expr::BoolOp(node) => self.exprs(&node.values),
            Expr::NamedExpr(node) => {
                self.expr(&node.target)?;
                self.expr(&node.value)
            }
            Expr::BinOp(node) => {
                self.expr(&node.left)?;
                self.expr(&node.right)
            }
            Expr::UnaryOp(node) => self.expr(&node.operand),
            Expr::IfExp(node) => {
                self.expr(&node.test)?;
                self.expr(&node.body)?;
                self.expr(&node.orelse)
            }
            Expr::Dict(node) => {
                node.keys
                    .iter()
                    .try_for_each(|key| self.opt_expr(key.as_ref()))?;
                self.exprs(&node.values)
            }
            Expr::Set(node) => self.exprs(&node.elts),
            Expr::List(node) => self.exprs(&node.elts),
            Expr::Tuple(node) => self.exprs(&node.elts),
            Expr::ListComp(node) => {
                self.expr(&node.elt)?;
                self.comprehensions(&node.generators)
            }
            Expr::SetComp(node) => {
                self.expr(&node.elt)?;
                self.comprehensions(&node.generators)
            }
            Expr::GeneratorExp(node) => {
                self.expr(&node.elt)?;
                self.comprehensions(&node.generators)
            }
            Expr::DictComp(node) => {
                self.expr(&node.key)?;
                self.expr(&node.value)?;
                self.comprehensions(&node.generators)
            }
            Expr::Await(node) => self.expr(&node.value),
            Expr::Yield(node) => self.opt_expr(node.value.as_deref()),
            Expr::YieldFrom(node) => self.expr(&node.value),
            Expr::Compare(node) => {
                self.expr(&node.left)?;
                self.exprs(&node.comparators)
            }
            Expr::Call(node) => {
                self.expr(&node.func)?;
                self.exprs(&node.args)?;
                node.keywords
                    .iter()
                    .try_for_each(|keyword| self.expr(&keyword.value))
            }
            Expr::FormattedValue(node) => {
                self.expr(&node.value)?;
                self.opt_expr(node.format_spec.as_deref())
            }
            Expr::JoinedStr(node) => self.exprs(&node.values),
            Expr::Subscript(node) => {
                self.expr(&node.value)?;
                self.expr(&node.slice)
            }
            Expr::Starred(node) => self.expr(&node.value),
            Expr::Slice(node) => {
                self.opt_expr(node.lower.as_deref())?;
                self.opt_expr(node.upper.as_deref())?;
                self.opt_expr(node.step.as_deref())
            }
            _ => Ok(()),
        }
    }

    fn patterns(&self, patterns: &[Pattern]) -> Check {
        patterns.iter().try_for_each(|pattern| self.pattern(pattern))
    }

    fn pattern(&self, pattern: &Pattern) -> Check {
        match pattern {
            Pattern::MatchValue(node) => self.expr(&node.value),
            Pattern::MatchSequence(node) => self.patterns(&node.patterns),
            Pattern::MatchMapping(node) => {
                self.exprs(&node.keys)?;
                self.patterns(&node.patterns)
            }
            Pattern::MatchClass(node) => {
                self.expr(&node.cls)?;
                self.patterns(&node.patterns)?;
                self.patterns(&node.kwd_patterns)
            }
            Pattern::MatchAs(node) => match node.pattern.as_deref() {
                Some(inner) => self.pattern(inner),
                None => Ok(()),
            },
            Pattern::MatchOr(node) => self.patterns(&node.patterns),
            _ => Ok(()),
        }
    }

    fn check_module(&self, module: &str) -> Check {
        let base = module.split('.').next().unwrap_or(module);
        if self.allowed_imports.contains(base) {
            Ok(())
        } else {
            Err(UnsafeReason::DisallowedImport {
                module: module.to_string(),
            })
        }
    }
}
