use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use which::which;

use crate::{
    error::Error,
    executor::{LanguageExecutor, LaunchPlan},
    sandbox::Sandbox,
    types::SafetyFlag,
    Result,
};

const SOURCE_FILE: &str = "source.py";
const HARNESS_FILE: &str = "runner.py";

/// Runs the guest script and appends a JSON report to stdout.
///
/// argv: `runner.py <source> <marker>`. The test input is read from stdin
/// up front, exposed as `input_data` and replayed through `sys.stdin`. A
/// script that compiles as a single expression is evaluated and its value
/// reported; anything else runs as statements. Exceptions are printed
/// without the harness frame and exit with status 1, so no report is written.
const HARNESS: &str = r#"import io
import json
import math
import reprlib
import sys
import traceback
import types

MAX_ITEMS = 20
MAX_DEPTH = 3
MAX_TEXT = 200
MAX_VARIABLES = 50
MAX_REPORT = 4096


def clip(text):
    return text if len(text) <= MAX_TEXT else text[:MAX_TEXT] + "..."


def encode(value, depth=0):
    if value is None or isinstance(value, bool):
        return value
    if isinstance(value, int):
        bits = value.bit_length()
        return value if bits <= 53 else "<int of %d bits>" % bits
    if isinstance(value, float):
        return value if math.isfinite(value) else repr(value)
    if isinstance(value, str):
        return clip(value)
    if depth < MAX_DEPTH:
        if isinstance(value, (list, tuple, set, frozenset)):
            items = []
            for item in value:
                if len(items) == MAX_ITEMS:
                    break
                items.append(encode(item, depth + 1))
            return items
        if isinstance(value, dict):
            items = {}
            for key, item in value.items():
                if len(items) == MAX_ITEMS:
                    break
                name = key if isinstance(key, str) else str(encode(key, MAX_DEPTH))
                items[clip(name)] = encode(item, depth + 1)
            return items
    try:
        return clip(reprlib.repr(value))
    except Exception:
        return "<%s>" % type(value).__name__


def visible(name, value):
    return not (
        name.startswith("_")
        or name == "input_data"
        or callable(value)
        or isinstance(value, types.ModuleType)
    )


def main():
    source_path, marker = sys.argv[1], sys.argv[2]
    sys.argv = [source_path]
    with open(source_path, encoding="utf-8") as handle:
        source = handle.read()

    input_data = sys.stdin.read()
    sys.stdin = io.StringIO(input_data)
    namespace = {
        "__name__": "__main__",
        "__builtins__": __builtins__,
        "input_data": input_data,
    }

    try:
        code = compile(source, source_path, "eval")
        mode = "expression"
    except SyntaxError:
        code = compile(source, source_path, "exec")
        mode = "statement"

    try:
        value = eval(code, namespace)
    except SystemExit:
        raise
    except BaseException as exc:
        traceback.print_exception(type(exc), exc, exc.__traceback__.tb_next)
        sys.exit(1)

    variables = {}
    truncated = False
    for name, item in list(namespace.items()):
        if not visible(name, item):
            continue
        if len(variables) == MAX_VARIABLES:
            truncated = True
            break
        variables[name] = encode(item)

    report = {
        "execution_type": mode,
        "result": encode(value) if mode == "expression" else None,
        "variables": variables,
        "variables_truncated": truncated,
    }
    text = json.dumps(report)
    if len(text) > MAX_REPORT:
        report["variables"] = {}
        report["variables_truncated"] = True
        text = json.dumps(report)
    if len(text) > MAX_REPORT:
        report["result"] = "<result too large>"
        text = json.dumps(report)

    sys.stdout.write("\n" + marker + text + "\n")
    sys.stdout.flush()


main()
"#;

/// CPython guest runtime.
///
/// The interpreter runs in isolated mode (`-I`: no user site, no `PYTHON*`
/// variables, script directory not on `sys.path`), without `site` (`-S`)
/// and without writing bytecode (`-B`).
pub struct PythonExecutor {
    interpreter: String,
}

impl PythonExecutor {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl LanguageExecutor for PythonExecutor {
    fn file_extension(&self) -> &str {
        "py"
    }

    fn interpreter(&self) -> Result<PathBuf> {
        let path = which(&self.interpreter).map_err(|e| {
            Error::System(format!("Interpreter {} not found: {}", self.interpreter, e))
        })?;
        debug!("Using interpreter {}", path.display());
        Ok(path)
    }

    fn run_args(&self, source_file: &Path) -> Vec<String> {
        vec![
            "-I".to_string(),
            "-S".to_string(),
            "-B".to_string(),
            source_file.display().to_string(),
        ]
    }

    async fn prepare(&self, sandbox: &Sandbox, code: &str) -> Result<LaunchPlan> {
        let source_file = sandbox.write_file(SOURCE_FILE, code).await?;
        let harness = sandbox.write_file(HARNESS_FILE, HARNESS).await?;
        let marker = format!("@@exec-report-{}@@", Uuid::new_v4().simple());

        let mut args = self.run_args(&harness);
        args.push(source_file.display().to_string());
        args.push(marker.clone());
        Ok(LaunchPlan {
            args,
            report_marker: Some(marker),
        })
    }

    fn limit_from_stderr(&self, stderr: &str) -> Option<SafetyFlag> {
        // Allocation failures under RLIMIT_AS surface as a Python exception.
        stderr
            .lines()
            .any(|line| line.starts_with("MemoryError"))
            .then_some(SafetyFlag::MemoryLimit)
    }
}
