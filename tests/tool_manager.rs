use assert_fs::prelude::*;
use code_exec::{CalculationResult, ExecutionStatus, RootClassification, Value as CalcValue};
use exercise_sandbox::{Settings, ToolError, ToolManager};
use serde_json::json;

fn manager() -> ToolManager {
    ToolManager::new(&Settings::default()).unwrap()
}

fn python_missing() -> bool {
    if which::which("python3").is_err() {
        eprintln!("Skipping test: python3 not available");
        return true;
    }
    false
}

#[tokio::test]
async fn test_calculate() -> Result<(), ToolError> {
    let output = manager()
        .invoke("calculate", json!({ "expression": "2 + 3 * 4" }))
        .await?;
    let result = output.calculation().unwrap();
    assert_eq!(result.value(), Some(&CalcValue::Number(14.0)));

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["kind"], "calculation");
    assert_eq!(json["operation"], "evaluation");
    assert_eq!(json["value"], 14.0);
    Ok(())
}

#[tokio::test]
async fn test_solve_quadratic_camel_case() -> Result<(), ToolError> {
    let output = manager()
        .invoke("solveQuadratic", json!({ "a": 1, "b": 5, "c": 6 }))
        .await?;
    let solution = output.calculation().and_then(|r| r.quadratic()).unwrap();
    assert_eq!(solution.classification, RootClassification::TwoReal);
    assert_eq!(
        solution.roots.iter().map(|r| r.re).collect::<Vec<_>>(),
        vec![-3.0, -2.0]
    );
    Ok(())
}

#[tokio::test]
async fn test_verify_solution_default_tolerance() -> Result<(), ToolError> {
    let output = manager()
        .invoke(
            "verify_solution",
            json!({ "expression": "x^2 + 5x + 6", "variable": "x", "value": -3 }),
        )
        .await?;
    match output.calculation().unwrap() {
        CalculationResult::Verification {
            tolerance,
            within_tolerance,
            ..
        } => {
            assert_eq!(*tolerance, 1e-9);
            assert!(within_tolerance);
        }
        other => panic!("unexpected result {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_calculator_errors_keep_their_kind() {
    let manager = manager();

    let err = manager
        .invoke("calculate", json!({ "expression": "factorial(1001)" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = manager
        .invoke("calculate", json!({ "expression": "sqrt(-1)" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "runtime_failure");

    let err = manager
        .invoke("calculate", json!({ "expression": "__import__('os')" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Exec(code_exec::Error::Rejected(_))));
}

#[tokio::test]
async fn test_unknown_operation() {
    let err = manager()
        .invoke("shell", json!({ "cmd": "id" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::UnknownOperation(ref name) if name == "shell"));
    assert_eq!(err.kind(), "unknown_operation");
}

#[tokio::test]
async fn test_invalid_params() {
    let manager = manager();
    for (operation, params) in [
        ("calculate", json!({})),
        ("solve_quadratic", json!({ "a": 1, "b": "two", "c": 3 })),
        ("validate_solution", json!({ "code": "print(1)" })),
    ] {
        let err = manager.invoke(operation, params).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_params", "{}", operation);
    }
}

#[tokio::test]
async fn test_disabled_operation() {
    let mut settings = Settings::default();
    settings.tools.disabled = vec!["execute".to_string()];
    let manager = ToolManager::new(&settings).unwrap();

    let err = manager
        .invoke("execute", json!({ "code": "print(1)" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Disabled(_)));
    assert!(!manager.is_enabled("execute"));
    assert!(manager
        .capabilities()
        .iter()
        .all(|capability| capability.name != "execute"));
}

#[test]
fn test_disabled_names_accept_either_spelling() {
    let settings = Settings::from_toml_str(
        r#"
[tools]
disabled = ["runTestCase", "verify_solution"]
"#,
    )
    .unwrap();
    let manager = ToolManager::new(&settings).unwrap();
    assert!(!manager.is_enabled("run_test_case"));
    assert!(!manager.is_enabled("verifySolution"));
    assert!(manager.is_enabled("execute"));
}

#[test]
fn test_unknown_names_in_settings_are_rejected() {
    let mut settings = Settings::default();
    settings.tools.disabled = vec!["rm".to_string()];
    assert!(matches!(
        ToolManager::new(&settings),
        Err(ToolError::UnknownOperation(_))
    ));

    let mut settings = Settings::default();
    settings
        .tools
        .defaults
        .insert("nope".to_string(), Default::default());
    assert!(ToolManager::new(&settings).is_err());
}

#[test]
fn test_capabilities() {
    let capabilities = manager().capabilities();
    let mut names: Vec<_> = capabilities.iter().map(|c| c.name).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "calculate",
            "execute",
            "run_test_case",
            "solve_quadratic",
            "validate_solution",
            "verify_solution"
        ]
    );

    let execute = capabilities.iter().find(|c| c.name == "execute").unwrap();
    let code = execute.params.iter().find(|p| p.name == "code").unwrap();
    assert!(code.required);
    let timeout = execute
        .params
        .iter()
        .find(|p| p.name == "timeout_seconds")
        .unwrap();
    assert_eq!(timeout.default, Some(json!(5.0)));
}

#[test]
fn test_config_file_defaults_show_in_capabilities() {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("sandbox.toml");
    file.write_str(
        r#"
[execution.default_limits]
timeout_seconds = 3.0

[tools.defaults.validate_solution]
timeout_seconds = 10.0
memory_mb = 4096
"#,
    )
    .unwrap();

    let settings = Settings::from_file(file.path()).unwrap();
    let manager = ToolManager::new(&settings).unwrap();
    let capabilities = manager.capabilities();
    let default_of = |operation: &str, param: &str| {
        capabilities
            .iter()
            .find(|c| c.name == operation)
            .and_then(|c| c.params.iter().find(|p| p.name == param))
            .and_then(|p| p.default.clone())
    };

    assert_eq!(default_of("execute", "timeout_seconds"), Some(json!(3.0)));
    assert_eq!(
        default_of("validate_solution", "timeout_seconds"),
        Some(json!(10.0))
    );
    // Clamped to the 512 MiB ceiling
    assert_eq!(default_of("validate_solution", "memory_mb"), Some(json!(512)));
}

#[test]
fn test_missing_config_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    let err = Settings::from_file(dir.child("absent.toml").path()).unwrap_err();
    assert!(matches!(err, code_exec::Error::Config(_)));
}

#[tokio::test]
async fn test_execute_with_camel_case_params() -> Result<(), ToolError> {
    if python_missing() {
        return Ok(());
    }
    let output = manager()
        .invoke(
            "execute",
            json!({
                "code": "n = int(input())\nprint(n + 1)",
                "testCases": [
                    { "input": "1", "expectedOutput": "2" },
                    { "input": "41", "expectedOutput": "42" }
                ],
                "timeoutSeconds": 3
            }),
        )
        .await?;
    let result = output.execution().unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(result.test_results.iter().all(|r| r.passed));
    assert!(result.summary.as_ref().unwrap().all_passed);

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["kind"], "execution");
    assert_eq!(json["status"], "completed");
    Ok(())
}

#[tokio::test]
async fn test_execute_expression_reports_result() -> Result<(), ToolError> {
    if python_missing() {
        return Ok(());
    }
    let output = manager()
        .invoke("execute", json!({ "code": "2 + 3 * 4" }))
        .await?;
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["kind"], "execution");
    assert_eq!(json["execution_type"], "expression");
    assert_eq!(json["result"], 14);
    Ok(())
}

#[tokio::test]
async fn test_rejected_script_is_a_result_not_an_error() -> Result<(), ToolError> {
    let output = manager()
        .invoke("execute", json!({ "code": "import os\nos.system('id')" }))
        .await?;
    let result = output.execution().unwrap();
    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.stdout.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_timeout_override() {
    let err = manager()
        .invoke("execute", json!({ "code": "print(1)", "timeout_seconds": -1 }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}
