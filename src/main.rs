use anyhow::Context;
use clap::{Parser, Subcommand};
use exercise_sandbox::{Settings, ToolManager};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of concurrent executions
    #[arg(short, long, env = "SANDBOX_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the enabled operations and their parameters
    Capabilities,
    /// Run one operation and print its result as JSON
    Invoke {
        /// Operation name, e.g. `calculate` or `execute`
        operation: String,

        /// JSON object of parameters, or `-` to read it from stdin
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries JSON only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(max_concurrent) = args.max_concurrent {
        settings.sandbox.execution.max_concurrent = max_concurrent;
    }

    let manager = ToolManager::new(&settings)?;

    match args.command {
        Command::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&manager.capabilities())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Invoke { operation, params } => {
            let raw = if params == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                params
            };
            let params: Value = serde_json::from_str(&raw).context("parsing --params")?;

            match manager.invoke(&operation, params).await {
                Ok(output) => {
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    let report = json!({ "error": { "kind": e.kind(), "message": e.to_string() } });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
