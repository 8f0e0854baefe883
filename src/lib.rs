//! Uniform tool interface over the sandboxed script executor and the
//! restricted calculator.
//!
//! Upstream callers pick an operation from [`ToolManager::capabilities`] and
//! call [`ToolManager::invoke`] with JSON parameters. Results come back as a
//! [`ToolOutput`]; interpreting them is left to the caller.

mod error;
mod manager;
mod settings;
pub mod tools;

pub use error::ToolError;
pub use manager::ToolManager;
pub use settings::{Settings, ToolsConfig};
pub use tools::{Capability, ParamSpec, ParamType, Tool, ToolOutput};
