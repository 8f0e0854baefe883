use code_exec::{config::SandboxConfig, Error, LimitOverrides};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Startup configuration: the sandbox sections plus the `[tools]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Operations the manager refuses to run
    pub disabled: Vec<String>,
    /// Per-operation limit defaults, applied beneath caller overrides
    pub defaults: BTreeMap<String, LimitOverrides>,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> code_exec::Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        settings.sandbox.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> code_exec::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn defaults_for(&self, operation: &str) -> LimitOverrides {
        self.tools
            .defaults
            .get(operation)
            .copied()
            .unwrap_or_default()
    }
}
