use crate::tokens::FramingOverhead;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for a probe run.
///
/// Example `~/.mcprobe/config.json` (or `.mcprobe.json` in the working directory):
/// ```json
/// {
///   "timeout_ms": 15000,
///   "framing_overhead": { "fixed": 40 },
///   "servers_file": "/home/me/.cursor/mcp.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Handshake budget per server, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub framing_overhead: FramingOverhead,
    /// Name sent as `clientInfo.name` during `initialize`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// `mcpServers` file verified when no servers are named on the command line.
    #[serde(default)]
    pub servers_file: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_client_name() -> String {
    "mcprobe".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            framing_overhead: FramingOverhead::default(),
            client_name: default_client_name(),
            servers_file: None,
        }
    }
}

impl ProbeConfig {
    /// Global config, then the working directory's `.mcprobe.json` on top,
    /// then `MCPROBE_TIMEOUT_MS`.
    pub fn load() -> Result<Self> {
        let local = std::env::current_dir()
            .ok()
            .map(|d| d.join(".mcprobe.json"))
            .filter(|p| p.exists());
        let mut config = Self::load_layers(&Self::resolve_path("config.json"), local.as_deref())?;

        if let Ok(raw) = std::env::var("MCPROBE_TIMEOUT_MS") {
            config.timeout_ms = raw
                .parse()
                .with_context(|| format!("MCPROBE_TIMEOUT_MS is not a number: {raw}"))?;
        }
        Ok(config)
    }

    /// Read `global` (when it exists) and shallow-merge `local` over it.
    pub fn load_layers(global: &Path, local: Option<&Path>) -> Result<Self> {
        let mut config = if global.exists() {
            let data = std::fs::read_to_string(global)
                .with_context(|| format!("failed to read {}", global.display()))?;
            serde_json::from_str::<ProbeConfig>(&data)
                .with_context(|| format!("invalid config in {}", global.display()))?
        } else {
            ProbeConfig::default()
        };

        if let Some(local) = local {
            let data = std::fs::read_to_string(local)
                .with_context(|| format!("failed to read {}", local.display()))?;
            let override_val: serde_json::Value = serde_json::from_str(&data)
                .with_context(|| format!("invalid config in {}", local.display()))?;
            let mut base = serde_json::to_value(&config)?;
            if let (Some(base_obj), Some(over_obj)) =
                (base.as_object_mut(), override_val.as_object())
            {
                for (k, v) in over_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            config = serde_json::from_value(base)?;
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mcprobe")
            .join(relative)
    }
}
