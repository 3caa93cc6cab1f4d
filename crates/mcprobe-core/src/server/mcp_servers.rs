use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;

use super::descriptor::{ServerDescriptor, ServerTransport, TransportKind};

/// One entry of an `mcpServers` map as MCP clients write it.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    disabled: bool,
}

/// Parse an `mcpServers` document into descriptors ordered by server name.
///
/// Accepts either `{"mcpServers": {...}}` or the bare map. Entries with
/// `"disabled": true` are skipped.
pub fn parse_mcp_servers(doc: &Value) -> Result<Vec<ServerDescriptor>, ParseError> {
    let servers = doc.get("mcpServers").unwrap_or(doc);
    let map = servers
        .as_object()
        .ok_or_else(|| ParseError::InvalidConfig {
            name: "mcpServers".into(),
            reason: "expected an object of servers".into(),
        })?;

    let mut out = Vec::with_capacity(map.len());
    for (name, raw) in map {
        let entry: ServerEntry =
            serde_json::from_value(raw.clone()).map_err(|e| ParseError::InvalidConfig {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        if entry.disabled {
            continue;
        }
        out.push(entry_to_descriptor(name, entry)?);
    }
    Ok(out)
}

fn entry_to_descriptor(name: &str, entry: ServerEntry) -> Result<ServerDescriptor, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidConfig {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let kind = match entry.kind.as_deref() {
        Some(k) => k.parse::<TransportKind>().map_err(|e| invalid(&e))?,
        None if entry.url.is_some() => TransportKind::Streamed,
        None => TransportKind::Stdio,
    };

    let transport = match kind {
        TransportKind::Stdio => {
            if entry.url.is_some() {
                return Err(invalid("stdio server must not set 'url'"));
            }
            let command = entry.command.ok_or_else(|| invalid("missing 'command'"))?;
            ServerTransport::Stdio {
                command,
                args: entry.args,
                env: entry.env,
            }
        }
        TransportKind::Streamed => {
            if entry.command.is_some() {
                return Err(invalid("streamed server must not set 'command'"));
            }
            let url = entry.url.ok_or_else(|| invalid("missing 'url'"))?;
            ServerTransport::Streamed {
                url,
                headers: entry.headers,
            }
        }
    };

    let descriptor = ServerDescriptor {
        name: name.to_string(),
        transport,
    };
    descriptor.validate().map_err(|e| invalid(&e.to_string()))?;
    Ok(descriptor)
}

/// Read and parse an `mcpServers` file.
pub fn load_mcp_servers(path: &Path) -> Result<Vec<ServerDescriptor>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let doc: Value = serde_json::from_str(&data)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let servers = parse_mcp_servers(&doc)?;
    Ok(servers)
}
