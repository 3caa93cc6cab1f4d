use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use mcprobe_core::{
    load_mcp_servers, parse_server_args, CharRatioEstimator, ClientInfo, ProbeConfig,
    ProbeError, ServerDescriptor, VerificationResult, Verifier,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::render;

pub struct VerifyOptions {
    pub config: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub json: bool,
    pub servers: Vec<String>,
}

/// Collect servers from the `mcpServers` file and the trailing flags.
/// The configured `servers_file` is only used when neither is given.
fn collect_servers(opts: &VerifyOptions, config: &ProbeConfig) -> Result<Vec<ServerDescriptor>> {
    let mut servers = Vec::new();
    let file = opts
        .config
        .clone()
        .or_else(|| opts.servers.is_empty().then(|| config.servers_file.clone()).flatten());
    if let Some(path) = file {
        debug!("loading servers from {}", path.display());
        servers.extend(load_mcp_servers(&path)?);
    }
    servers.extend(parse_server_args(&opts.servers)?);
    Ok(servers)
}

fn to_json(server: &ServerDescriptor, outcome: &Result<VerificationResult, ProbeError>) -> Result<Value> {
    Ok(match outcome {
        Ok(result) => serde_json::to_value(result)?,
        Err(e) => json!({
            "server": server.name,
            "status": "error",
            "error": e.to_string(),
        }),
    })
}

/// Returns whether every server verified successfully.
pub async fn run(opts: VerifyOptions) -> Result<bool> {
    let config = ProbeConfig::load()?;
    let servers = collect_servers(&opts, &config)?;
    if servers.is_empty() {
        bail!("no servers to verify; pass --config FILE or server flags after --");
    }

    let timeout = opts
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.timeout());
    let verifier = Verifier::new(Arc::new(CharRatioEstimator::default()))
        .with_overhead(config.framing_overhead)
        .with_client_info(ClientInfo {
            name: config.client_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

    debug!("verifying {} server(s) with {:?} budget", servers.len(), timeout);
    let outcomes = verifier.verify_batch(&servers, timeout).await;

    let ok = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(r) if r.is_success()))
        .count();

    if opts.json {
        let entries = servers
            .iter()
            .zip(&outcomes)
            .map(|(s, o)| to_json(s, o))
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&Value::Array(entries))?);
    } else {
        let mut tokens = 0;
        for (server, outcome) in servers.iter().zip(&outcomes) {
            match outcome {
                Ok(result) => {
                    tokens += result
                        .capabilities()
                        .map(|c| c.total_tool_tokens)
                        .unwrap_or(0);
                    println!("{}", render::summary(result));
                }
                Err(e) => println!("{}", render::error_summary(&server.name, e)),
            }
        }
        println!();
        println!("{}", render::totals(ok, servers.len(), tokens));
    }

    Ok(ok == servers.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(config: Option<PathBuf>, servers: &[&str]) -> VerifyOptions {
        VerifyOptions {
            config,
            timeout_ms: None,
            json: false,
            servers: servers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn config_file_servers_come_before_flag_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{"mcpServers": {"docs": {"url": "https://example.com/mcp"}}}"#,
        )
        .unwrap();

        let servers = collect_servers(
            &opts(Some(path), &["--stdio", "fs", "npx", "-y", "server-fs"]),
            &ProbeConfig::default(),
        )
        .unwrap();
        let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["docs", "fs"]);
    }

    #[test]
    fn configured_servers_file_only_applies_without_flags() {
        let config = ProbeConfig {
            servers_file: Some(PathBuf::from("/definitely/not/here.json")),
            ..ProbeConfig::default()
        };
        let servers = collect_servers(&opts(None, &["--http", "a", "http://localhost:1"]), &config)
            .unwrap();
        assert_eq!(servers.len(), 1);
        assert!(collect_servers(&opts(None, &[]), &config).is_err());
    }

    #[test]
    fn task_errors_render_as_error_entries() {
        let server = ServerDescriptor::stdio("fs", "npx", ["x"]);
        let outcome = Err(ProbeError::TaskFailed {
            server: "fs".into(),
            reason: "panicked".into(),
        });
        let v = to_json(&server, &outcome).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["server"], "fs");
    }
}
