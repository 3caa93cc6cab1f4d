use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::VerifyError;
use crate::server::ServerDescriptor;

use super::transport::Transport;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Upper bound on `tools/list` pages, against servers that loop cursors.
const MAX_TOOL_PAGES: usize = 100;

// ── MCP capability types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// How this client introduces itself in `initialize`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcprobe".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Everything learned from a completed handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: String,
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<ToolDescriptor>,
    /// The first `tools/list` result with its `tools` array emptied.
    pub envelope: Value,
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct Session {
    pub server_name: String,
    client: ClientInfo,
    transport: Transport,
}

impl Session {
    /// Spawn the process or prepare the connection. No protocol traffic yet.
    pub fn open(descriptor: &ServerDescriptor, client: &ClientInfo) -> Result<Self, VerifyError> {
        Ok(Self {
            server_name: descriptor.name.clone(),
            client: client.clone(),
            transport: Transport::open(descriptor)?,
        })
    }

    /// `initialize`, `notifications/initialized`, then `tools/list` until the
    /// cursor runs out.
    pub async fn handshake(&mut self) -> Result<Handshake, VerifyError> {
        let (protocol_version, server_info) = self.initialize().await?;
        let (tools, envelope) = self.list_tools().await?;
        Ok(Handshake {
            protocol_version,
            server_info,
            tools,
            envelope,
        })
    }

    async fn initialize(&mut self) -> Result<(String, Option<ServerInfo>), VerifyError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.client.name,
                "version": self.client.version
            }
        });

        let result = self.transport.request("initialize", Some(params)).await?;
        let protocol_version = result["protocolVersion"]
            .as_str()
            .ok_or_else(|| VerifyError::protocol("initialize: missing 'protocolVersion'"))?
            .to_string();
        if !result["capabilities"].is_object() {
            return Err(VerifyError::protocol("initialize: missing 'capabilities' object"));
        }
        let server_info = serde_json::from_value::<ServerInfo>(result["serverInfo"].clone()).ok();

        info!(
            "MCP connected: {} → {} (protocol {})",
            self.server_name,
            server_info.as_ref().map_or("unknown", |s| s.name.as_str()),
            protocol_version
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok((protocol_version, server_info))
    }

    async fn list_tools(&mut self) -> Result<(Vec<ToolDescriptor>, Value), VerifyError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut envelope = None;
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut result = self.transport.request("tools/list", params).await?;
            let page = result
                .get_mut("tools")
                .map(Value::take)
                .ok_or_else(|| VerifyError::protocol("tools/list: missing 'tools' array"))?;
            let page = page
                .as_array()
                .ok_or_else(|| VerifyError::protocol("tools/list: 'tools' is not an array"))?;

            for raw in page {
                let tool = parse_tool(raw)?;
                if !seen.insert(tool.name.clone()) {
                    return Err(VerifyError::protocol(format!(
                        "tools/list: duplicate tool name '{}'",
                        tool.name
                    )));
                }
                tools.push(tool);
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if envelope.is_none() {
                result["tools"] = json!([]);
                envelope = Some(result);
            }
            if cursor.is_none() {
                debug!("{}: {} tool(s) listed", self.server_name, tools.len());
                return Ok((tools, envelope.unwrap_or_else(|| json!({ "tools": [] }))));
            }
        }

        Err(VerifyError::protocol(format!(
            "tools/list: still paginating after {MAX_TOOL_PAGES} pages"
        )))
    }

    /// Tear the connection down. Returns captured stderr for stdio servers.
    pub async fn close(self) -> Option<String> {
        debug!("closing MCP session {}", self.server_name);
        self.transport.close().await
    }
}

fn parse_tool(raw: &Value) -> Result<ToolDescriptor, VerifyError> {
    let name = raw["name"]
        .as_str()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| VerifyError::protocol("tools/list: tool without a 'name'"))?;
    let description = match &raw["description"] {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        _ => {
            return Err(VerifyError::protocol(format!(
                "tools/list: tool '{name}' has a non-string 'description'"
            )))
        }
    };
    let input_schema = raw["inputSchema"].clone();
    if !input_schema.is_object() {
        return Err(VerifyError::protocol(format!(
            "tools/list: tool '{name}' has no 'inputSchema' object"
        )));
    }
    Ok(ToolDescriptor {
        name: name.to_string(),
        description,
        input_schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_accepts_missing_description() {
        let tool = parse_tool(&json!({
            "name": "echo",
            "inputSchema": { "type": "object" }
        }))
        .unwrap();
        assert_eq!(tool.description, "");
    }

    #[test]
    fn parse_tool_rejects_bad_shapes() {
        assert!(parse_tool(&json!({ "inputSchema": {} })).is_err());
        assert!(parse_tool(&json!({ "name": "x" })).is_err());
        assert!(parse_tool(&json!({ "name": "x", "inputSchema": "object" })).is_err());
        assert!(parse_tool(&json!({ "name": "x", "description": 3, "inputSchema": {} })).is_err());
    }

    #[cfg(unix)]
    mod stdio {
        use super::*;

        const INIT_RESPONSE: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.0.1"}}}"#;

        /// Minimal line-oriented MCP server in sh. Request ids are
        /// deterministic: 1 = initialize, 2.. = tools/list pages.
        fn server_script(after_init: &str) -> String {
            format!(
                "read line; echo 'starting up (not json)'; echo '{INIT_RESPONSE}'; \
                 read line; {after_init} while read line; do :; done"
            )
        }

        /// Wait for one request, then answer it.
        fn reply(json: &str) -> String {
            format!("read line; echo '{json}'; ")
        }

        fn descriptor(script: String) -> ServerDescriptor {
            ServerDescriptor::stdio("fake", "sh", ["-c".to_string(), script])
        }

        #[tokio::test]
        async fn handshake_collects_paginated_tools() {
            let script = server_script(&format!(
                "read line; echo '{}'; echo '{}'; {}",
                r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#,
                r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"a","description":"first","inputSchema":{"type":"object"}}],"nextCursor":"p2"}}"#,
                reply(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"b","inputSchema":{"type":"object"}}]}}"#),
            ));

            let mut session = Session::open(&descriptor(script), &ClientInfo::default()).unwrap();
            let handshake = session.handshake().await.unwrap();
            session.close().await;

            assert_eq!(handshake.protocol_version, "2025-06-18");
            assert_eq!(
                handshake.server_info,
                Some(ServerInfo {
                    name: "fake".into(),
                    version: Some("0.0.1".into())
                })
            );
            let names: Vec<_> = handshake.tools.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, ["a", "b"]);
            assert_eq!(handshake.envelope, json!({ "tools": [], "nextCursor": "p2" }));
        }

        #[tokio::test]
        async fn duplicate_tool_names_are_a_protocol_error() {
            let script = server_script(&reply(
                r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"x","inputSchema":{}},{"name":"x","inputSchema":{}}]}}"#,
            ));
            let mut session = Session::open(&descriptor(script), &ClientInfo::default()).unwrap();
            let err = session.handshake().await.unwrap_err();
            session.close().await;
            assert!(matches!(err, VerifyError::Protocol(ref m) if m.contains("duplicate")));
        }

        #[tokio::test]
        async fn mismatched_response_id_is_a_protocol_error() {
            let script = server_script(&reply(r#"{"jsonrpc":"2.0","id":99,"result":{"tools":[]}}"#));
            let mut session = Session::open(&descriptor(script), &ClientInfo::default()).unwrap();
            let err = session.handshake().await.unwrap_err();
            session.close().await;
            assert!(matches!(err, VerifyError::Protocol(ref m) if m.contains("does not match")));
        }

        #[tokio::test]
        async fn missing_protocol_version_is_a_protocol_error() {
            let script = "read line; echo '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"capabilities\":{}}}'; while read line; do :; done";
            let mut session =
                Session::open(&descriptor(script.to_string()), &ClientInfo::default()).unwrap();
            let err = session.handshake().await.unwrap_err();
            session.close().await;
            assert!(matches!(err, VerifyError::Protocol(ref m) if m.contains("protocolVersion")));
        }
    }
}
