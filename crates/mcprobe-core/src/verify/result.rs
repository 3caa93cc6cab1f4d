use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::mcp::{ServerInfo, ToolDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Success,
    Failure,
    Timeout,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// What a server advertised, priced in tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    pub protocol_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<ToolDescriptor>,
    /// One entry per tool, keyed by tool name.
    pub tool_token_counts: BTreeMap<String, usize>,
    /// Sum of `tool_token_counts` plus the list framing overhead.
    pub total_tool_tokens: usize,
}

impl Capabilities {
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }
}

/// Outcome of one verification attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    server: String,
    status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl VerificationResult {
    pub fn success(
        server: impl Into<String>,
        connection_time: Duration,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            server: server.into(),
            status: VerificationStatus::Success,
            connection_time_ms: Some(u64::try_from(connection_time.as_millis()).unwrap_or(u64::MAX)),
            capabilities: Some(capabilities),
            error: None,
        }
    }

    pub fn failure(server: impl Into<String>, error: impl Into<String>) -> Self {
        Self::unsuccessful(server, VerificationStatus::Failure, error)
    }

    pub fn timeout(server: impl Into<String>, error: impl Into<String>) -> Self {
        Self::unsuccessful(server, VerificationStatus::Timeout, error)
    }

    fn unsuccessful(
        server: impl Into<String>,
        status: VerificationStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            status,
            connection_time_ms: None,
            capabilities: None,
            error: Some(error.into()),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == VerificationStatus::Success
    }

    pub fn connection_time_ms(&self) -> Option<u64> {
        self.connection_time_ms
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
