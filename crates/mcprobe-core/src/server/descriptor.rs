use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Streamed,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Streamed => write!(f, "streamed"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" | "sse" | "streamable-http" | "streamablehttp" | "streamed" => {
                Ok(Self::Streamed)
            }
            other => Err(format!("unknown transport type: {other}")),
        }
    }
}

/// Connection parameters, one variant per transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Streamed {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// One tool server to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub transport: ServerTransport,
}

impl ServerDescriptor {
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
            },
        }
    }

    pub fn streamed(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Streamed {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        }
    }

    /// Add an environment variable. No effect on streamed servers.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let ServerTransport::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Add a request header. No effect on stdio servers.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let ServerTransport::Streamed { headers, .. } = &mut self.transport {
            headers.insert(key.into(), value.into());
        }
        self
    }

    pub fn transport_kind(&self) -> TransportKind {
        match self.transport {
            ServerTransport::Stdio { .. } => TransportKind::Stdio,
            ServerTransport::Streamed { .. } => TransportKind::Streamed,
        }
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        match &self.transport {
            ServerTransport::Stdio { command, .. } if command.trim().is_empty() => {
                Err(DescriptorError::EmptyCommand(self.name.clone()))
            }
            ServerTransport::Stdio { env, .. } => {
                match env.keys().find(|k| k.is_empty() || k.contains('=')) {
                    Some(key) => Err(DescriptorError::InvalidEnvKey {
                        name: self.name.clone(),
                        key: key.clone(),
                    }),
                    None => Ok(()),
                }
            }
            ServerTransport::Streamed { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Err(DescriptorError::InvalidUrl {
                    name: self.name.clone(),
                    url: url.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Render this descriptor as the flag sequence accepted by
    /// [`parse_server_args`](super::args::parse_server_args).
    ///
    /// Env entries follow the stdio arguments; `--env` is a recognized flag
    /// and terminates the argument vector. Arguments that are themselves
    /// recognized flags cannot be represented, and neither can env keys
    /// containing `=`; [`validate`](Self::validate) rejects the latter.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        match &self.transport {
            ServerTransport::Stdio { command, args, env } => {
                out.push("--stdio".to_string());
                out.push(self.name.clone());
                out.push(command.clone());
                out.extend(args.iter().cloned());
                for (k, v) in env {
                    out.push("--env".to_string());
                    out.push(format!("{k}={v}"));
                }
            }
            ServerTransport::Streamed { url, headers } => {
                out.push("--http".to_string());
                out.push(self.name.clone());
                out.push(url.clone());
                for (k, v) in headers {
                    out.push("--header".to_string());
                    out.push(k.clone());
                    out.push(v.clone());
                }
            }
        }
        out
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            ServerTransport::Stdio { command, args, .. } => {
                write!(f, "{} (stdio: {}", self.name, command)?;
                for a in args {
                    write!(f, " {a}")?;
                }
                write!(f, ")")
            }
            ServerTransport::Streamed { url, .. } => write!(f, "{} (streamed: {})", self.name, url),
        }
    }
}
