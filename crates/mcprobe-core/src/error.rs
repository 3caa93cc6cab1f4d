use thiserror::Error;

/// Malformed server flag sequence or `mcpServers` document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{flag} must be followed by a server name")]
    MissingName { flag: String },
    #[error("stdio server '{name}' is missing a command")]
    MissingCommand { name: String },
    #[error("streamed server '{name}' is missing a URL")]
    MissingUrl { name: String },
    #[error("unknown flag '{flag}'")]
    UnknownFlag { flag: String },
    #[error("unexpected argument '{token}'")]
    UnexpectedToken { token: String },
    #[error("{flag} expects a key and a value")]
    MissingHeaderValue { flag: String },
    #[error("{flag} can only follow a streamed server")]
    HeaderOutsideStreamed { flag: String },
    #[error("{flag} can only follow a stdio server")]
    EnvOutsideStdio { flag: String },
    #[error("invalid environment assignment '{token}', expected KEY=VALUE")]
    InvalidEnv { token: String },
    #[error("server '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// A descriptor that breaks its own invariants. Raised for caller bugs,
/// never for a misbehaving server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("server name must not be empty")]
    EmptyName,
    #[error("server '{0}': command must not be empty")]
    EmptyCommand(String),
    #[error("server '{name}': invalid environment variable name '{key}'")]
    InvalidEnvKey { name: String, key: String },
    #[error("server '{name}': '{url}' is not an http(s) URL")]
    InvalidUrl { name: String, url: String },
}

/// Why a single verification attempt did not succeed.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    /// Process could not be spawned or the endpoint could not be reached.
    #[error("connection error: {0}")]
    Connection(String),
    /// The peer answered, but not with what the handshake expects.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The channel ended before the handshake finished.
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("handshake exceeded {0}ms")]
    Timeout(u128),
}

impl VerifyError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

#[derive(Debug, Clone, Error)]
#[error("token estimation failed: {0}")]
pub struct EstimatorError(pub String);

/// Errors that escape `Verifier::verify_server` instead of being folded
/// into a `VerificationResult`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid server descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error("verification task for '{server}' failed: {reason}")]
    TaskFailed { server: String, reason: String },
}
