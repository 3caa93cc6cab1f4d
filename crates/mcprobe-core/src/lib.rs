pub mod config;
pub mod error;
pub mod mcp;
pub mod package;
pub mod server;
pub mod tokens;
pub mod verify;

pub use config::ProbeConfig;
pub use error::{DescriptorError, EstimatorError, ParseError, ProbeError, VerifyError};
pub use mcp::{ClientInfo, ServerInfo, ToolDescriptor};
pub use package::{identify, PackageIdentity};
pub use server::{
    load_mcp_servers, parse_mcp_servers, parse_server_args, ServerDescriptor, ServerTransport,
    TransportKind,
};
pub use tokens::{CharRatioEstimator, FramingOverhead, SerializedEstimator, TokenEstimator};
pub use verify::{Capabilities, VerificationResult, VerificationStatus, Verifier};
