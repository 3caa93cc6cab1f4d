pub mod args;
pub mod descriptor;
pub mod mcp_servers;

pub use args::parse_server_args;
pub use descriptor::{ServerDescriptor, ServerTransport, TransportKind};
pub use mcp_servers::{load_mcp_servers, parse_mcp_servers};
