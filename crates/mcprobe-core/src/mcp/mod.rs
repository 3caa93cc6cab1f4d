pub mod jsonrpc;
pub mod session;
pub mod transport;

pub use session::{ClientInfo, Handshake, ServerInfo, Session, ToolDescriptor, PROTOCOL_VERSION};
pub use transport::Transport;
