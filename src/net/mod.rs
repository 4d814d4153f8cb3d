//! Network layer: wire protocol, match registry, and the WebSocket
//! server.

pub mod protocol;
pub mod registry;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, MatchView, ServerMessage};
pub use registry::{ClientAction, MatchCommand, MatchHandle, MatchRegistry, RegistryError};
pub use server::{GameServer, ServeError, ServerConfig};
