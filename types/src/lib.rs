//! Shared wire types for the Sluice resource server.
//!
//! This crate contains the JSON-RPC envelope, the resource DTOs and the SSE
//! frame codec shared between the server and the probe client.

/// Default port for the Sluice server.
pub const DEFAULT_PORT: u16 = 3000;

/// Path of the SSE endpoint (initiate, stream and submit).
pub const SSE_PATH: &str = "/sse";

/// Header carrying the session id, as an alternative to the `sessionId` query parameter.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

pub mod frame;
pub mod protocol;
pub mod resource;
pub mod rpc;

// Re-export commonly used types
pub use frame::{Frame, FrameDecoder, FrameKind};
pub use protocol::{InitializeResult, ServerInfo, PROTOCOL_VERSION};
pub use resource::{
    ListResourcesResult, ReadResourceParams, ReadResourceResult, ResourceBody, ResourceContents,
    ResourceDescriptor,
};
pub use rpc::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse, Method};

/// Build the relative URL a client posts requests to for a session.
pub fn session_endpoint(session_id: &str) -> String {
    format!("{}?sessionId={}", SSE_PATH, session_id)
}
