//! Session-bound JSON-RPC over Server-Sent Events.
//!
//! A client first obtains a session id, then holds one long-lived SSE stream
//! for that session and posts JSON-RPC requests separately. Responses are
//! pushed on the stream, correlated by the request id.
//!
//! ## Endpoints
//!
//! - `POST /sse` - Mint a session; answers with an `endpoint` frame
//! - `GET /sse?sessionId=<id>` - Attach the event stream for a session
//! - `GET /sse` - Mint a session and attach in one step
//! - `POST /sse?sessionId=<id>` - Submit one JSON-RPC request
//! - `DELETE /sse?sessionId=<id>` - Terminate a session
//!
//! The session id may also be passed in the `Mcp-Session-Id` header.

pub mod channel;
pub mod handler;
pub mod service;
pub mod session;
pub mod state;

pub use channel::{ChannelError, ChannelSettings, EventChannel, FrameStream};
pub use handler::RpcDispatcher;
pub use service::{McpService, Submission};
pub use session::{RegistrySettings, SessionError, SessionId, SessionInfo, SessionRegistry};
pub use state::{SessionEvent, SessionState, TransitionError};
