//! Tool-server client.
//!
//! Talks to a long-lived tool server (the job search) spawned as a child
//! process and spoken to over newline-delimited JSON-RPC on its stdio.
//!
//! - `process`: spawning and terminating the child process.
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing.
//! - `protocol`: handshake, `tools/call` round trips, typed calls/results.
//! - `session`: the [`SessionManager`](session::SessionManager) state machine.
//! - `normalize`: mapping results to one JSON shape.
//! - `jobs`: the `search_jobs` schema.

pub mod codec;
pub mod jobs;
pub mod normalize;
pub mod process;
pub mod protocol;
pub mod session;

pub use normalize::{normalize, NormalizedValue};
pub use protocol::{ContentBlock, ToolCall, ToolResult};
pub use session::{SessionManager, SessionOptions, SessionPhase};
