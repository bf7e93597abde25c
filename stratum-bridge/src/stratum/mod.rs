//! Worker-facing Stratum-style server.
//!
//! Workers connect over TCP (optionally TLS) and exchange newline-delimited
//! JSON-RPC messages:
//!
//! - **Requests**: `mining.subscribe`, `mining.extranonce.subscribe`,
//!   `mining.authorize`, `mining.submit`
//! - **Notifications**: `mining.notify`, sent whenever a new job is current
//! - **Responses**: `{"id", "result", "error"}`, with `error` a short reason
//!   string or null
//!
//! # Architecture
//!
//! [`StratumServer`] owns the listener and spawns one [`WorkerSession`] task
//! per connection. Sessions receive jobs from the
//! [`JobBroadcaster`](crate::broadcaster::JobBroadcaster) over a channel and
//! report accepted shares through a
//! [`ShareReporter`](crate::reporter::ShareReporter).

mod connection;
mod error;
mod messages;
mod server;
mod session;

pub use connection::{Connection, Frame, MAX_LINE_LENGTH, Transport};
pub use error::{StratumError, StratumResult};
pub use messages::{ClientMessage, MessageError, Request, ServerMessage, method, reason};
pub use server::{StratumServer, TLS_HANDSHAKE_TIMEOUT};
pub use session::{SessionContext, SessionState, WorkerSession};
