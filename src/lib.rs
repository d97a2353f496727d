//! Tether - control-plane session manager for the container agent
//!
//! Tether owns the agent's durable, authenticated, bidirectional channel to
//! the control endpoint: it discovers the endpoint, builds the session URL,
//! connects, demultiplexes in-band control messages (task payloads,
//! credential refreshes, heartbeats) into registered handlers, and
//! reconnects forever with error-class-dependent delays. Cancelling the
//! session is the only way `Session::start` returns.
//!
//! ## Modules
//!
//! - **session**: the reconnect state machine and per-connection runtime
//! - **wsclient**: the `ClientServer` transport contract + WebSocket impl
//! - **handlers**: inbound message handlers (payload, credentials, heartbeat)
//! - **protocol**: wire frame types and JSON codec
//! - **events**: deregistration event fan-out
//! - **backoff**: exponential reconnect backoff with jitter
//! - **api**: collaborator traits supplied by the embedding process

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod protocol;
pub mod session;
pub mod wsclient;

pub use config::{BackoffConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use events::{InstanceEvent, InstanceEventStream};
pub use session::{AgentIdentity, CancelHandle, Session};
