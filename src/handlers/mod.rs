//! Inbound message handlers.
//!
//! One handler per message kind, registered fresh against the live
//! connection on every attempt so acknowledgements go out on the connection
//! the frame arrived on. Handler failures are logged by the dispatcher and
//! never terminate the session.

mod credentials;
mod heartbeat;
mod payload;

pub use credentials::RefreshCredentialsHandler;
pub use heartbeat::HeartbeatHandler;
pub use payload::PayloadHandler;
