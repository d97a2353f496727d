//! Transport abstraction owning one framed connection to the control
//! endpoint.
//!
//! The session core drives connections exclusively through the
//! [`ClientServer`] trait: connect, a blocking serve-pump that dispatches
//! decoded frames to registered handlers, concurrency-safe sends, and a
//! two-stage shutdown (polite close frame, then force close). The
//! production implementation is [`WebSocketClientServer`]; tests substitute
//! their own.

mod transport;

pub use transport::{websocket_scheme, WebSocketClientServer, WebSocketClientFactory};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::api::Credentials;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::{InboundMessage, MessageKind, OutboundMessage};

/// Hook invoked for every successfully decoded inbound frame, before the
/// type-specific handler runs. The session uses it to reset the inactivity
/// timer.
pub type AnyFrameHook = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Handler for one inbound message kind.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Message kind this handler accepts.
    fn kind(&self) -> MessageKind;

    async fn handle(&self, message: InboundMessage) -> Result<()>;
}

/// One bidirectional framed connection to the control endpoint.
///
/// `make_request` must be safe for concurrent callers; the write side
/// serializes frames internally. `close` must be idempotent and must cause
/// an in-flight `serve` to return promptly.
#[async_trait::async_trait]
pub trait ClientServer: Send + Sync {
    /// Register a handler for its message kind.
    fn add_request_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Install the hook invoked for every decoded frame.
    fn set_any_request_handler(&self, hook: AnyFrameHook);

    /// Perform the transport and upgrade handshake.
    async fn connect(&self) -> Result<()>;

    /// Block reading frames until the connection terminates. Returns
    /// [`SessionError::EndOfStream`](crate::SessionError::EndOfStream) on a
    /// clean close.
    async fn serve(&self) -> Result<()>;

    /// Send a frame. Safe for concurrent callers.
    async fn make_request(&self, message: &OutboundMessage) -> Result<()>;

    /// Politely signal shutdown with a close frame.
    async fn write_close_message(&self) -> Result<()>;

    /// Force-close the underlying transport. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Produces a fresh [`ClientServer`] for each connection attempt.
pub trait ClientFactory: Send + Sync {
    fn new_client(
        &self,
        url: &str,
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Arc<dyn ClientServer>;
}

/// Registry of inbound handlers, keyed by message kind, with an any-frame
/// hook that fires first for every frame.
#[derive(Default)]
pub struct HandlerRegistry {
    typed: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
    any_hook: RwLock<Option<AnyFrameHook>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Arc<dyn MessageHandler>) {
        self.typed
            .write()
            .unwrap()
            .insert(handler.kind(), handler);
    }

    pub fn set_any(&self, hook: AnyFrameHook) {
        *self.any_hook.write().unwrap() = Some(hook);
    }

    /// Dispatch one decoded frame: any-frame hook first, then the
    /// type-specific handler. Handler errors are logged and dropped; they
    /// never terminate the connection.
    pub async fn dispatch(&self, message: InboundMessage) {
        let hook = self.any_hook.read().unwrap().clone();
        if let Some(hook) = hook {
            hook(&message);
        }
        let kind = message.kind();
        let handler = self.typed.read().unwrap().get(&kind).cloned();
        match handler {
            Some(handler) => {
                if let Err(error) = handler.handle(message).await {
                    warn!(kind = ?kind, error = %error, "Inbound handler failed");
                }
            }
            None => debug!(kind = ?kind, "No handler registered for message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HeartbeatMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        kind: MessageKind,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for CountingHandler {
        fn kind(&self) -> MessageKind {
            self.kind
        }

        async fn handle(&self, _message: InboundMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn heartbeat() -> InboundMessage {
        InboundMessage::Heartbeat(HeartbeatMessage {
            message_id: "123".to_string(),
            healthy: true,
        })
    }

    #[tokio::test]
    async fn test_dispatch_runs_hook_and_typed_handler() {
        let registry = HandlerRegistry::new();
        let handled = Arc::new(AtomicUsize::new(0));
        let hooked = Arc::new(AtomicUsize::new(0));

        registry.add(Arc::new(CountingHandler {
            kind: MessageKind::Heartbeat,
            calls: Arc::clone(&handled),
        }));
        let hook_counter = Arc::clone(&hooked);
        registry.set_any(Arc::new(move |_| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(heartbeat()).await;
        registry.dispatch(heartbeat()).await;

        assert_eq!(handled.load(Ordering::SeqCst), 2);
        assert_eq!(hooked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_without_typed_handler_still_fires_hook() {
        let registry = HandlerRegistry::new();
        let hooked = Arc::new(AtomicUsize::new(0));
        let hook_counter = Arc::clone(&hooked);
        registry.set_any(Arc::new(move |_| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry
            .dispatch(InboundMessage::Unknown {
                kind: "FutureMessage".to_string(),
            })
            .await;

        assert_eq!(hooked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_drops_handler_errors() {
        struct FailingHandler;

        #[async_trait::async_trait]
        impl MessageHandler for FailingHandler {
            fn kind(&self) -> MessageKind {
                MessageKind::Heartbeat
            }

            async fn handle(&self, _message: InboundMessage) -> Result<()> {
                Err(crate::SessionError::Engine("boom".to_string()))
            }
        }

        let registry = HandlerRegistry::new();
        registry.add(Arc::new(FailingHandler));
        // Must not panic or propagate.
        registry.dispatch(heartbeat()).await;
    }
}
