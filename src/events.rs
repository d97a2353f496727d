//! Deregistration event fan-out.
//!
//! When the control endpoint reports the instance as deregistered, the
//! session publishes an event here for the embedding process to act on
//! (typically by re-registering or shutting the agent down). Publication is
//! best-effort: a stream nobody listens to must never block or fail the
//! session.

use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A single instance-lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEvent {
    pub container_instance_arn: String,
    /// The endpoint error that triggered the event, rendered verbatim.
    pub reason: String,
}

/// Broadcast fan-out for instance events.
///
/// Subscribers attach with [`subscribe`](Self::subscribe) and receive every
/// event published while they are listening, at least once. Events published
/// with no listeners are dropped.
pub struct InstanceEventStream {
    name: String,
    tx: broadcast::Sender<InstanceEvent>,
}

impl InstanceEventStream {
    pub fn new(name: &str) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            name: name.to_string(),
            tx,
        }
    }

    /// Spawn a listener task invoking `handler` for every event.
    ///
    /// The task runs until the stream is dropped.
    pub fn subscribe<F>(&self, subscriber: &str, mut handler: F)
    where
        F: FnMut(InstanceEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let stream = self.name.clone();
        let subscriber = subscriber.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            stream = %stream,
                            subscriber = %subscriber,
                            missed = missed,
                            "Event subscriber lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(stream = %stream, subscriber = %subscriber, "Event subscriber stopped");
        });
    }

    /// Raw receiver, for subscribers that want to `select!` themselves.
    pub fn listener(&self) -> broadcast::Receiver<InstanceEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current listeners. Best-effort: dropped when
    /// nobody is listening.
    pub fn publish(&self, event: InstanceEvent) {
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(stream = %self.name, receivers = receivers, "Event published")
            }
            Err(_) => debug!(stream = %self.name, "No listeners, event dropped"),
        }
    }
}
