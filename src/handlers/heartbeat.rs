//! Heartbeat acknowledgement.
//!
//! The inactivity timer is reset by the any-frame hook, not here; this
//! handler only answers the endpoint so it knows the agent is alive.

use std::sync::Weak;

use tracing::debug;

use crate::error::Result;
use crate::protocol::{HeartbeatAckRequest, InboundMessage, MessageKind, OutboundMessage};
use crate::wsclient::{ClientServer, MessageHandler};

pub struct HeartbeatHandler {
    // Weak: the registry lives inside the client, so a strong reference
    // here would keep the client alive past its connection attempt.
    client: Weak<dyn ClientServer>,
}

impl HeartbeatHandler {
    pub fn new(client: Weak<dyn ClientServer>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl MessageHandler for HeartbeatHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Heartbeat
    }

    async fn handle(&self, message: InboundMessage) -> Result<()> {
        let InboundMessage::Heartbeat(heartbeat) = message else {
            return Ok(());
        };
        debug!(message_id = %heartbeat.message_id, "Heartbeat received");
        let Some(client) = self.client.upgrade() else {
            debug!("Connection already torn down, dropping heartbeat ack");
            return Ok(());
        };
        client
            .make_request(&OutboundMessage::HeartbeatAck(HeartbeatAckRequest {
                message_id: heartbeat.message_id,
            }))
            .await
    }
}
