//! Task payload dispatch.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::api::TaskEngine;
use crate::error::Result;
use crate::protocol::{AckRequest, InboundMessage, MessageKind, OutboundMessage};
use crate::wsclient::{ClientServer, MessageHandler};

/// Routes payload frames to the task engine, advances the shared
/// task-manifest sequence cursor, and acknowledges delivery.
pub struct PayloadHandler {
    // Weak: the registry lives inside the client, so a strong reference
    // here would keep the client alive past its connection attempt.
    client: Weak<dyn ClientServer>,
    task_engine: Arc<dyn TaskEngine>,
    cluster: String,
    container_instance_arn: String,
    latest_seq_num: Option<Arc<AtomicI64>>,
}

impl PayloadHandler {
    pub fn new(
        client: Weak<dyn ClientServer>,
        task_engine: Arc<dyn TaskEngine>,
        cluster: &str,
        container_instance_arn: &str,
        latest_seq_num: Option<Arc<AtomicI64>>,
    ) -> Self {
        Self {
            client,
            task_engine,
            cluster: cluster.to_string(),
            container_instance_arn: container_instance_arn.to_string(),
            latest_seq_num,
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for PayloadHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Payload
    }

    async fn handle(&self, message: InboundMessage) -> Result<()> {
        let InboundMessage::Payload(payload) = message else {
            return Ok(());
        };
        let message_id = payload.message_id.clone();
        debug!(
            message_id = %message_id,
            tasks = payload.tasks.len(),
            "Payload received"
        );

        // The cursor only moves forward; a replayed frame must not rewind it.
        if let (Some(seq), Some(cursor)) = (payload.seq_num, &self.latest_seq_num) {
            cursor.fetch_max(seq, Ordering::SeqCst);
        }

        if let Err(error) = self.task_engine.deliver_payload(payload).await {
            warn!(message_id = %message_id, error = %error, "Task engine rejected payload");
            return Ok(());
        }

        let Some(client) = self.client.upgrade() else {
            debug!(message_id = %message_id, "Connection already torn down, dropping payload ack");
            return Ok(());
        };
        client
            .make_request(&OutboundMessage::Ack(AckRequest {
                message_id,
                cluster_arn: self.cluster.clone(),
                container_instance_arn: self.container_instance_arn.clone(),
            }))
            .await
    }
}
