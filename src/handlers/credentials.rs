//! Task credential refresh.

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::api::{CredentialsManager, TaskCredentials, TaskEngine};
use crate::error::Result;
use crate::protocol::{AckRequest, InboundMessage, MessageKind, OutboundMessage};
use crate::wsclient::{ClientServer, MessageHandler};

/// Stores refreshed task credentials and associates the credentials id with
/// the target task before acknowledging.
pub struct RefreshCredentialsHandler {
    // Weak: the registry lives inside the client, so a strong reference
    // here would keep the client alive past its connection attempt.
    client: Weak<dyn ClientServer>,
    credentials_manager: Arc<dyn CredentialsManager>,
    task_engine: Arc<dyn TaskEngine>,
    cluster: String,
    container_instance_arn: String,
}

impl RefreshCredentialsHandler {
    pub fn new(
        client: Weak<dyn ClientServer>,
        credentials_manager: Arc<dyn CredentialsManager>,
        task_engine: Arc<dyn TaskEngine>,
        cluster: &str,
        container_instance_arn: &str,
    ) -> Self {
        Self {
            client,
            credentials_manager,
            task_engine,
            cluster: cluster.to_string(),
            container_instance_arn: container_instance_arn.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for RefreshCredentialsHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::RefreshCredentials
    }

    async fn handle(&self, message: InboundMessage) -> Result<()> {
        let InboundMessage::RefreshCredentials(refresh) = message else {
            return Ok(());
        };
        debug!(
            message_id = %refresh.message_id,
            task_arn = %refresh.task_arn,
            "Credential refresh received"
        );

        let Some(task) = self.task_engine.task_by_arn(&refresh.task_arn) else {
            // The manifest for this task may not have arrived yet; the
            // endpoint will redeliver.
            warn!(task_arn = %refresh.task_arn, "Credential refresh for unknown task");
            return Ok(());
        };

        let role = refresh.role_credentials;
        self.credentials_manager.set_task_credentials(TaskCredentials {
            arn: refresh.task_arn.clone(),
            credentials_id: role.credentials_id.clone(),
            role_arn: role.role_arn,
            access_key_id: role.access_key_id,
            secret_access_key: role.secret_access_key,
            session_token: role.session_token,
            expiration: role.expiration,
            role_type: refresh.role_type,
        })?;
        task.set_credentials_id(&role.credentials_id);

        let Some(client) = self.client.upgrade() else {
            debug!(message_id = %refresh.message_id, "Connection already torn down, dropping refresh ack");
            return Ok(());
        };
        client
            .make_request(&OutboundMessage::Ack(AckRequest {
                message_id: refresh.message_id,
                cluster_arn: self.cluster.clone(),
                container_instance_arn: self.container_instance_arn.clone(),
            }))
            .await
    }
}
