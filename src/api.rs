//! Collaborator interfaces consumed by the session core.
//!
//! The session manager does not create containers, store credentials or
//! resolve endpoints itself; it drives these collaborators. Each is a trait
//! so the embedding process can wire in its own implementations (and tests
//! can mock them).

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::PayloadMessage;

/// Auth material attached to the connection handshake. Read from the
/// provider on every connect, never cached across attempts.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Task-scoped credentials delivered by a refresh frame, stored keyed by
/// `credentials_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCredentials {
    /// ARN of the task these credentials belong to.
    pub arn: String,
    pub credentials_id: String,
    pub role_arn: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
    pub role_type: String,
}

/// Discovers the control endpoint for a container instance.
///
/// A failed resolve is retried by the session loop with backoff; the
/// resolver itself must not retry.
#[async_trait::async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, container_instance_arn: &str) -> Result<String>;
}

/// The task engine collaborator: receives task payloads and exposes the
/// tasks it manages.
#[async_trait::async_trait]
pub trait TaskEngine: Send + Sync {
    /// Reported container runtime version, included in the session URL.
    fn version(&self) -> Result<String>;

    /// Hand a decoded payload to the engine for task lifecycle processing.
    async fn deliver_payload(&self, payload: PayloadMessage) -> Result<()>;

    /// Look up a managed task by ARN.
    fn task_by_arn(&self, arn: &str) -> Option<Arc<dyn ManagedTask>>;
}

/// Handle to one task managed by the engine.
pub trait ManagedTask: Send + Sync {
    fn arn(&self) -> String;

    /// Associate the task with a credentials id after a refresh.
    fn set_credentials_id(&self, credentials_id: &str);
}

/// Stores task-scoped credentials delivered over the session.
pub trait CredentialsManager: Send + Sync {
    fn set_task_credentials(&self, credentials: TaskCredentials) -> Result<()>;
}

/// Source of the agent's own auth material.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

/// Provider backed by fixed key material.
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: &str) -> Self {
        Self {
            credentials: Credentials {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
                session_token: session_token.to_string(),
            },
        }
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_returns_fixed_material() {
        let provider = StaticCredentialsProvider::new("test-id", "test-secret", "test-token");
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.access_key_id, "test-id");
        assert_eq!(creds.secret_access_key, "test-secret");
        assert_eq!(creds.session_token, "test-token");
    }
}
