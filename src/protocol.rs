//! Wire messages exchanged with the control endpoint.
//!
//! Frames are JSON envelopes of the form `{"type": <tag>, "message": {...}}`.
//! Decoding is keyed on the tag; frames with an unrecognized tag still
//! decode (into [`InboundMessage::Unknown`]) so the inactivity timer sees
//! every frame the endpoint sends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Message-type tag, used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    Payload,
    RefreshCredentials,
    Unknown,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Heartbeat(HeartbeatMessage),
    Payload(PayloadMessage),
    RefreshCredentials(RefreshCredentialsMessage),
    /// A frame whose tag no decoder claims; carried so the any-frame hook
    /// still fires.
    Unknown { kind: String },
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Heartbeat(_) => MessageKind::Heartbeat,
            InboundMessage::Payload(_) => MessageKind::Payload,
            InboundMessage::RefreshCredentials(_) => MessageKind::RefreshCredentials,
            InboundMessage::Unknown { .. } => MessageKind::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Value,
}

/// Decode one wire frame.
pub fn decode(frame: &str) -> Result<InboundMessage> {
    let envelope: Envelope = serde_json::from_str(frame)?;
    let message = match envelope.kind.as_str() {
        "HeartbeatMessage" => InboundMessage::Heartbeat(serde_json::from_value(envelope.message)?),
        "PayloadMessage" => InboundMessage::Payload(serde_json::from_value(envelope.message)?),
        "IAMRoleCredentialsMessage" => {
            InboundMessage::RefreshCredentials(serde_json::from_value(envelope.message)?)
        }
        other => InboundMessage::Unknown {
            kind: other.to_string(),
        },
    };
    Ok(message)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    pub message_id: String,
    #[serde(default)]
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMessage {
    pub message_id: String,
    #[serde(default)]
    pub cluster_arn: String,
    #[serde(default)]
    pub container_instance_arn: String,
    #[serde(default)]
    pub seq_num: Option<i64>,
    #[serde(default)]
    pub generated_at: Option<i64>,
    #[serde(default)]
    pub tasks: Vec<TaskPayload>,
}

/// One task entry inside a payload frame. Container definitions and network
/// interfaces are carried opaquely for the task engine to interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub arn: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub desired_status: String,
    #[serde(default)]
    pub role_credentials: Option<RoleCredentials>,
    #[serde(default)]
    pub containers: Vec<Value>,
    #[serde(default)]
    pub elastic_network_interfaces: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCredentialsMessage {
    pub message_id: String,
    #[serde(default)]
    pub cluster_arn: String,
    pub task_arn: String,
    #[serde(default)]
    pub role_type: String,
    pub role_credentials: RoleCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    pub credentials_id: String,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub expiration: String,
}

/// An outbound frame. Only acknowledgements originate here; everything else
/// the agent sends goes through external handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum OutboundMessage {
    #[serde(rename = "AckRequest")]
    Ack(AckRequest),
    #[serde(rename = "HeartbeatAckRequest")]
    HeartbeatAck(HeartbeatAckRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub message_id: String,
    pub cluster_arn: String,
    pub container_instance_arn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAckRequest {
    pub message_id: String,
}

/// Encode an outbound frame to its JSON wire form.
pub fn encode(message: &OutboundMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HEARTBEAT: &str =
        r#"{"type":"HeartbeatMessage","message":{"healthy":true,"messageId":"123"}}"#;

    const SAMPLE_REFRESH: &str = r#"
    {
      "type": "IAMRoleCredentialsMessage",
      "message": {
        "messageId": "123",
        "clusterArn": "default",
        "taskArn": "t1",
        "roleType": "TaskApplication",
        "roleCredentials": {
          "credentialsId": "credsId",
          "accessKeyId": "newakid",
          "expiration": "later",
          "roleArn": "r1",
          "secretAccessKey": "newskid",
          "sessionToken": "newstkn"
        }
      }
    }"#;

    const SAMPLE_PAYLOAD: &str = r#"
    {
      "type": "PayloadMessage",
      "message": {
        "messageId": "123",
        "clusterArn": "1",
        "containerInstanceArn": "1",
        "seqNum": 1,
        "generatedAt": 1,
        "tasks": [
          {
            "arn": "arn",
            "family": "f",
            "version": "3",
            "desiredStatus": "RUNNING",
            "containers": [{"name": "name", "image": "i"}]
          }
        ]
      }
    }"#;

    #[test]
    fn test_decode_heartbeat() {
        let message = decode(SAMPLE_HEARTBEAT).unwrap();
        assert_eq!(message.kind(), MessageKind::Heartbeat);
        match message {
            InboundMessage::Heartbeat(hb) => {
                assert_eq!(hb.message_id, "123");
                assert!(hb.healthy);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_refresh_credentials() {
        let message = decode(SAMPLE_REFRESH).unwrap();
        match message {
            InboundMessage::RefreshCredentials(refresh) => {
                assert_eq!(refresh.task_arn, "t1");
                assert_eq!(refresh.role_type, "TaskApplication");
                assert_eq!(refresh.role_credentials.credentials_id, "credsId");
                assert_eq!(refresh.role_credentials.access_key_id, "newakid");
                assert_eq!(refresh.role_credentials.secret_access_key, "newskid");
                assert_eq!(refresh.role_credentials.session_token, "newstkn");
                assert_eq!(refresh.role_credentials.expiration, "later");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_payload() {
        let message = decode(SAMPLE_PAYLOAD).unwrap();
        match message {
            InboundMessage::Payload(payload) => {
                assert_eq!(payload.message_id, "123");
                assert_eq!(payload.seq_num, Some(1));
                assert_eq!(payload.tasks.len(), 1);
                assert_eq!(payload.tasks[0].arn, "arn");
                assert_eq!(payload.tasks[0].desired_status, "RUNNING");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag_is_not_an_error() {
        let message = decode(r#"{"type":"FutureMessage","message":{}}"#).unwrap();
        assert_eq!(message.kind(), MessageKind::Unknown);
        match message {
            InboundMessage::Unknown { kind } => assert_eq!(kind, "FutureMessage"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_encode_ack() {
        let ack = OutboundMessage::Ack(AckRequest {
            message_id: "123".to_string(),
            cluster_arn: "someCluster".to_string(),
            container_instance_arn: "myArn".to_string(),
        });
        let json = encode(&ack).unwrap();
        assert!(json.contains(r#""type":"AckRequest""#));
        assert!(json.contains(r#""messageId":"123""#));
        assert!(json.contains(r#""clusterArn":"someCluster""#));
    }
}
