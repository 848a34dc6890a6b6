use chrono::{DateTime, Utc};
use mindhaven_common::{AppointmentId, Error, Identity, MessageId, NotificationId, Result};
use serde::{Deserialize, Serialize};

/// Maximum accepted inbound frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// A chat message as delivered by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Assigned by the backend; absent on frames that echo a client send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub content: String,
    pub sender: Identity,
    pub receiver: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Any other fields the backend attaches (`is_read`, `notification_type`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw participant flags of a `video_call_update` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallUpdate {
    #[serde(default)]
    pub user_joined: bool,
    #[serde(default)]
    pub mentor_joined: bool,
    #[serde(default)]
    pub call_started: bool,
    #[serde(default)]
    pub call_ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_duration: Option<u64>,
}

/// The single lifecycle step a call update represents for the call session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransition {
    /// One side is in the room, the other is not yet.
    WaitingForPeer,
    /// Both participants are present and the call is running.
    Active,
    Ended { duration_secs: Option<u64> },
}

impl CallUpdate {
    /// Collapses the flags into at most one transition. `call_ended` wins over
    /// everything; "both joined" and "call started" are the same transition.
    pub fn transition(&self) -> Option<CallTransition> {
        if self.call_ended {
            Some(CallTransition::Ended {
                duration_secs: self.call_duration,
            })
        } else if self.call_started || (self.user_joined && self.mentor_joined) {
            Some(CallTransition::Active)
        } else if self.user_joined || self.mentor_joined {
            Some(CallTransition::WaitingForPeer)
        } else {
            None
        }
    }
}

/// Frames received from the backend, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    ChatMessage {
        message: ChatMessage,
    },
    #[serde(rename = "message_status")]
    MessageStatusUpdate {
        message_id: MessageId,
        status: String,
    },
    #[serde(rename = "ai_moderation")]
    ModerationWarning {
        message_id: MessageId,
        message: String,
    },
    #[serde(rename = "new_notification")]
    NotificationCreated {
        notification: Notification,
    },
    #[serde(rename = "video_call_update")]
    CallUpdate {
        data: CallUpdate,
    },
    /// Any tag this client does not know about.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn parse_json(frame: &str) -> Result<Self> {
        if frame.len() > MAX_FRAME_BYTES {
            return Err(Error::Protocol(format!(
                "inbound frame exceeds max size: {} > {}",
                frame.len(),
                MAX_FRAME_BYTES
            )));
        }

        serde_json::from_str(frame)
            .map_err(|e| Error::Protocol(format!("invalid inbound frame json: {e}")))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat_message",
            Self::MessageStatusUpdate { .. } => "message_status",
            Self::ModerationWarning { .. } => "ai_moderation",
            Self::NotificationCreated { .. } => "new_notification",
            Self::CallUpdate { .. } => "video_call_update",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundChat {
    pub content: String,
    pub sender: Identity,
    pub receiver: Identity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEventType {
    UserJoined,
    CallEnded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    User,
    Mentor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoCallEvent {
    pub event_type: CallEventType,
    pub appointment_id: AppointmentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_duration: Option<u64>,
    pub user_role: ParticipantRole,
}

/// Payloads the application sends over an open channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    ChatMessage { message: OutboundChat },
    VideoCallEvent { data: VideoCallEvent },
}

impl OutboundMessage {
    pub fn chat(sender: Identity, receiver: Identity, content: impl Into<String>) -> Self {
        Self::ChatMessage {
            message: OutboundChat {
                content: content.into(),
                sender,
                receiver,
            },
        }
    }

    pub fn call_joined(appointment_id: AppointmentId, role: ParticipantRole) -> Self {
        Self::VideoCallEvent {
            data: VideoCallEvent {
                event_type: CallEventType::UserJoined,
                appointment_id,
                call_duration: None,
                user_role: role,
            },
        }
    }

    pub fn call_ended(
        appointment_id: AppointmentId,
        role: ParticipantRole,
        duration_secs: u64,
    ) -> Self {
        Self::VideoCallEvent {
            data: VideoCallEvent {
                event_type: CallEventType::CallEnded,
                appointment_id,
                call_duration: Some(duration_secs),
                user_role: role,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_message_with_numeric_ids() {
        let raw = r#"{
            "type": "chat_message",
            "message": {
                "id": 17,
                "content": "hello",
                "sender": 3,
                "receiver": "9",
                "timestamp": "2024-05-01T10:00:00Z"
            }
        }"#;

        let event = InboundEvent::parse_json(raw).expect("chat frame should parse");
        let InboundEvent::ChatMessage { message } = event else {
            panic!("expected chat message, got {event:?}");
        };
        assert_eq!(message.id, Some(MessageId::from_string("17")));
        assert_eq!(message.sender.as_str(), "3");
        assert_eq!(message.receiver.as_str(), "9");
        assert!(message.timestamp.is_some());
    }

    #[test]
    fn parses_moderation_and_status_updates() {
        let moderation =
            InboundEvent::parse_json(r#"{"type":"ai_moderation","message_id":5,"message":"be kind"}"#)
                .expect("moderation frame should parse");
        assert_eq!(
            moderation,
            InboundEvent::ModerationWarning {
                message_id: MessageId::from_string("5"),
                message: "be kind".to_string(),
            }
        );

        let status = InboundEvent::parse_json(
            r#"{"type":"message_status","message_id":"5","status":"delivered"}"#,
        )
        .expect("status frame should parse");
        assert_eq!(status.kind(), "message_status");
    }

    #[test]
    fn notification_keeps_unknown_fields() {
        let raw = r#"{
            "type": "new_notification",
            "notification": {
                "id": 1,
                "content": "Session booked",
                "created_at": "2024-05-01T10:00:00Z",
                "is_read": false
            }
        }"#;

        let InboundEvent::NotificationCreated { notification } =
            InboundEvent::parse_json(raw).expect("notification frame should parse")
        else {
            panic!("expected notification");
        };
        assert_eq!(notification.id.as_str(), "1");
        assert_eq!(
            notification.extra.get("is_read"),
            Some(&serde_json::Value::Bool(false))
        );
    }

    #[test]
    fn unknown_tags_are_ignored_not_rejected() {
        let event = InboundEvent::parse_json(r#"{"type":"video_call_event","data":{}}"#)
            .expect("unknown tags still parse");
        assert_eq!(event, InboundEvent::Unknown);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(InboundEvent::parse_json("not json").is_err());
        assert!(InboundEvent::parse_json(r#"{"message":{}}"#).is_err());
        assert!(InboundEvent::parse_json(r#"{"type":"chat_message"}"#).is_err());
    }

    #[test]
    fn rejects_oversized_frames() {
        let oversized = "x".repeat(MAX_FRAME_BYTES + 1);
        let err = InboundEvent::parse_json(&oversized).expect_err("must reject oversized frame");
        assert!(err.to_string().contains("exceeds max size"));
    }

    #[test]
    fn both_joined_is_a_single_active_transition() {
        let update = CallUpdate {
            user_joined: true,
            mentor_joined: true,
            call_started: true,
            ..CallUpdate::default()
        };
        assert_eq!(update.transition(), Some(CallTransition::Active));
    }

    #[test]
    fn call_transitions_follow_flag_priority() {
        let waiting = CallUpdate {
            mentor_joined: true,
            ..CallUpdate::default()
        };
        assert_eq!(waiting.transition(), Some(CallTransition::WaitingForPeer));

        let ended = CallUpdate {
            user_joined: true,
            mentor_joined: true,
            call_ended: true,
            call_duration: Some(754),
            ..CallUpdate::default()
        };
        assert_eq!(
            ended.transition(),
            Some(CallTransition::Ended {
                duration_secs: Some(754)
            })
        );

        assert_eq!(CallUpdate::default().transition(), None);
    }

    #[test]
    fn outbound_chat_wire_shape() {
        let msg = OutboundMessage::chat(
            Identity::from_string("3"),
            Identity::from_string("9"),
            "hi there",
        );
        let value: serde_json::Value =
            serde_json::from_str(&msg.to_json().expect("serialize")).expect("valid json");
        assert_eq!(
            value,
            serde_json::json!({
                "type": "chat_message",
                "message": {"content": "hi there", "sender": "3", "receiver": "9"}
            })
        );
    }

    #[test]
    fn outbound_call_event_omits_missing_duration() {
        let joined = OutboundMessage::call_joined(AppointmentId::from(12), ParticipantRole::Mentor);
        let value: serde_json::Value =
            serde_json::from_str(&joined.to_json().expect("serialize")).expect("valid json");
        assert_eq!(
            value,
            serde_json::json!({
                "type": "video_call_event",
                "data": {"event_type": "user_joined", "appointment_id": "12", "user_role": "mentor"}
            })
        );

        let ended = OutboundMessage::call_ended(AppointmentId::from(12), ParticipantRole::User, 90);
        let value: serde_json::Value =
            serde_json::from_str(&ended.to_json().expect("serialize")).expect("valid json");
        assert_eq!(value["data"]["call_duration"], 90);
        assert_eq!(value["data"]["event_type"], "call_ended");
    }
}
