use std::time::Duration;

use mindhaven_common::MessageId;
use thiserror::Error;
use tracing::trace;

use crate::protocol::{CallTransition, ChatMessage, InboundEvent, Notification};

/// Receives the events a realtime channel decodes. One method per inbound
/// event kind; every frame results in at most one call.
///
/// Methods are invoked from the channel's driver task, one at a time and in
/// the order frames arrived. Implementations should return quickly.
pub trait Dispatcher: Send + Sync {
    fn on_chat_message(&self, message: ChatMessage);

    fn on_message_status(&self, message_id: MessageId, status: String);

    /// The backend's moderation blocked a message the user sent.
    fn on_moderation_warning(&self, message_id: MessageId, warning: String);

    fn on_notification(&self, notification: Notification);

    fn on_call_transition(&self, transition: CallTransition);

    fn on_state_change(&self, _state: &ConnectionState) {}

    /// Called exactly once if the channel gives up reconnecting.
    fn on_terminal_failure(&self, _failure: &ChannelFailure) {}
}

/// Routes a decoded frame to the matching dispatcher method.
pub fn dispatch(dispatcher: &dyn Dispatcher, event: InboundEvent) {
    match event {
        InboundEvent::ChatMessage { message } => dispatcher.on_chat_message(message),
        InboundEvent::MessageStatusUpdate { message_id, status } => {
            dispatcher.on_message_status(message_id, status)
        }
        InboundEvent::ModerationWarning {
            message_id,
            message,
        } => dispatcher.on_moderation_warning(message_id, message),
        InboundEvent::NotificationCreated { notification } => {
            dispatcher.on_notification(notification)
        }
        InboundEvent::CallUpdate { data } => match data.transition() {
            Some(transition) => dispatcher.on_call_transition(transition),
            None => trace!("realtime: call update without lifecycle change"),
        },
        InboundEvent::Unknown => trace!("realtime: ignoring frame with unknown type"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Waiting for the reconnect timer of attempt `attempt`.
    Backoff {
        attempt: u32,
        delay: Duration,
    },
    /// Lost the connection while the network was unreachable; resumes when it returns.
    Offline,
    Closing,
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    CallerInitiated,
    /// The server ended the session with a normal close.
    ServerClosed,
    MaxAttemptsExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelFailure {
    #[error("unable to connect after {attempts} attempts, please refresh")]
    MaxAttemptsExceeded { attempts: u32 },
}
