use std::sync::{Mutex, MutexGuard};

use mindhaven_common::{Error, Identity, MessageId, Result};
use mindhaven_realtime::ChatMessage;
use serde::Serialize;
use tracing::debug;

/// Delivery status given to messages as they arrive.
pub const STATUS_RECEIVED: &str = "received";
/// Status of a message the backend's moderation refused to deliver.
pub const STATUS_BLOCKED: &str = "blocked";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationWarning {
    pub message_id: MessageId,
    pub warning: String,
}

#[derive(Debug, Default)]
struct ConversationState {
    current_chat: Option<Identity>,
    messages: Vec<StoredMessage>,
    warnings: Vec<ModerationWarning>,
}

/// Chat history for the signed-in user, in arrival order.
#[derive(Debug, Default)]
pub struct ConversationStore {
    state: Mutex<ConversationState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, ConversationState>> {
        self.state
            .lock()
            .map_err(|_| Error::Store("conversation store lock poisoned".into()))
    }

    /// Appends `message` unless one with the same id is already stored.
    /// Returns whether it was added. Messages without an id are always appended.
    pub fn add_message(&self, message: ChatMessage) -> Result<bool> {
        let mut state = self.state()?;
        if let Some(id) = &message.id
            && state
                .messages
                .iter()
                .any(|m| m.message.id.as_ref() == Some(id))
        {
            debug!(message_id = %id, "stores: duplicate chat message ignored");
            return Ok(false);
        }
        state.messages.push(StoredMessage {
            message,
            status: STATUS_RECEIVED.to_string(),
        });
        Ok(true)
    }

    /// Sets the delivery status of a stored message. Unknown ids are ignored.
    pub fn update_status(&self, message_id: &MessageId, status: impl Into<String>) -> Result<bool> {
        let mut state = self.state()?;
        match state
            .messages
            .iter_mut()
            .find(|m| m.message.id.as_ref() == Some(message_id))
        {
            Some(stored) => {
                stored.status = status.into();
                Ok(true)
            }
            None => {
                debug!(message_id = %message_id, "stores: status update for unknown message");
                Ok(false)
            }
        }
    }

    /// Records a moderation warning and marks the message blocked if we have it.
    pub fn record_warning(&self, message_id: MessageId, warning: impl Into<String>) -> Result<()> {
        let mut state = self.state()?;
        if let Some(stored) = state
            .messages
            .iter_mut()
            .find(|m| m.message.id.as_ref() == Some(&message_id))
        {
            stored.status = STATUS_BLOCKED.to_string();
        }
        state.warnings.push(ModerationWarning {
            message_id,
            warning: warning.into(),
        });
        Ok(())
    }

    /// Drains warnings recorded since the last call.
    pub fn take_warnings(&self) -> Result<Vec<ModerationWarning>> {
        Ok(std::mem::take(&mut self.state()?.warnings))
    }

    pub fn set_current_chat(&self, peer: Option<Identity>) -> Result<()> {
        self.state()?.current_chat = peer;
        Ok(())
    }

    pub fn current_chat(&self) -> Result<Option<Identity>> {
        Ok(self.state()?.current_chat.clone())
    }

    pub fn messages(&self) -> Result<Vec<StoredMessage>> {
        Ok(self.state()?.messages.clone())
    }

    /// Messages exchanged with `peer`, in either direction.
    pub fn messages_with(&self, peer: &Identity) -> Result<Vec<StoredMessage>> {
        Ok(self
            .state()?
            .messages
            .iter()
            .filter(|m| &m.message.sender == peer || &m.message.receiver == peer)
            .cloned()
            .collect())
    }

    /// Replaces the history wholesale, e.g. after loading a conversation.
    pub fn set_messages(&self, messages: Vec<ChatMessage>) -> Result<()> {
        self.state()?.messages = messages
            .into_iter()
            .map(|message| StoredMessage {
                message,
                status: STATUS_RECEIVED.to_string(),
            })
            .collect();
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        *self.state()? = ConversationState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: Option<u64>, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.map(MessageId::from),
            content: content.to_string(),
            sender: Identity::from_string("1"),
            receiver: Identity::from_string("2"),
            timestamp: None,
        }
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let store = ConversationStore::new();
        assert!(store.add_message(msg(Some(1), "hi")).unwrap());
        assert!(!store.add_message(msg(Some(1), "hi again")).unwrap());
        assert!(store.add_message(msg(Some(2), "there")).unwrap());

        let contents: Vec<_> = store
            .messages()
            .unwrap()
            .into_iter()
            .map(|m| m.message.content)
            .collect();
        assert_eq!(contents, vec!["hi", "there"]);
    }

    #[test]
    fn messages_without_id_always_append() {
        let store = ConversationStore::new();
        store.add_message(msg(None, "echo")).unwrap();
        store.add_message(msg(None, "echo")).unwrap();
        assert_eq!(store.messages().unwrap().len(), 2);
    }

    #[test]
    fn status_updates_apply_to_known_messages_only() {
        let store = ConversationStore::new();
        store.add_message(msg(Some(5), "hello")).unwrap();

        assert!(store.update_status(&MessageId::from(5), "delivered").unwrap());
        assert!(!store.update_status(&MessageId::from(6), "delivered").unwrap());
        assert_eq!(store.messages().unwrap()[0].status, "delivered");
    }

    #[test]
    fn warnings_block_the_message_and_drain_once() {
        let store = ConversationStore::new();
        store.add_message(msg(Some(9), "something rude")).unwrap();
        store
            .record_warning(MessageId::from(9), "Please keep it respectful")
            .unwrap();

        assert_eq!(store.messages().unwrap()[0].status, STATUS_BLOCKED);
        let warnings = store.take_warnings().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning, "Please keep it respectful");
        assert!(store.take_warnings().unwrap().is_empty());
    }

    #[test]
    fn filters_by_peer_and_resets() {
        let store = ConversationStore::new();
        store.set_current_chat(Some("2".into())).unwrap();
        store
            .set_messages(vec![msg(Some(1), "a"), {
                let mut other = msg(Some(2), "b");
                other.receiver = Identity::from_string("3");
                other
            }])
            .unwrap();

        assert_eq!(store.messages_with(&"3".into()).unwrap().len(), 1);
        assert_eq!(store.current_chat().unwrap(), Some(Identity::from_string("2")));

        store.reset().unwrap();
        assert!(store.messages().unwrap().is_empty());
        assert!(store.current_chat().unwrap().is_none());
    }
}
